// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of FluxION.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

use anyhow::Result;
use async_trait::async_trait;
use chrono::{NaiveDateTime, NaiveTime, TimeZone, Utc};
use fluxion_control::{
    CloudSchedule, CloudScheduleControl, ControlChannel, FakeClock, HostPlatform, LocalEntityMap,
    LocalWriteVerifyEngine, ManagerSettings, MemoryHost, ScheduleWindowManager, ServiceCallDedup,
};
use fluxion_types::{Device, InverterType, RateLimits, SchedulePlan, ScheduleWindow, SocBounds};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

fn device(inverter_type: InverterType) -> Device {
    Device {
        index: 0,
        id: "battery".to_owned(),
        inverter_type,
        capabilities: inverter_type.capabilities(),
        rates: RateLimits {
            max_charge_w: 3000.0,
            max_discharge_w: 3000.0,
            min_rate_w: 100.0,
        },
        soc_bounds: SocBounds::default(),
        battery_capacity_kwh: 9.5,
    }
}

fn clock() -> Arc<FakeClock> {
    Arc::new(FakeClock::new(
        Utc.with_ymd_and_hms(2025, 10, 18, 13, 0, 0).unwrap(),
    ))
}

fn plan() -> SchedulePlan {
    SchedulePlan {
        charge_window: Some(ScheduleWindow::new(1560, 1770).with_rate(2500.0)),
        export_window: Some(ScheduleWindow::new(960, 1140)),
        target_soc: Some(90.0),
        reserve_soc: Some(10.0),
        charge_rate_w: Some(2500.0),
        discharge_rate_w: Some(3000.0),
    }
}

#[tokio::test]
async fn test_local_plan_converges_then_is_idempotent() {
    let host = MemoryHost::new();
    host.set("select.ge_charge_start_time_slot_1", "00:00:00");
    host.set("select.ge_charge_end_time_slot_1", "00:00:00");
    host.set("switch.ge_enable_charge_schedule", "off");
    host.set("select.ge_discharge_start_time_slot_1", "00:00:00");
    host.set("select.ge_discharge_end_time_slot_1", "00:00:00");
    host.set("select.ge_mode", "Eco");
    host.set("number.ge_target_soc", "100");
    host.set("number.ge_battery_power_reserve", "4");
    host.set("number.ge_battery_charge_rate", "3000");
    host.set("number.ge_battery_discharge_rate", "3000");
    host.set("select.ge_battery_pause_start_time_slot", "00:00:00");
    host.set("select.ge_battery_pause_end_time_slot", "00:00:00");

    let host_arc: Arc<dyn HostPlatform> = Arc::new(host.clone());
    let clock = clock();
    let engine = LocalWriteVerifyEngine::new(host_arc.clone(), clock.clone(), Duration::from_secs(5));
    let mut manager = ScheduleWindowManager::new(
        device(InverterType::GivEnergy),
        ControlChannel::Local {
            engine,
            entities: LocalEntityMap::for_prefix("ge", InverterType::GivEnergy),
        },
        host_arc,
        clock,
        Arc::new(ServiceCallDedup::new()),
        ManagerSettings::default(),
    )
    .unwrap();

    let report = manager.apply_plan(&plan()).await.unwrap();
    assert!(report.unverified.is_empty(), "{:?}", report.unverified);
    assert!(!report.degraded);

    assert_eq!(host.get("select.ge_charge_start_time_slot_1").as_deref(), Some("02:00:00"));
    assert_eq!(host.get("select.ge_charge_end_time_slot_1").as_deref(), Some("05:30:00"));
    assert_eq!(host.get("switch.ge_enable_charge_schedule").as_deref(), Some("on"));
    assert_eq!(host.get("select.ge_mode").as_deref(), Some("Timed Export"));
    assert_eq!(host.get("number.ge_target_soc").as_deref(), Some("90"));
    assert_eq!(host.get("number.ge_battery_power_reserve").as_deref(), Some("10"));
    assert_eq!(host.get("number.ge_battery_charge_rate").as_deref(), Some("2500"));
    // idle between now (13:00) and the export at 16:00 is shorter than 19:00..23:59
    assert_eq!(
        host.get("select.ge_battery_pause_start_time_slot").as_deref(),
        Some("19:00:00")
    );
    assert_eq!(
        host.get("select.ge_battery_pause_end_time_slot").as_deref(),
        Some("23:59:00")
    );

    host.clear_history();
    let report = manager.apply_plan(&plan()).await.unwrap();
    assert!(report.unverified.is_empty());
    assert_eq!(host.mutation_count(), 0);
    // one status line per pass
    assert_eq!(host.statuses().len(), 1);
}

#[derive(Debug, Default)]
struct RecordingCloud {
    schedule: Mutex<CloudSchedule>,
    writes: Mutex<Vec<CloudSchedule>>,
    reserve: Mutex<Option<f64>>,
}

#[async_trait]
impl CloudScheduleControl for RecordingCloud {
    async fn read_schedule(&self) -> Result<CloudSchedule> {
        Ok(self.schedule.lock().clone())
    }

    async fn write_schedule(&self, schedule: &CloudSchedule) -> Result<bool> {
        let mut current = self.schedule.lock();
        if *current == *schedule {
            return Ok(false);
        }
        *current = schedule.clone();
        self.writes.lock().push(schedule.clone());
        Ok(true)
    }

    async fn read_reserve(&self) -> Result<Option<f64>> {
        Ok(*self.reserve.lock())
    }

    async fn write_reserve(&self, soc: f64) -> Result<bool> {
        *self.reserve.lock() = Some(soc);
        Ok(true)
    }

    async fn device_time(&self) -> Result<Option<NaiveDateTime>> {
        Ok(None)
    }

    async fn refresh_telemetry(&self) -> Result<()> {
        Ok(())
    }

    async fn refresh_settings(&self) -> Result<Option<RateLimits>> {
        Ok(None)
    }

    fn write_count(&self) -> u64 {
        self.writes.lock().len() as u64
    }

    fn name(&self) -> &str {
        "recording"
    }
}

#[tokio::test]
async fn test_cloud_plan_merges_into_slot_one() {
    let host = MemoryHost::new();
    let cloud = Arc::new(RecordingCloud::default());
    let mut manager = ScheduleWindowManager::new(
        device(InverterType::SolisCloud),
        ControlChannel::Cloud(cloud.clone()),
        Arc::new(host.clone()),
        clock(),
        Arc::new(ServiceCallDedup::new()),
        ManagerSettings::default(),
    )
    .unwrap();

    manager.apply_plan(&plan()).await.unwrap();

    let schedule = cloud.schedule.lock().clone();
    let t = |h, m| NaiveTime::from_hms_opt(h, m, 0).unwrap();
    assert_eq!(schedule.charge, Some((t(2, 0), t(5, 30))));
    assert_eq!(schedule.discharge, Some((t(16, 0), t(19, 0))));
    assert_eq!(schedule.target_soc, Some(90.0));
    assert_eq!(schedule.charge_rate_w, 2500.0);
    assert_eq!(*cloud.reserve.lock(), Some(10.0));
    assert!(manager.health().write_count > 0);
    assert_eq!(manager.health().write_count, cloud.writes.lock().len() as u64);

    let writes_before = cloud.writes.lock().len();
    manager.apply_plan(&plan()).await.unwrap();
    assert_eq!(cloud.writes.lock().len(), writes_before);
}

#[test]
fn test_cloud_device_rejects_local_channel() {
    let host: Arc<dyn HostPlatform> = Arc::new(MemoryHost::new());
    let clock = clock();
    let result = ScheduleWindowManager::new(
        device(InverterType::SolisCloud),
        ControlChannel::Local {
            engine: LocalWriteVerifyEngine::new(host.clone(), clock.clone(), Duration::ZERO),
            entities: LocalEntityMap::default(),
        },
        host,
        clock,
        Arc::new(ServiceCallDedup::new()),
        ManagerSettings::default(),
    );
    assert!(result.unwrap_err().is_fatal());
}
