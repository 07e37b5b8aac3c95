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

use crate::schedule::{DueTiers, TickSchedule};
use fluxion_control::{Clock, ControlResult, PlanSource, ScheduleWindowManager};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Drives one device's manager through the polling tiers
pub struct DeviceTask {
    manager: ScheduleWindowManager,
    plans: Arc<dyn PlanSource>,
    schedule: TickSchedule,
    clock: Arc<dyn Clock>,
    read_only: bool,
}

impl std::fmt::Debug for DeviceTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceTask")
            .field("device", &self.manager.device().id)
            .field("plans", &self.plans.name())
            .field("schedule", &self.schedule)
            .field("read_only", &self.read_only)
            .finish_non_exhaustive()
    }
}

impl DeviceTask {
    pub fn new(
        manager: ScheduleWindowManager,
        plans: Arc<dyn PlanSource>,
        schedule: TickSchedule,
        clock: Arc<dyn Clock>,
        read_only: bool,
    ) -> Self {
        Self {
            manager,
            plans,
            schedule,
            clock,
            read_only,
        }
    }

    pub fn manager(&self) -> &ScheduleWindowManager {
        &self.manager
    }

    fn device_id(&self) -> &str {
        &self.manager.device().id
    }

    /// Run the due tiers; only fatal errors are returned
    pub async fn tick(&mut self, due: DueTiers) -> ControlResult<()> {
        if due.settings {
            let result = self.manager.refresh_settings().await;
            self.absorb("settings refresh", result)?;
        }

        if due.telemetry {
            let result = self.manager.refresh_telemetry().await;
            self.absorb("telemetry refresh", result)?;
            self.manager.publish_status().await;
        }

        if due.reconcile {
            let result = self.reconcile().await;
            let failed = result.is_err();
            self.absorb("reconcile", result)?;
            if failed {
                self.manager.publish_status().await;
            }
        }
        Ok(())
    }

    async fn reconcile(&mut self) -> ControlResult<()> {
        if self.read_only {
            self.manager.refresh_status().await?;
            self.manager.publish_status().await;
            debug!("👀 [{}] Read-only, skipping plan", self.device_id());
            return Ok(());
        }

        let device_id = self.device_id().to_owned();
        let plan = match self.plans.current_plan(&device_id).await {
            Ok(plan) => plan,
            Err(e) => {
                warn!(
                    "⚠️ [{}] Plan source '{}' failed: {:#}",
                    device_id,
                    self.plans.name(),
                    e
                );
                None
            }
        };

        match plan {
            Some(plan) => {
                let report = self.manager.apply_plan(&plan).await?;
                if !report.unverified.is_empty() {
                    warn!(
                        "⚠️ [{}] Unverified after retries: {}",
                        device_id,
                        report.unverified.join(", ")
                    );
                }
            }
            None => {
                self.manager.refresh_status().await?;
                self.manager.publish_status().await;
                debug!("💤 [{}] No plan, status refreshed", device_id);
            }
        }
        Ok(())
    }

    fn absorb(&self, what: &str, result: ControlResult<()>) -> ControlResult<()> {
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_fatal() => {
                error!("❌ [{}] {} failed: {}", self.device_id(), what, e);
                Err(e)
            }
            Err(e) => {
                warn!("⚠️ [{}] {} failed: {:#}", self.device_id(), what, e);
                Ok(())
            }
        }
    }

    /// Tick until shutdown is signalled or a fatal error stops the device
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> ControlResult<()> {
        info!(
            "🔋 [{}] Control loop started (tick {:?}, read-only: {})",
            self.device_id(),
            self.schedule.tick,
            self.read_only
        );

        let started = self.clock.now();
        let mut interval = tokio::time::interval(self.schedule.tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let elapsed = (self.clock.now() - started)
                        .to_std()
                        .unwrap_or(Duration::ZERO);
                    let due = self.schedule.due(elapsed);
                    if due.any() {
                        self.tick(due).await?;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("👋 [{}] Control loop stopped", self.device_id());
                        return Ok(());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SystemConfig;
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use fluxion_control::{
        ControlChannel, FakeClock, HostPlatform, LocalEntityMap, LocalWriteVerifyEngine,
        ManagerSettings, MemoryHost, ServiceCallDedup,
    };
    use fluxion_types::{
        Device, InverterType, RateLimits, SchedulePlan, ScheduleWindow, SocBounds,
    };

    #[derive(Debug)]
    struct FixedPlan(Option<SchedulePlan>);

    #[async_trait]
    impl PlanSource for FixedPlan {
        async fn current_plan(&self, _device_id: &str) -> Result<Option<SchedulePlan>> {
            Ok(self.0.clone())
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    fn seeded_host() -> MemoryHost {
        let host = MemoryHost::new();
        for (id, state) in [
            ("select.ge_charge_start_time_slot_1", "00:00:00"),
            ("select.ge_charge_end_time_slot_1", "00:00:00"),
            ("switch.ge_enable_charge_schedule", "off"),
            ("select.ge_discharge_start_time_slot_1", "00:00:00"),
            ("select.ge_discharge_end_time_slot_1", "00:00:00"),
            ("select.ge_mode", "Eco"),
            ("number.ge_target_soc", "100"),
            ("number.ge_battery_power_reserve", "4"),
            ("number.ge_battery_charge_rate", "3000"),
            ("number.ge_battery_discharge_rate", "3000"),
            ("select.ge_battery_pause_start_time_slot", "00:00:00"),
            ("select.ge_battery_pause_end_time_slot", "00:00:00"),
        ] {
            host.set(id, state);
        }
        host
    }

    fn task(host: &MemoryHost, plan: Option<SchedulePlan>, read_only: bool) -> DeviceTask {
        let host: Arc<dyn HostPlatform> = Arc::new(host.clone());
        let clock = Arc::new(FakeClock::new(
            Utc.with_ymd_and_hms(2025, 10, 18, 13, 0, 0).unwrap(),
        ));
        let device = Device {
            index: 0,
            id: "battery".to_owned(),
            inverter_type: InverterType::GivEnergy,
            capabilities: InverterType::GivEnergy.capabilities(),
            rates: RateLimits {
                max_charge_w: 3000.0,
                max_discharge_w: 3000.0,
                min_rate_w: 100.0,
            },
            soc_bounds: SocBounds::default(),
            battery_capacity_kwh: 9.5,
        };
        let engine = LocalWriteVerifyEngine::new(host.clone(), clock.clone(), Duration::from_secs(2));
        let manager = ScheduleWindowManager::new(
            device,
            ControlChannel::Local {
                engine,
                entities: LocalEntityMap::for_prefix("ge", InverterType::GivEnergy),
            },
            host,
            clock.clone(),
            Arc::new(ServiceCallDedup::new()),
            ManagerSettings::default(),
        )
        .unwrap();

        DeviceTask::new(
            manager,
            Arc::new(FixedPlan(plan)),
            TickSchedule::from_config(&SystemConfig::default()),
            clock,
            read_only,
        )
    }

    fn plan() -> SchedulePlan {
        SchedulePlan {
            charge_window: Some(ScheduleWindow::new(1560, 1770).with_rate(2500.0)),
            target_soc: Some(90.0),
            ..SchedulePlan::default()
        }
    }

    fn reconcile_only() -> DueTiers {
        DueTiers {
            reconcile: true,
            ..DueTiers::default()
        }
    }

    #[tokio::test]
    async fn test_reconcile_applies_plan() {
        let host = seeded_host();
        let mut task = task(&host, Some(plan()), false);

        task.tick(reconcile_only()).await.unwrap();

        assert_eq!(
            host.get("select.ge_charge_start_time_slot_1").as_deref(),
            Some("02:00:00")
        );
        assert_eq!(host.get("number.ge_target_soc").as_deref(), Some("90"));
    }

    #[tokio::test]
    async fn test_read_only_never_writes() {
        let host = seeded_host();
        let mut task = task(&host, Some(plan()), true);

        task.tick(DueTiers {
            telemetry: true,
            settings: true,
            reconcile: true,
        })
        .await
        .unwrap();

        assert!(host.writes().is_empty());
        assert!(host.invocations().is_empty());
        assert!(task.manager().observed().charge_window.is_some());
    }

    #[tokio::test]
    async fn test_no_plan_only_refreshes() {
        let host = seeded_host();
        let mut task = task(&host, None, false);

        task.tick(reconcile_only()).await.unwrap();

        assert_eq!(host.mutation_count(), 0);
        assert!(task.manager().observed().charge_window.is_some());
        assert_eq!(host.statuses().len(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_entity_keeps_device_running() {
        let host = seeded_host();
        host.set("select.ge_charge_start_time_slot_1", "unavailable");
        let mut task = task(&host, Some(plan()), false);

        task.tick(reconcile_only()).await.unwrap();
        assert_eq!(host.mutation_count(), 0);
        assert_eq!(host.statuses().last().map(|(_, degraded)| *degraded), Some(true));

        // integration back after a reload
        host.set("select.ge_charge_start_time_slot_1", "00:00:00");
        task.tick(reconcile_only()).await.unwrap();
        assert_eq!(
            host.get("select.ge_charge_start_time_slot_1").as_deref(),
            Some("02:00:00")
        );
    }

    #[tokio::test]
    async fn test_host_read_failure_is_not_fatal() {
        let host = seeded_host();
        host.mark_broken("select.ge_charge_end_time_slot_1");
        let mut task = task(&host, None, true);

        task.tick(reconcile_only()).await.unwrap();
        assert!(task.manager().health().is_degraded());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let host = seeded_host();
        let task = task(&host, None, true);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(task.run(rx));
        tx.send(true).unwrap();

        handle.await.unwrap().unwrap();
    }
}
