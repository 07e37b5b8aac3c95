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

use crate::clock::Clock;
use crate::dedup::{HookKind, ServiceCallDedup, ServiceHooks};
use crate::entities::LocalEntityMap;
use crate::errors::{ControlError, ControlResult};
use crate::host::{HostPlatform, HostValue, unit_multiplier};
use crate::traits::CloudScheduleControl;
use crate::windows::{
    ClockSkew, clamp_to_midnight, derive_idle_window, minutes_of, normalize_pair,
    normalize_window, skew_minutes, window_times,
};
use crate::write_verify::{DesiredValue, LocalWriteVerifyEngine};
use chrono::{DateTime, NaiveDateTime, NaiveTime};
use chrono_tz::Tz;
use fluxion_types::{
    Device, DeviceHealth, IdleWindow, RateLimits, SchedulePlan, ScheduleWindow, TimeFormat,
    WindowPair,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Tunables for one device's window manager
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub timezone: Tz,
    pub skew: ClockSkew,
    /// Skew at or above this many minutes is reported as degraded
    pub max_skew_minutes: i64,
    pub write_retries: u32,
    /// Tolerance for SOC comparisons, in percent
    pub soc_tolerance: f64,
    /// Nominal battery voltage for converting watts to amps
    pub battery_voltage: f64,
    pub hooks: ServiceHooks,
    /// Inverter mode option when no export is scheduled
    pub mode_idle: String,
    /// Inverter mode option during a scheduled export
    pub mode_export: String,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            timezone: Tz::UTC,
            skew: ClockSkew::default(),
            max_skew_minutes: 10,
            write_retries: 3,
            soc_tolerance: 1.0,
            battery_voltage: 52.0,
            hooks: ServiceHooks::default(),
            mode_idle: "Eco".to_owned(),
            mode_export: "Timed Export".to_owned(),
        }
    }
}

/// Where writes for a device go
pub enum ControlChannel {
    Local {
        engine: LocalWriteVerifyEngine,
        entities: LocalEntityMap,
    },
    Cloud(Arc<dyn CloudScheduleControl>),
}

impl std::fmt::Debug for ControlChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local { engine, .. } => f.debug_tuple("Local").field(engine).finish(),
            Self::Cloud(backend) => f.debug_tuple("Cloud").field(&backend.name()).finish(),
        }
    }
}

/// Device state as last observed, normalized for "now"
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservedState {
    pub charge_window: Option<WindowPair>,
    pub charge_enabled: bool,
    pub export_window: Option<WindowPair>,
    pub export_enabled: bool,
    pub target_soc: Option<f64>,
    pub reserve_soc: Option<f64>,
    pub charge_rate_w: Option<f64>,
    pub discharge_rate_w: Option<f64>,
    pub idle: Option<IdleWindow>,
    /// Device clock minus controller clock
    pub skew_minutes: Option<i64>,
}

/// Outcome of one reconcile pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Operations whose result could not be verified
    pub unverified: Vec<String>,
    pub degraded: bool,
}

impl ApplyReport {
    fn record(&mut self, what: &str, converged: bool) {
        if !converged {
            self.unverified.push(what.to_owned());
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Charge,
    Export,
}

impl Role {
    fn label(self) -> &'static str {
        match self {
            Self::Charge => "charge",
            Self::Export => "export",
        }
    }
}

/// Drives one device towards the desired charge/export windows
///
/// Every operation reads first and writes only on change, so calling it
/// again with the same arguments is free.
pub struct ScheduleWindowManager {
    device: Device,
    channel: ControlChannel,
    host: Arc<dyn HostPlatform>,
    clock: Arc<dyn Clock>,
    dedup: Arc<ServiceCallDedup>,
    settings: ManagerSettings,
    observed: ObservedState,
    refreshed: bool,
    health: DeviceHealth,
}

impl std::fmt::Debug for ScheduleWindowManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduleWindowManager")
            .field("device", &self.device.id)
            .field("channel", &self.channel)
            .field("observed", &self.observed)
            .finish_non_exhaustive()
    }
}

impl ScheduleWindowManager {
    /// Validate the device against its channel and build the manager
    pub fn new(
        device: Device,
        channel: ControlChannel,
        host: Arc<dyn HostPlatform>,
        clock: Arc<dyn Clock>,
        dedup: Arc<ServiceCallDedup>,
        settings: ManagerSettings,
    ) -> ControlResult<Self> {
        if device.battery_capacity_kwh <= 0.0 {
            return Err(ControlError::Configuration(format!(
                "{}: battery capacity must be positive, got {} kWh",
                device.id, device.battery_capacity_kwh
            )));
        }

        match &channel {
            ControlChannel::Local { entities, .. } => {
                if device.is_cloud() {
                    return Err(ControlError::Configuration(format!(
                        "{}: {} is a cloud device but was given a local channel",
                        device.id, device.inverter_type
                    )));
                }
                if entities.charge_start.is_none() || entities.charge_end.is_none() {
                    return Err(ControlError::Configuration(format!(
                        "{}: no source for the charge start/end time",
                        device.id
                    )));
                }
            }
            ControlChannel::Cloud(_) => {
                if !device.is_cloud() {
                    return Err(ControlError::Configuration(format!(
                        "{}: {} has no cloud channel",
                        device.id, device.inverter_type
                    )));
                }
            }
        }

        let health = DeviceHealth::new(device.id.clone(), clock.now());
        Ok(Self {
            device,
            channel,
            host,
            clock,
            dedup,
            settings,
            observed: ObservedState::default(),
            refreshed: false,
            health,
        })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn observed(&self) -> &ObservedState {
        &self.observed
    }

    pub fn health(&self) -> &DeviceHealth {
        &self.health
    }

    /// Replace the max rates with values read from the hardware; the configured minimum is kept
    pub fn update_rate_limits(&mut self, rates: RateLimits) {
        let rates = RateLimits {
            min_rate_w: self.device.rates.min_rate_w,
            ..rates
        };
        if rates != self.device.rates {
            info!(
                "🔧 [{}] Rate limits refreshed: charge {} W, discharge {} W",
                self.device.id, rates.max_charge_w, rates.max_discharge_w
            );
            self.device.rates = rates;
        }
    }

    fn now_local(&self) -> NaiveDateTime {
        self.clock
            .now()
            .with_timezone(&self.settings.timezone)
            .naive_local()
    }

    fn now_minute(&self) -> i64 {
        minutes_of(self.now_local().time())
    }

    fn write_count(&self) -> u64 {
        match &self.channel {
            ControlChannel::Local { engine, .. } => engine.write_count(),
            ControlChannel::Cloud(backend) => backend.write_count(),
        }
    }

    // ============= Local reads/writes =============

    async fn read_value(&self, id: &str) -> Option<HostValue> {
        match self.host.read_value(id).await {
            Ok(value) => value,
            Err(e) => {
                warn!("⚠️ [{}] Failed to read {}: {:#}", self.device.id, id, e);
                None
            }
        }
    }

    #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    async fn read_time(&self, id: &str) -> Option<NaiveTime> {
        match self.device.capabilities.time_format {
            TimeFormat::SplitHourMinute => {
                let hour = self.read_value(&format!("{id}_hour")).await?.as_f64()?;
                let minute = self.read_value(&format!("{id}_minute")).await?.as_f64()?;
                NaiveTime::from_hms_opt(hour as u32, minute as u32, 0)
            }
            TimeFormat::HoursMinutesSeconds | TimeFormat::Range => {
                self.read_value(id).await?.as_time()
            }
        }
    }

    /// Raw hardware start/end for a role, `None` when unavailable
    async fn read_local_times(
        &self,
        start_id: &str,
        end_id: Option<&str>,
    ) -> Option<(NaiveTime, NaiveTime)> {
        let start = self.read_time(start_id).await?;
        let end = self.read_time(end_id?).await?;
        Some((start, end))
    }

    async fn write_time(
        &self,
        engine: &LocalWriteVerifyEngine,
        name: &str,
        id: &str,
        time: NaiveTime,
    ) -> bool {
        let retries = self.settings.write_retries;
        match self.device.capabilities.time_format {
            TimeFormat::SplitHourMinute => {
                let hour = engine
                    .write_and_verify(
                        &format!("{name} hour"),
                        &format!("{id}_hour"),
                        &DesiredValue::Number(f64::from(chrono::Timelike::hour(&time))),
                        0.0,
                        retries,
                    )
                    .await;
                let minute = engine
                    .write_and_verify(
                        &format!("{name} minute"),
                        &format!("{id}_minute"),
                        &DesiredValue::Number(f64::from(chrono::Timelike::minute(&time))),
                        0.0,
                        retries,
                    )
                    .await;
                hour && minute
            }
            TimeFormat::HoursMinutesSeconds | TimeFormat::Range => {
                engine
                    .write_and_verify(name, id, &DesiredValue::Time(time), 0.0, retries)
                    .await
            }
        }
    }

    async fn write_local_times(
        &self,
        engine: &LocalWriteVerifyEngine,
        name: &str,
        start_id: &str,
        end_id: Option<&str>,
        (start, end): (NaiveTime, NaiveTime),
    ) -> bool {
        let Some(end_id) = end_id else {
            warn!("⚠️ [{}] {} has no end time entity", self.device.id, name);
            return false;
        };
        let start_ok = self
            .write_time(engine, &format!("{name} start"), start_id, start)
            .await;
        let end_ok = self
            .write_time(engine, &format!("{name} end"), end_id, end)
            .await;
        start_ok && end_ok
    }

    /// Rate entity value in watts, honouring percent, kW and amp units
    fn rate_from_host(&self, value: &HostValue, max_w: f64, percent: bool) -> Option<f64> {
        let raw = value.as_f64()?;
        if percent {
            return Some(raw * max_w / 100.0);
        }
        match value.unit.as_deref() {
            Some("A") => Some(raw * self.settings.battery_voltage),
            unit => Some(raw * unit_multiplier(unit)),
        }
    }

    /// Watt target and tolerance expressed in the entity's own unit
    fn rate_to_host(
        &self,
        rate_w: f64,
        tolerance_w: f64,
        current: Option<&HostValue>,
        max_w: f64,
        percent: bool,
    ) -> (f64, f64) {
        if percent {
            let scale = if max_w > 0.0 { 100.0 / max_w } else { 0.0 };
            return ((rate_w * scale).round(), (tolerance_w * scale).ceil());
        }
        match current.and_then(|v| v.unit.as_deref()) {
            Some("A") => {
                let volts = self.settings.battery_voltage;
                ((rate_w / volts).round(), (tolerance_w / volts).ceil())
            }
            unit => {
                let mult = unit_multiplier(unit);
                (rate_w / mult, tolerance_w / mult)
            }
        }
    }

    fn parse_device_time(&self, state: &str) -> Option<NaiveDateTime> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(state.trim()) {
            return Some(dt.with_timezone(&self.settings.timezone).naive_local());
        }
        ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%d/%m/%Y %H:%M:%S"]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(state.trim(), fmt).ok())
    }

    // ============= Status =============

    /// Re-read the device and normalize its windows for "now"
    ///
    /// A charge start/end that cannot be read right now (host down,
    /// entity unavailable) degrades the device and fails with a backend
    /// error; the next pass tries again.
    pub async fn refresh_status(&mut self) -> ControlResult<&ObservedState> {
        let now = self.now_local();
        let now_minute = minutes_of(now.time());
        let skew = self.settings.skew;
        let mut observed = ObservedState::default();
        let device_time;

        match &self.channel {
            ControlChannel::Local { entities, .. } => {
                let entities = entities.clone();
                let Some(charge_start) = entities.charge_start.as_deref() else {
                    return Err(ControlError::Configuration(format!(
                        "{}: no source for the charge start/end time",
                        self.device.id
                    )));
                };
                let Some((start, end)) = self
                    .read_local_times(charge_start, entities.charge_end.as_deref())
                    .await
                else {
                    let message = format!("charge start/end unavailable from {charge_start}");
                    warn!("⚠️ [{}] {}", self.device.id, message);
                    self.health.degrade(message.clone());
                    return Err(ControlError::Backend(anyhow::anyhow!(
                        "{}: {}",
                        self.device.id,
                        message
                    )));
                };
                let (start, end) = skew.from_hardware(start, end);
                let charge = normalize_pair(start, end, now_minute);
                let switch = entities
                    .charge_enable
                    .as_deref()
                    .filter(|_| self.device.capabilities.has_charge_enable_switch);
                observed.charge_enabled = if let Some(id) = switch {
                    self.read_value(id)
                        .await
                        .and_then(|v| v.as_bool())
                        .unwrap_or(false)
                } else {
                    !charge.current.is_zero_length()
                };
                observed.charge_window = Some(charge);

                if let Some(start_id) = &entities.discharge_start {
                    if let Some((start, end)) = self
                        .read_local_times(start_id, entities.discharge_end.as_deref())
                        .await
                    {
                        let (start, end) = skew.from_hardware(start, end);
                        let export = normalize_pair(start, end, now_minute);
                        observed.export_enabled = self.read_export_enabled(&entities, &export).await;
                        observed.export_window = Some(export);
                    }
                }

                if let Some(id) = &entities.target_soc {
                    observed.target_soc = self.read_value(id).await.and_then(|v| v.as_f64());
                }
                if let Some(id) = &entities.reserve {
                    observed.reserve_soc = self.read_value(id).await.and_then(|v| v.as_f64());
                }
                if let Some(id) = &entities.charge_rate {
                    observed.charge_rate_w = self.read_value(id).await.and_then(|v| {
                        self.rate_from_host(&v, self.device.rates.max_charge_w, entities.rate_is_percent)
                    });
                }
                if let Some(id) = &entities.discharge_rate {
                    observed.discharge_rate_w = self.read_value(id).await.and_then(|v| {
                        self.rate_from_host(
                            &v,
                            self.device.rates.max_discharge_w,
                            entities.rate_is_percent,
                        )
                    });
                }
                if let (Some(start_id), Some(end_id)) = (&entities.idle_start, &entities.idle_end) {
                    if let (Some(start), Some(end)) =
                        (self.read_time(start_id).await, self.read_time(end_id).await)
                    {
                        observed.idle = Some(IdleWindow { start, end });
                    }
                }

                device_time = match &entities.inverter_time {
                    Some(id) => self
                        .read_value(id)
                        .await
                        .and_then(|v| self.parse_device_time(&v.state)),
                    None => None,
                };
            }
            ControlChannel::Cloud(backend) => {
                let schedule = backend.read_schedule().await?;
                if let Some((start, end)) = schedule.charge {
                    let (start, end) = skew.from_hardware(start, end);
                    observed.charge_window = Some(normalize_pair(start, end, now_minute));
                    observed.charge_enabled = true;
                }
                if let Some((start, end)) = schedule.discharge {
                    let (start, end) = skew.from_hardware(start, end);
                    observed.export_window = Some(normalize_pair(start, end, now_minute));
                    observed.export_enabled = true;
                }
                observed.target_soc = schedule.target_soc;
                observed.charge_rate_w = Some(schedule.charge_rate_w);
                observed.discharge_rate_w = Some(schedule.discharge_rate_w);
                observed.reserve_soc = backend.read_reserve().await?;
                device_time = backend.device_time().await?;
            }
        }

        debug!(
            "🔍 [{}] charge {:?} (enabled {}), export {:?} (enabled {})",
            self.device.id,
            observed.charge_window.map(|p| p.current),
            observed.charge_enabled,
            observed.export_window.map(|p| p.current),
            observed.export_enabled
        );

        self.health = DeviceHealth::new(self.device.id.clone(), self.clock.now());
        self.observed = observed;
        self.refreshed = true;
        if let Some(device_time) = device_time {
            self.check_clock_skew(device_time, now).await;
        }
        Ok(&self.observed)
    }

    async fn read_export_enabled(&self, entities: &LocalEntityMap, export: &WindowPair) -> bool {
        if self.device.capabilities.has_discharge_enable_switch {
            if let Some(id) = &entities.discharge_enable {
                return self
                    .read_value(id)
                    .await
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
            }
        }
        if let Some(id) = &entities.inverter_mode {
            if let Some(mode) = self.read_value(id).await {
                return mode.state.trim() == self.settings.mode_export;
            }
        }
        !export.current.is_zero_length()
    }

    /// Compare the device clock with ours; large skew degrades the device and asks for a restart
    async fn check_clock_skew(&mut self, device_time: NaiveDateTime, now: NaiveDateTime) {
        let skew = skew_minutes(device_time, now);
        self.observed.skew_minutes = Some(skew);
        let restart_key = format!("{}/{}", self.device.id, HookKind::Restart.as_str());

        if skew.abs() < self.settings.max_skew_minutes {
            self.dedup.forget(&restart_key);
            return;
        }

        let message = format!(
            "{}: inverter clock is {} minutes off ({} vs {})",
            self.device.id,
            skew,
            device_time.format("%H:%M"),
            now.format("%H:%M")
        );
        warn!("⏰ [SKEW] {}", message);
        self.health.degrade(message.clone());
        if let Err(e) = self.host.publish_status(&message, true).await {
            warn!("⚠️ [{}] Failed to publish status: {:#}", self.device.id, e);
        }
        self.dedup
            .invoke_hook(
                self.host.as_ref(),
                &self.device.id,
                &self.settings.hooks,
                HookKind::Restart,
            )
            .await;
    }

    async fn ensure_status(&mut self) -> ControlResult<()> {
        if !self.refreshed {
            self.refresh_status().await?;
        }
        Ok(())
    }

    // ============= Windows =============

    fn desired_times(&self, window: &ScheduleWindow) -> (NaiveTime, NaiveTime) {
        if self.device.capabilities.supports_midnight_windows {
            window_times(window)
        } else {
            let clamped = clamp_to_midnight(window);
            if clamped.end_minute != window.end_minute {
                debug!(
                    "🌙 [{}] Window {}..{} clamped to 23:59",
                    self.device.id, window.start_minute, window.end_minute
                );
            }
            window_times(&clamped)
        }
    }

    fn role_state(&self, role: Role) -> (Option<WindowPair>, bool) {
        match role {
            Role::Charge => (self.observed.charge_window, self.observed.charge_enabled),
            Role::Export => (self.observed.export_window, self.observed.export_enabled),
        }
    }

    fn set_role_state(&mut self, role: Role, window: Option<WindowPair>, enabled: bool) {
        match role {
            Role::Charge => {
                self.observed.charge_window = window;
                self.observed.charge_enabled = enabled;
            }
            Role::Export => {
                self.observed.export_window = window;
                self.observed.export_enabled = enabled;
            }
        }
    }

    async fn enable_local_role(
        &self,
        engine: &LocalWriteVerifyEngine,
        entities: &LocalEntityMap,
        role: Role,
        enabled: bool,
    ) -> bool {
        let caps = &self.device.capabilities;
        let retries = self.settings.write_retries;
        let switch = match role {
            Role::Charge if caps.has_charge_enable_switch => entities.charge_enable.as_deref(),
            Role::Export if caps.has_discharge_enable_switch => entities.discharge_enable.as_deref(),
            Role::Charge | Role::Export => None,
        };
        if let Some(id) = switch {
            let name = format!("{} enable", role.label());
            return engine
                .write_and_verify(&name, id, &DesiredValue::Bool(enabled), 0.0, retries)
                .await;
        }
        if role == Role::Export {
            if let Some(id) = &entities.inverter_mode {
                let mode = if enabled {
                    &self.settings.mode_export
                } else {
                    &self.settings.mode_idle
                };
                return engine
                    .write_and_verify(
                        "inverter mode",
                        id,
                        &DesiredValue::Text(mode.clone()),
                        0.0,
                        retries,
                    )
                    .await;
            }
        }
        true
    }

    async fn adjust_window(&mut self, role: Role, window: &ScheduleWindow) -> ControlResult<bool> {
        self.ensure_status().await?;
        let now_minute = self.now_minute();
        let (start, end) = self.desired_times(window);
        let desired = normalize_window(start, end, now_minute);

        let (current, enabled) = self.role_state(role);
        if enabled && current.is_some_and(|p| p.current.same_span(&desired)) {
            debug!(
                "✓ [{}] {} window already {}-{}",
                self.device.id,
                role.label(),
                start.format("%H:%M"),
                end.format("%H:%M")
            );
            return Ok(true);
        }

        info!(
            "🕐 [{}] Setting {} window {}-{}",
            self.device.id,
            role.label(),
            start.format("%H:%M"),
            end.format("%H:%M")
        );
        let hardware = self.settings.skew.to_hardware(start, end);

        let converged = match &self.channel {
            ControlChannel::Local { engine, entities } => {
                let (start_id, end_id) = match role {
                    Role::Charge => (&entities.charge_start, &entities.charge_end),
                    Role::Export => (&entities.discharge_start, &entities.discharge_end),
                };
                let Some(start_id) = start_id else {
                    warn!(
                        "⚠️ [{}] No {} window entities configured",
                        self.device.id,
                        role.label()
                    );
                    return Ok(false);
                };
                let times_ok = self
                    .write_local_times(engine, role.label(), start_id, end_id.as_deref(), hardware)
                    .await;
                let enable_ok = self.enable_local_role(engine, entities, role, true).await;
                times_ok && enable_ok
            }
            ControlChannel::Cloud(backend) => {
                let mut schedule = backend.read_schedule().await?;
                let rates = &self.device.rates;
                match role {
                    Role::Charge => {
                        schedule.charge = Some(hardware);
                        if window.average_rate > 0.0 {
                            schedule.charge_rate_w = rates.clamp_charge(window.average_rate);
                        }
                    }
                    Role::Export => {
                        schedule.discharge = Some(hardware);
                        if window.average_rate > 0.0 {
                            schedule.discharge_rate_w = rates.clamp_discharge(window.average_rate);
                        }
                    }
                }
                backend.write_schedule(&schedule).await?;
                true
            }
        };

        self.set_role_state(role, Some(WindowPair::new(desired)), converged);
        let hook = match role {
            Role::Charge => HookKind::ChargeStart,
            Role::Export => HookKind::ExportStart,
        };
        self.fire_hook(hook).await;
        Ok(converged)
    }

    async fn disable_window(&mut self, role: Role) -> ControlResult<bool> {
        self.ensure_status().await?;
        let (current, enabled) = self.role_state(role);
        if !enabled {
            debug!("✓ [{}] {} already disabled", self.device.id, role.label());
            return Ok(true);
        }

        info!("🛑 [{}] Disabling {} window", self.device.id, role.label());
        let caps = self.device.capabilities;
        let mut window_after = current;

        let converged = match &self.channel {
            ControlChannel::Local { engine, entities } => {
                let has_switch = match role {
                    Role::Charge => caps.has_charge_enable_switch && entities.charge_enable.is_some(),
                    Role::Export => {
                        (caps.has_discharge_enable_switch && entities.discharge_enable.is_some())
                            || entities.inverter_mode.is_some()
                    }
                };
                if has_switch {
                    self.enable_local_role(engine, entities, role, false).await
                } else {
                    // zero-length window is the only "off" these devices understand
                    let (start_id, end_id) = match role {
                        Role::Charge => (&entities.charge_start, &entities.charge_end),
                        Role::Export => (&entities.discharge_start, &entities.discharge_end),
                    };
                    let Some(start_id) = start_id else {
                        return Ok(true);
                    };
                    let zero = NaiveTime::MIN;
                    window_after = Some(WindowPair::new(ScheduleWindow::new(0, 0)));
                    self.write_local_times(
                        engine,
                        role.label(),
                        start_id,
                        end_id.as_deref(),
                        (zero, zero),
                    )
                    .await
                }
            }
            ControlChannel::Cloud(backend) => {
                let mut schedule = backend.read_schedule().await?;
                match role {
                    Role::Charge => schedule.charge = None,
                    Role::Export => schedule.discharge = None,
                }
                backend.write_schedule(&schedule).await?;
                true
            }
        };

        self.set_role_state(role, window_after, !converged);
        let hook = match role {
            Role::Charge => HookKind::ChargeStop,
            Role::Export => HookKind::ExportStop,
        };
        self.fire_hook(hook).await;
        Ok(converged)
    }

    async fn fire_hook(&self, kind: HookKind) {
        self.dedup
            .invoke_hook(self.host.as_ref(), &self.device.id, &self.settings.hooks, kind)
            .await;
    }

    pub async fn adjust_charge_window(&mut self, window: &ScheduleWindow) -> ControlResult<bool> {
        self.adjust_window(Role::Charge, window).await
    }

    pub async fn disable_charge_window(&mut self) -> ControlResult<bool> {
        self.disable_window(Role::Charge).await
    }

    pub async fn adjust_export_window(&mut self, window: &ScheduleWindow) -> ControlResult<bool> {
        self.adjust_window(Role::Export, window).await
    }

    pub async fn disable_export_window(&mut self) -> ControlResult<bool> {
        self.disable_window(Role::Export).await
    }

    // ============= SOC and rates =============

    /// Set the charge target SOC (percent)
    pub async fn adjust_battery_target(&mut self, soc: f64) -> ControlResult<bool> {
        if !self.device.capabilities.has_target_soc {
            debug!("[{}] No target SOC support, skipping", self.device.id);
            return Ok(true);
        }
        self.ensure_status().await?;
        let soc = soc.clamp(0.0, 100.0).round();
        let tolerance = self.settings.soc_tolerance;
        if self
            .observed
            .target_soc
            .is_some_and(|current| (current - soc).abs() <= tolerance)
        {
            return Ok(true);
        }

        info!("🔋 [{}] Setting target SOC {}%", self.device.id, soc);
        let converged = match &self.channel {
            ControlChannel::Local { engine, entities } => match &entities.target_soc {
                Some(id) => {
                    engine
                        .write_and_verify(
                            "target soc",
                            id,
                            &DesiredValue::Number(soc),
                            tolerance,
                            self.settings.write_retries,
                        )
                        .await
                }
                None => return Ok(true),
            },
            ControlChannel::Cloud(backend) => {
                let mut schedule = backend.read_schedule().await?;
                schedule.target_soc = Some(soc);
                backend.write_schedule(&schedule).await?;
                true
            }
        };
        if converged {
            self.observed.target_soc = Some(soc);
        }
        Ok(converged)
    }

    /// Set the discharge reserve SOC (percent), clamped into the device bounds
    pub async fn adjust_reserve(&mut self, soc: f64) -> ControlResult<bool> {
        if !self.device.capabilities.has_reserve {
            return Ok(true);
        }
        self.ensure_status().await?;
        let soc = self.device.soc_bounds.clamp_reserve(soc).round();
        let tolerance = self.settings.soc_tolerance;
        if self
            .observed
            .reserve_soc
            .is_some_and(|current| (current - soc).abs() <= tolerance)
        {
            return Ok(true);
        }

        info!("🔋 [{}] Setting reserve {}%", self.device.id, soc);
        let converged = match &self.channel {
            ControlChannel::Local { engine, entities } => match &entities.reserve {
                Some(id) => {
                    engine
                        .write_and_verify(
                            "reserve",
                            id,
                            &DesiredValue::Number(soc),
                            tolerance,
                            self.settings.write_retries,
                        )
                        .await
                }
                None => return Ok(true),
            },
            ControlChannel::Cloud(backend) => {
                backend.write_reserve(soc).await?;
                true
            }
        };
        if converged {
            self.observed.reserve_soc = Some(soc);
        }
        Ok(converged)
    }

    pub async fn adjust_charge_rate(&mut self, rate_w: f64) -> ControlResult<bool> {
        self.adjust_rate(Role::Charge, rate_w).await
    }

    pub async fn adjust_discharge_rate(&mut self, rate_w: f64) -> ControlResult<bool> {
        self.adjust_rate(Role::Export, rate_w).await
    }

    async fn adjust_rate(&mut self, role: Role, rate_w: f64) -> ControlResult<bool> {
        self.ensure_status().await?;
        let rates = self.device.rates;
        let (rate_w, max_w, current) = match role {
            Role::Charge => (
                rates.clamp_charge(rate_w),
                rates.max_charge_w,
                self.observed.charge_rate_w,
            ),
            Role::Export => (
                rates.clamp_discharge(rate_w),
                rates.max_discharge_w,
                self.observed.discharge_rate_w,
            ),
        };
        let tolerance = rates.tolerance_w();
        if current.is_some_and(|c| (c - rate_w).abs() <= tolerance) {
            return Ok(true);
        }

        info!(
            "⚡ [{}] Setting {} rate {:.0} W",
            self.device.id,
            role.label(),
            rate_w
        );
        let converged = match &self.channel {
            ControlChannel::Local { engine, entities } => {
                let id = match role {
                    Role::Charge => &entities.charge_rate,
                    Role::Export => &entities.discharge_rate,
                };
                let Some(id) = id else {
                    return Ok(true);
                };
                let current = self.read_value(id).await;
                let (value, tol) = self.rate_to_host(
                    rate_w,
                    tolerance,
                    current.as_ref(),
                    max_w,
                    entities.rate_is_percent,
                );
                engine
                    .write_and_verify(
                        &format!("{} rate", role.label()),
                        id,
                        &DesiredValue::Number(value),
                        tol,
                        self.settings.write_retries,
                    )
                    .await
            }
            ControlChannel::Cloud(backend) => {
                let mut schedule = backend.read_schedule().await?;
                match role {
                    Role::Charge => schedule.charge_rate_w = rate_w,
                    Role::Export => schedule.discharge_rate_w = rate_w,
                }
                backend.write_schedule(&schedule).await?;
                true
            }
        };
        if converged {
            match role {
                Role::Charge => self.observed.charge_rate_w = Some(rate_w),
                Role::Export => self.observed.discharge_rate_w = Some(rate_w),
            }
        }
        Ok(converged)
    }

    /// Write the idle (battery pause) window derived from the active windows
    pub async fn adjust_idle_time(&mut self) -> ControlResult<bool> {
        if !self.device.capabilities.has_timed_pause {
            return Ok(true);
        }
        self.ensure_status().await?;
        let now_minute = self.now_minute();
        let charge = self
            .observed
            .charge_enabled
            .then_some(self.observed.charge_window)
            .flatten()
            .map(|p| p.current);
        let export = self
            .observed
            .export_enabled
            .then_some(self.observed.export_window)
            .flatten()
            .map(|p| p.current);
        let idle = derive_idle_window(charge.as_ref(), export.as_ref(), now_minute);

        if self.observed.idle == Some(idle) {
            return Ok(true);
        }

        let ControlChannel::Local { engine, entities } = &self.channel else {
            return Ok(true);
        };
        let (Some(start_id), Some(end_id)) = (&entities.idle_start, &entities.idle_end) else {
            return Ok(true);
        };

        info!(
            "⏸️ [{}] Setting idle window {}-{}",
            self.device.id,
            idle.start.format("%H:%M"),
            idle.end.format("%H:%M")
        );
        let start_ok = self.write_time(engine, "idle start", start_id, idle.start).await;
        let end_ok = self.write_time(engine, "idle end", end_id, idle.end).await;
        let converged = start_ok && end_ok;
        if converged {
            self.observed.idle = Some(idle);
        }
        Ok(converged)
    }

    // ============= Reconcile =============

    /// Drive the device towards `plan` and publish the resulting status
    pub async fn apply_plan(&mut self, plan: &SchedulePlan) -> ControlResult<ApplyReport> {
        self.refresh_status().await?;
        let mut report = ApplyReport::default();

        let converged = match &plan.charge_window {
            Some(window) => self.adjust_charge_window(window).await?,
            None => self.disable_charge_window().await?,
        };
        report.record("charge window", converged);

        let converged = match &plan.export_window {
            Some(window) => self.adjust_export_window(window).await?,
            None => self.disable_export_window().await?,
        };
        report.record("export window", converged);

        if let Some(soc) = plan.target_soc {
            let converged = self.adjust_battery_target(soc).await?;
            report.record("target soc", converged);
        }
        if let Some(soc) = plan.reserve_soc {
            let converged = self.adjust_reserve(soc).await?;
            report.record("reserve", converged);
        }
        if let Some(rate) = plan.charge_rate_w {
            let converged = self.adjust_charge_rate(rate).await?;
            report.record("charge rate", converged);
        }
        if let Some(rate) = plan.discharge_rate_w {
            let converged = self.adjust_discharge_rate(rate).await?;
            report.record("discharge rate", converged);
        }
        let converged = self.adjust_idle_time().await?;
        report.record("idle window", converged);

        for what in &report.unverified {
            self.health.degrade(format!("{what} not verified"));
        }
        self.health.write_count = self.write_count();
        report.degraded = self.health.is_degraded();
        self.publish_status().await;
        Ok(report)
    }

    /// Publish the current health summary to the host
    pub async fn publish_status(&self) {
        let summary = self.health.summary();
        if let Err(e) = self
            .host
            .publish_status(&summary, self.health.is_degraded())
            .await
        {
            warn!("⚠️ [{}] Failed to publish status: {:#}", self.device.id, e);
        }
    }

    /// Poll live telemetry (cloud devices only; local values are read on refresh)
    pub async fn refresh_telemetry(&self) -> ControlResult<()> {
        if let ControlChannel::Cloud(backend) = &self.channel {
            backend.refresh_telemetry().await?;
        }
        Ok(())
    }

    /// Poll slow settings; rate limits read from the hardware replace the configured ones
    pub async fn refresh_settings(&mut self) -> ControlResult<()> {
        if let ControlChannel::Cloud(backend) = &self.channel {
            if let Some(rates) = backend.refresh_settings().await? {
                self.update_rate_limits(rates);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::memory::MemoryHost;
    use chrono::{TimeZone, Utc};
    use fluxion_types::{InverterType, SocBounds};
    use std::time::Duration;

    fn device(inverter_type: InverterType) -> Device {
        Device {
            index: 0,
            id: "inv1".to_owned(),
            inverter_type,
            capabilities: inverter_type.capabilities(),
            rates: RateLimits {
                max_charge_w: 5000.0,
                max_discharge_w: 5000.0,
                min_rate_w: 100.0,
            },
            soc_bounds: SocBounds::default(),
            battery_capacity_kwh: 9.5,
        }
    }

    fn manager(host: &MemoryHost, inverter_type: InverterType, hour: u32) -> ScheduleWindowManager {
        let clock = Arc::new(FakeClock::new(
            Utc.with_ymd_and_hms(2025, 10, 18, hour, 0, 0).unwrap(),
        ));
        let host: Arc<dyn HostPlatform> = Arc::new(host.clone());
        let engine = LocalWriteVerifyEngine::new(host.clone(), clock.clone(), Duration::from_secs(1));
        ScheduleWindowManager::new(
            device(inverter_type),
            ControlChannel::Local {
                engine,
                entities: LocalEntityMap::for_prefix("inv", inverter_type),
            },
            host,
            clock,
            Arc::new(ServiceCallDedup::new()),
            ManagerSettings::default(),
        )
        .unwrap()
    }

    fn seed_givenergy(host: &MemoryHost) {
        host.set("select.inv_charge_start_time_slot_1", "23:00:00");
        host.set("select.inv_charge_end_time_slot_1", "05:00:00");
        host.set("switch.inv_enable_charge_schedule", "on");
        host.set("select.inv_discharge_start_time_slot_1", "00:00:00");
        host.set("select.inv_discharge_end_time_slot_1", "00:00:00");
        host.set("select.inv_mode", "Eco");
        host.set("number.inv_target_soc", "100");
        host.set("number.inv_battery_power_reserve", "4");
        host.set("number.inv_battery_charge_rate", "2600");
        host.set("number.inv_battery_discharge_rate", "2600");
    }

    #[tokio::test]
    async fn test_refresh_normalizes_overnight_window() {
        let host = MemoryHost::new();
        seed_givenergy(&host);
        let mut mgr = manager(&host, InverterType::GivEnergy, 22);

        let observed = mgr.refresh_status().await.unwrap().clone();
        let charge = observed.charge_window.unwrap();
        assert_eq!((charge.current.start_minute, charge.current.end_minute), (1380, 1740));
        assert!(observed.charge_enabled);
        assert!(!observed.export_enabled);
        assert_eq!(observed.target_soc, Some(100.0));
    }

    #[tokio::test]
    async fn test_unreadable_times_degrade_without_failing_hard() {
        let host = MemoryHost::new();
        let mut mgr = manager(&host, InverterType::GivEnergy, 12);

        let err = mgr.refresh_status().await.unwrap_err();
        assert!(!err.is_fatal());
        assert!(mgr.health().is_degraded());
    }

    #[tokio::test]
    async fn test_unavailable_then_recovered_entity() {
        let host = MemoryHost::new();
        seed_givenergy(&host);
        host.set("select.inv_charge_start_time_slot_1", "unavailable");
        let mut mgr = manager(&host, InverterType::GivEnergy, 22);

        let err = mgr.refresh_status().await.unwrap_err();
        assert!(matches!(err, ControlError::Backend(_)));

        host.set("select.inv_charge_start_time_slot_1", "23:00:00");
        mgr.refresh_status().await.unwrap();
        assert!(!mgr.health().is_degraded());

        host.mark_broken("select.inv_charge_end_time_slot_1");
        assert!(!mgr.refresh_status().await.unwrap_err().is_fatal());
    }

    #[tokio::test]
    async fn test_clock_skew_applied_on_write_and_removed_on_read() {
        let host = MemoryHost::new();
        seed_givenergy(&host);
        host.set("select.inv_charge_start_time_slot_1", "00:00:00");
        host.set("select.inv_charge_end_time_slot_1", "00:00:00");
        let clock = Arc::new(FakeClock::new(
            Utc.with_ymd_and_hms(2025, 10, 18, 13, 0, 0).unwrap(),
        ));
        let host_arc: Arc<dyn HostPlatform> = Arc::new(host.clone());
        let engine =
            LocalWriteVerifyEngine::new(host_arc.clone(), clock.clone(), Duration::from_secs(1));
        let mut mgr = ScheduleWindowManager::new(
            device(InverterType::GivEnergy),
            ControlChannel::Local {
                engine,
                entities: LocalEntityMap::for_prefix("inv", InverterType::GivEnergy),
            },
            host_arc,
            clock,
            Arc::new(ServiceCallDedup::new()),
            ManagerSettings {
                skew: ClockSkew {
                    start_secs: 120,
                    end_secs: -60,
                },
                ..ManagerSettings::default()
            },
        )
        .unwrap();
        mgr.refresh_status().await.unwrap();

        // 02:00-05:30 tomorrow
        let window = ScheduleWindow::new(1560, 1770);
        assert!(mgr.adjust_charge_window(&window).await.unwrap());
        assert_eq!(
            host.get("select.inv_charge_start_time_slot_1").as_deref(),
            Some("02:02:00")
        );
        assert_eq!(
            host.get("select.inv_charge_end_time_slot_1").as_deref(),
            Some("05:29:00")
        );

        let observed = mgr.refresh_status().await.unwrap().clone();
        let charge = observed.charge_window.unwrap().current;
        assert_eq!((charge.start_minute, charge.end_minute), (1560, 1770));

        host.clear_history();
        assert!(mgr.adjust_charge_window(&window).await.unwrap());
        assert_eq!(host.mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_unchanged_window_issues_no_writes() {
        let host = MemoryHost::new();
        seed_givenergy(&host);
        let mut mgr = manager(&host, InverterType::GivEnergy, 22);
        mgr.refresh_status().await.unwrap();

        let converged = mgr
            .adjust_charge_window(&ScheduleWindow::new(1380, 1740))
            .await
            .unwrap();

        assert!(converged);
        assert_eq!(host.mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_adjust_charge_window_writes_times() {
        let host = MemoryHost::new();
        seed_givenergy(&host);
        let mut mgr = manager(&host, InverterType::GivEnergy, 12);

        assert!(
            mgr.adjust_charge_window(&ScheduleWindow::new(120, 330))
                .await
                .unwrap()
        );

        assert_eq!(
            host.get("select.inv_charge_start_time_slot_1").as_deref(),
            Some("02:00:00")
        );
        assert_eq!(
            host.get("select.inv_charge_end_time_slot_1").as_deref(),
            Some("05:30:00")
        );
        // switch already on
        assert!(host.invocations().is_empty());
    }

    #[tokio::test]
    async fn test_midnight_clamp_on_solax_ultra() {
        let host = MemoryHost::new();
        host.set("number.inv_charger_start_time_1_hour", "0");
        host.set("number.inv_charger_start_time_1_minute", "0");
        host.set("number.inv_charger_end_time_1_hour", "0");
        host.set("number.inv_charger_end_time_1_minute", "0");
        let mut mgr = manager(&host, InverterType::SolaxUltra, 12);

        mgr.adjust_charge_window(&ScheduleWindow::new(1380, 1740))
            .await
            .unwrap();

        assert_eq!(host.get("number.inv_charger_start_time_1_hour").as_deref(), Some("23"));
        assert_eq!(host.get("number.inv_charger_end_time_1_hour").as_deref(), Some("23"));
        assert_eq!(
            host.get("number.inv_charger_end_time_1_minute").as_deref(),
            Some("59")
        );
    }

    #[tokio::test]
    async fn test_disable_without_switch_writes_zero_window() {
        let host = MemoryHost::new();
        host.set("number.inv_charger_start_time_1_hour", "2");
        host.set("number.inv_charger_start_time_1_minute", "0");
        host.set("number.inv_charger_end_time_1_hour", "5");
        host.set("number.inv_charger_end_time_1_minute", "30");
        let mut mgr = manager(&host, InverterType::Solax, 1);

        mgr.refresh_status().await.unwrap();
        assert!(mgr.observed().charge_enabled);

        assert!(mgr.disable_charge_window().await.unwrap());
        assert_eq!(host.get("number.inv_charger_start_time_1_hour").as_deref(), Some("0"));
        assert_eq!(host.get("number.inv_charger_end_time_1_hour").as_deref(), Some("0"));
        assert_eq!(host.get("number.inv_charger_end_time_1_minute").as_deref(), Some("0"));
        assert!(!mgr.observed().charge_enabled);
    }

    #[tokio::test]
    async fn test_export_uses_inverter_mode() {
        let host = MemoryHost::new();
        seed_givenergy(&host);
        let mut mgr = manager(&host, InverterType::GivEnergy, 12);

        mgr.adjust_export_window(&ScheduleWindow::new(960, 1140))
            .await
            .unwrap();
        assert_eq!(host.get("select.inv_mode").as_deref(), Some("Timed Export"));

        mgr.disable_export_window().await.unwrap();
        assert_eq!(host.get("select.inv_mode").as_deref(), Some("Eco"));
    }

    #[tokio::test]
    async fn test_clock_skew_degrades_and_restarts_once() {
        let host = MemoryHost::new();
        seed_givenergy(&host);
        host.set("sensor.inv_invertor_time", "2025-10-18 12:15:00");
        let mut mgr = manager(&host, InverterType::GivEnergy, 12);
        mgr.settings.hooks.restart = Some(crate::dedup::ServiceHook {
            action: "button.press".to_owned(),
            data: serde_json::json!({"entity_id": "button.inv_restart"}),
        });

        mgr.refresh_status().await.unwrap();
        mgr.refresh_status().await.unwrap();

        assert_eq!(mgr.observed().skew_minutes, Some(15));
        assert!(mgr.health().is_degraded());
        let restarts = host
            .invocations()
            .into_iter()
            .filter(|c| c.action == "button.press")
            .count();
        assert_eq!(restarts, 1);
        assert!(host.statuses().iter().all(|(_, degraded)| *degraded));
    }

    #[tokio::test]
    async fn test_rate_within_tolerance_skipped() {
        let host = MemoryHost::new();
        seed_givenergy(&host);
        let mut mgr = manager(&host, InverterType::GivEnergy, 12);
        mgr.refresh_status().await.unwrap();

        // tolerance is 5000 / 25 = 200 W
        assert!(mgr.adjust_charge_rate(2700.0).await.unwrap());
        assert!(host.writes().is_empty());

        assert!(mgr.adjust_charge_rate(4000.0).await.unwrap());
        assert_eq!(
            host.get("number.inv_battery_charge_rate").as_deref(),
            Some("4000")
        );
    }

    #[tokio::test]
    async fn test_rate_written_in_kw_when_entity_reports_kw() {
        let host = MemoryHost::new();
        seed_givenergy(&host);
        host.set_with_unit("number.inv_battery_discharge_rate", "2.6", "kW");
        let mut mgr = manager(&host, InverterType::GivEnergy, 12);
        mgr.refresh_status().await.unwrap();
        assert_eq!(mgr.observed().discharge_rate_w, Some(2600.0));

        mgr.adjust_discharge_rate(3500.0).await.unwrap();
        assert_eq!(
            host.get("number.inv_battery_discharge_rate").as_deref(),
            Some("3.5")
        );
    }

    #[tokio::test]
    async fn test_reserve_clamped_to_bounds() {
        let host = MemoryHost::new();
        seed_givenergy(&host);
        let mut mgr = manager(&host, InverterType::GivEnergy, 12);

        mgr.adjust_reserve(1.0).await.unwrap();
        assert!(host.writes().is_empty());

        mgr.adjust_reserve(20.0).await.unwrap();
        assert_eq!(
            host.get("number.inv_battery_power_reserve").as_deref(),
            Some("20")
        );
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let host = MemoryHost::new();
        let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(Utc::now()));
        let host_arc: Arc<dyn HostPlatform> = Arc::new(host);
        let mut dev = device(InverterType::GivEnergy);
        dev.battery_capacity_kwh = 0.0;
        let result = ScheduleWindowManager::new(
            dev,
            ControlChannel::Local {
                engine: LocalWriteVerifyEngine::new(host_arc.clone(), clock.clone(), Duration::ZERO),
                entities: LocalEntityMap::for_prefix("inv", InverterType::GivEnergy),
            },
            host_arc,
            clock,
            Arc::new(ServiceCallDedup::new()),
            ManagerSettings::default(),
        );
        assert!(matches!(result, Err(ControlError::Configuration(_))));
    }
}
