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

use anyhow::{Context, Result, bail};
use chrono_tz::Tz;
use fluxion_control::{
    ClockSkew, LocalEntityMap, ManagerSettings, RetryPolicy, ServiceHooks,
};
use fluxion_solis::{BackendSettings, DEFAULT_BASE_URL};
use fluxion_types::{
    ControlChannelKind, Device, InverterType, RateLimits, ScheduleVariant, SocBounds,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Application configuration loaded from `config.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub system: SystemConfig,

    #[serde(default)]
    pub home_assistant: HomeAssistantConfig,

    #[serde(default)]
    pub solis: SolisConfig,

    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Log level (trace, debug, info, warn, error); RUST_LOG wins when set
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// IANA timezone of the device clocks
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Poll but never write
    #[serde(default)]
    pub read_only: bool,

    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,

    #[serde(default = "default_telemetry_secs")]
    pub telemetry_secs: u64,

    #[serde(default = "default_settings_secs")]
    pub settings_secs: u64,

    #[serde(default = "default_reconcile_secs")]
    pub reconcile_secs: u64,

    /// `input_text` entity receiving every status line; degraded statuses
    /// become persistent notifications when unset
    #[serde(default)]
    pub status_entity: Option<String>,
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_timezone() -> String {
    "UTC".to_owned()
}

fn default_tick_secs() -> u64 {
    5
}

fn default_telemetry_secs() -> u64 {
    300
}

fn default_settings_secs() -> u64 {
    3600
}

fn default_reconcile_secs() -> u64 {
    60
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            timezone: default_timezone(),
            read_only: false,
            tick_secs: default_tick_secs(),
            telemetry_secs: default_telemetry_secs(),
            settings_secs: default_settings_secs(),
            reconcile_secs: default_reconcile_secs(),
            status_entity: None,
        }
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct HomeAssistantConfig {
    /// Defaults to the Supervisor API, then `http://localhost:8123`
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default)]
    pub token: Option<String>,
}

impl fmt::Debug for HomeAssistantConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HomeAssistantConfig")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

fn default_solis_url() -> String {
    DEFAULT_BASE_URL.to_owned()
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SolisConfig {
    #[serde(default = "default_solis_url")]
    pub base_url: String,

    #[serde(default)]
    pub key_id: Option<String>,

    #[serde(default)]
    pub secret: Option<String>,

    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for SolisConfig {
    fn default() -> Self {
        Self {
            base_url: default_solis_url(),
            key_id: None,
            secret: None,
            retry: RetryPolicy::cloud(),
        }
    }
}

impl fmt::Debug for SolisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SolisConfig")
            .field("base_url", &self.base_url)
            .field("key_id", &self.key_id)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("retry", &self.retry)
            .finish()
    }
}

impl SolisConfig {
    pub fn has_credentials(&self) -> bool {
        let set = |v: &Option<String>| v.as_ref().is_some_and(|s| !s.trim().is_empty());
        set(&self.key_id) && set(&self.secret)
    }
}

/// One physical inverter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub id: String,

    /// Accepts "vendor" too, as in the add-on options
    #[serde(alias = "vendor")]
    pub inverter_type: InverterType,

    /// Cloud serial number (cloud devices only)
    #[serde(default)]
    pub serial: Option<String>,

    /// Entity prefix of the local integration, e.g. "givtcp"
    #[serde(default)]
    pub entity_prefix: Option<String>,

    /// Individual entity ids overriding the prefix-derived defaults
    #[serde(default)]
    pub entities: LocalEntityMap,

    #[serde(default)]
    pub clock_skew: ClockSkew,

    pub max_charge_w: f64,
    pub max_discharge_w: f64,

    #[serde(default)]
    pub min_rate_w: f64,

    pub battery_capacity_kwh: f64,

    #[serde(default = "default_battery_voltage")]
    pub battery_voltage: f64,

    #[serde(default = "default_reserve_min")]
    pub reserve_min: f64,

    #[serde(default = "default_reserve_max")]
    pub reserve_max: f64,

    /// Overrides the inverter type's capability
    #[serde(default)]
    pub supports_midnight_windows: Option<bool>,

    /// Zero cloud schedule slots 2-6 on every write
    #[serde(default = "default_true")]
    pub force_disable_other_slots: bool,

    /// Cloud schedule layout to assume when the firmware does not tell
    #[serde(default)]
    pub default_variant: Option<ScheduleVariant>,

    /// Service hooks, including the restart action used on clock skew
    #[serde(default)]
    pub hooks: ServiceHooks,

    /// HA entity whose attributes carry this device's plan
    #[serde(default)]
    pub plan_entity: Option<String>,

    #[serde(default = "default_write_retries")]
    pub write_retries: u32,

    #[serde(default = "default_poll_delay_ms")]
    pub poll_delay_ms: u64,

    #[serde(default)]
    pub mode_idle: Option<String>,

    #[serde(default)]
    pub mode_export: Option<String>,
}

fn default_battery_voltage() -> f64 {
    52.0
}

fn default_reserve_min() -> f64 {
    4.0
}

fn default_reserve_max() -> f64 {
    100.0
}

fn default_true() -> bool {
    true
}

fn default_write_retries() -> u32 {
    3
}

fn default_poll_delay_ms() -> u64 {
    2000
}

impl DeviceConfig {
    pub fn is_cloud(&self) -> bool {
        self.inverter_type.capabilities().channel == ControlChannelKind::Cloud
    }

    pub fn to_device(&self, index: usize) -> Device {
        let mut capabilities = self.inverter_type.capabilities();
        if let Some(midnight) = self.supports_midnight_windows {
            capabilities.supports_midnight_windows = midnight;
        }

        Device {
            index,
            id: self.id.clone(),
            inverter_type: self.inverter_type,
            capabilities,
            rates: RateLimits {
                max_charge_w: self.max_charge_w,
                max_discharge_w: self.max_discharge_w,
                min_rate_w: self.min_rate_w,
            },
            soc_bounds: SocBounds {
                reserve_min: self.reserve_min,
                reserve_max: self.reserve_max,
            },
            battery_capacity_kwh: self.battery_capacity_kwh,
        }
    }

    /// Prefix-derived entity ids with the configured overrides applied
    pub fn entity_map(&self) -> LocalEntityMap {
        let base = match &self.entity_prefix {
            Some(prefix) => LocalEntityMap::for_prefix(prefix, self.inverter_type),
            None => LocalEntityMap::default(),
        };
        base.overlay(&self.entities)
    }

    pub fn manager_settings(&self, timezone: Tz) -> ManagerSettings {
        let defaults = ManagerSettings::default();
        ManagerSettings {
            timezone,
            skew: self.clock_skew,
            write_retries: self.write_retries,
            battery_voltage: self.battery_voltage,
            hooks: self.hooks.clone(),
            mode_idle: self.mode_idle.clone().unwrap_or(defaults.mode_idle),
            mode_export: self.mode_export.clone().unwrap_or(defaults.mode_export),
            ..defaults
        }
    }

    pub fn backend_settings(&self) -> BackendSettings {
        let defaults = BackendSettings::default();
        BackendSettings {
            default_variant: self.default_variant.unwrap_or(defaults.default_variant),
            force_disable_other_slots: self.force_disable_other_slots,
            battery_voltage: self.battery_voltage,
        }
    }

    pub fn poll_delay(&self) -> Duration {
        Duration::from_millis(self.poll_delay_ms)
    }
}

impl AppConfig {
    /// Read, apply environment overrides and validate
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut config = Self::from_toml(&text)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config.apply_env_overrides();
        config.validate()?;
        info!("✅ Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("HA_BASE_URL") {
            self.home_assistant.base_url = Some(url);
        }
        if let Ok(token) = std::env::var("HA_TOKEN")
            && !token.trim().is_empty()
        {
            self.home_assistant.token = Some(token);
        }
        if let Ok(key_id) = std::env::var("SOLIS_KEY_ID") {
            self.solis.key_id = Some(key_id);
        }
        if let Ok(secret) = std::env::var("SOLIS_SECRET") {
            self.solis.secret = Some(secret);
        }
    }

    pub fn timezone(&self) -> Result<Tz> {
        self.system
            .timezone
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!("Invalid timezone '{}': {}", self.system.timezone, e))
    }

    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.system.tick_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.devices.is_empty() {
            bail!("Configuration must include at least one device");
        }
        self.timezone()?;

        let tick = self.system.tick_secs;
        if tick == 0 {
            bail!("tick_secs must be at least 1");
        }
        for (name, secs) in [
            ("telemetry_secs", self.system.telemetry_secs),
            ("settings_secs", self.system.settings_secs),
            ("reconcile_secs", self.system.reconcile_secs),
        ] {
            if secs < tick {
                bail!("{} ({}s) is shorter than tick_secs ({}s)", name, secs, tick);
            }
        }

        let retry = &self.solis.retry;
        if !retry.factor.is_finite() || retry.factor < 1.0 {
            bail!("solis.retry.factor must be a finite number >= 1.0, got {}", retry.factor);
        }
        if retry.initial_delay_ms == 0 {
            bail!("solis.retry.initial_delay_ms must be at least 1");
        }

        let mut seen = HashSet::new();
        for (idx, device) in self.devices.iter().enumerate() {
            if device.id.trim().is_empty() {
                bail!("Device {} has empty ID", idx);
            }
            if !seen.insert(device.id.as_str()) {
                bail!("Duplicate device ID '{}'", device.id);
            }
            if device.battery_capacity_kwh <= 0.0 {
                bail!(
                    "Device '{}' battery capacity must be positive, got {} kWh",
                    device.id,
                    device.battery_capacity_kwh
                );
            }
            if device.min_rate_w > device.max_charge_w || device.min_rate_w > device.max_discharge_w {
                bail!(
                    "Device '{}' min rate {} W exceeds its max rate",
                    device.id,
                    device.min_rate_w
                );
            }
            if !(0.0..=100.0).contains(&device.reserve_min)
                || !(0.0..=100.0).contains(&device.reserve_max)
                || device.reserve_min > device.reserve_max
            {
                bail!(
                    "Device '{}' reserve bounds {}-{}% are invalid",
                    device.id,
                    device.reserve_min,
                    device.reserve_max
                );
            }

            if device.is_cloud() {
                if device.serial.as_ref().is_none_or(|s| s.trim().is_empty()) {
                    bail!("Cloud device '{}' has no serial", device.id);
                }
                if !self.solis.has_credentials() {
                    bail!(
                        "Cloud device '{}' needs [solis] key_id and secret (or SOLIS_KEY_ID/SOLIS_SECRET)",
                        device.id
                    );
                }
            } else if device.entity_map().charge_start.is_none() {
                bail!(
                    "Local device '{}' needs entity_prefix or an entities.charge_start override",
                    device.id
                );
            }
        }
        Ok(())
    }
}
