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
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============= Inverter Type Enum =============

/// Supported inverter types
/// Each type maps to a fixed capability table, see [`InverterType::capabilities`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InverterType {
    /// Solax hybrid inverters driven through the local Modbus integration
    Solax,
    /// Solax Ultra (no midnight-spanning charge windows)
    SolaxUltra,
    /// GivEnergy inverters driven through the local GivTCP integration
    GivEnergy,
    /// Solis hybrid inverters driven through the authenticated cloud API
    SolisCloud,
}

impl InverterType {
    /// Get human-readable name for the inverter type
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Solax => "Solax",
            Self::SolaxUltra => "Solax Ultra",
            Self::GivEnergy => "GivEnergy",
            Self::SolisCloud => "Solis Cloud",
        }
    }

    /// Get config string value (kebab-case)
    pub fn to_config_value(&self) -> &'static str {
        match self {
            Self::Solax => "solax",
            Self::SolaxUltra => "solax-ultra",
            Self::GivEnergy => "giv-energy",
            Self::SolisCloud => "solis-cloud",
        }
    }

    /// List all supported inverter types
    pub fn all() -> &'static [InverterType] {
        &[
            Self::Solax,
            Self::SolaxUltra,
            Self::GivEnergy,
            Self::SolisCloud,
        ]
    }

    /// Static capability table for this inverter type
    pub fn capabilities(&self) -> DeviceCapabilities {
        match self {
            Self::Solax => DeviceCapabilities {
                channel: ControlChannelKind::Local,
                has_target_soc: false,
                has_charge_enable_switch: false,
                has_discharge_enable_switch: false,
                has_reserve: true,
                has_timed_pause: false,
                supports_midnight_windows: true,
                time_format: TimeFormat::SplitHourMinute,
            },
            Self::SolaxUltra => DeviceCapabilities {
                supports_midnight_windows: false,
                ..Self::Solax.capabilities()
            },
            Self::GivEnergy => DeviceCapabilities {
                channel: ControlChannelKind::Local,
                has_target_soc: true,
                has_charge_enable_switch: true,
                has_discharge_enable_switch: false,
                has_reserve: true,
                has_timed_pause: true,
                supports_midnight_windows: true,
                time_format: TimeFormat::HoursMinutesSeconds,
            },
            Self::SolisCloud => DeviceCapabilities {
                channel: ControlChannelKind::Cloud,
                has_target_soc: true,
                has_charge_enable_switch: true,
                has_discharge_enable_switch: true,
                has_reserve: true,
                has_timed_pause: false,
                supports_midnight_windows: true,
                time_format: TimeFormat::Range,
            },
        }
    }
}

impl fmt::Display for InverterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl FromStr for InverterType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "solax" => Ok(Self::Solax),
            "solax-ultra" => Ok(Self::SolaxUltra),
            "giv-energy" | "givenergy" => Ok(Self::GivEnergy),
            "solis-cloud" | "solis" => Ok(Self::SolisCloud),
            _ => Err(anyhow::anyhow!(
                "Unknown inverter type: '{}'. Supported types: {}",
                s,
                Self::all()
                    .iter()
                    .map(InverterType::to_config_value)
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
        }
    }
}

// ============= Capabilities =============

/// Which control channel a device is reached through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlChannelKind {
    /// Named values on the host platform, written and polled (write-verify)
    Local,
    /// Signed cloud register protocol (read-before-write)
    Cloud,
}

/// Wire format of charge/discharge times on the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeFormat {
    /// One value per boundary, "HH:MM:SS"
    HoursMinutesSeconds,
    /// Two numeric values per boundary ("H M"), hour and minute
    SplitHourMinute,
    /// One value holding the whole window, "HH:MM-HH:MM"
    Range,
}

/// Capability flags for one device
/// Immutable for the process lifetime apart from the config overrides applied at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    pub channel: ControlChannelKind,
    pub has_target_soc: bool,
    pub has_charge_enable_switch: bool,
    pub has_discharge_enable_switch: bool,
    pub has_reserve: bool,
    pub has_timed_pause: bool,
    pub supports_midnight_windows: bool,
    pub time_format: TimeFormat,
}

// ============= Device =============

/// Charge/discharge rate limits in watts
/// May be refreshed from hardware telemetry at runtime
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimits {
    pub max_charge_w: f64,
    pub max_discharge_w: f64,
    pub min_rate_w: f64,
}

impl RateLimits {
    /// Tolerance used when comparing a current rate against a target
    pub fn tolerance_w(&self) -> f64 {
        self.max_charge_w.max(self.max_discharge_w) / 25.0
    }

    /// Clamp a charge rate into limits; zero stays zero (charging paused)
    pub fn clamp_charge(&self, rate_w: f64) -> f64 {
        if rate_w <= 0.0 {
            return 0.0;
        }
        rate_w.clamp(self.min_rate_w, self.max_charge_w.max(self.min_rate_w))
    }

    pub fn clamp_discharge(&self, rate_w: f64) -> f64 {
        if rate_w <= 0.0 {
            return 0.0;
        }
        rate_w.clamp(self.min_rate_w, self.max_discharge_w.max(self.min_rate_w))
    }
}

/// Battery reserve/SOC bounds in percent
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SocBounds {
    pub reserve_min: f64,
    pub reserve_max: f64,
}

impl SocBounds {
    pub fn clamp_reserve(&self, soc: f64) -> f64 {
        soc.clamp(self.reserve_min, self.reserve_max)
    }
}

impl Default for SocBounds {
    fn default() -> Self {
        Self {
            reserve_min: 4.0,
            reserve_max: 100.0,
        }
    }
}

/// One physical inverter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    /// Numeric index in configuration order
    pub index: usize,
    /// Configured identifier, used in logs and entity names
    pub id: String,
    pub inverter_type: InverterType,
    pub capabilities: DeviceCapabilities,
    pub rates: RateLimits,
    pub soc_bounds: SocBounds,
    /// Battery capacity in kWh
    pub battery_capacity_kwh: f64,
}

impl Device {
    pub fn is_cloud(&self) -> bool {
        self.capabilities.channel == ControlChannelKind::Cloud
    }
}
