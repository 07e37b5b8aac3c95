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
use chrono::NaiveTime;
use serde_json::Value;

/// States the host reports for entities that have no usable value
const UNAVAILABLE_STATES: [&str; 4] = ["unavailable", "unknown", "none", ""];

/// A named value as reported by the host platform
#[derive(Debug, Clone, PartialEq)]
pub struct HostValue {
    pub state: String,
    /// Unit of measurement, if the host reports one
    pub unit: Option<String>,
}

impl HostValue {
    pub fn new(state: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            unit: None,
        }
    }

    pub fn with_unit(state: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            unit: Some(unit.into()),
        }
    }

    pub fn is_available(&self) -> bool {
        !UNAVAILABLE_STATES.contains(&self.state.trim().to_lowercase().as_str())
    }

    pub fn as_bool(&self) -> Option<bool> {
        parse_bool(&self.state)
    }

    pub fn as_f64(&self) -> Option<f64> {
        if !self.is_available() {
            return None;
        }
        self.state.trim().parse::<f64>().ok()
    }

    /// Numeric value normalized to base units (W, Wh)
    pub fn as_base_unit(&self) -> Option<f64> {
        let value = self.as_f64()?;
        Some(value * unit_multiplier(self.unit.as_deref()))
    }

    pub fn as_time(&self) -> Option<NaiveTime> {
        parse_time(&self.state)
    }

    pub fn as_range(&self) -> Option<(NaiveTime, NaiveTime)> {
        parse_range(&self.state)
    }
}

/// Multiplier converting a value in `unit` to its base unit
pub fn unit_multiplier(unit: Option<&str>) -> f64 {
    match unit.map(str::trim) {
        Some("kW" | "kWh" | "kw" | "kwh") => 1000.0,
        Some("MW" | "MWh") => 1_000_000.0,
        _ => 1.0,
    }
}

/// Parse the usual host representations of a boolean
pub fn parse_bool(state: &str) -> Option<bool> {
    match state.trim().to_lowercase().as_str() {
        "on" | "true" | "enabled" | "enable" | "1" | "yes" => Some(true),
        "off" | "false" | "disabled" | "disable" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// Parse "HH:MM:SS" or "HH:MM"
pub fn parse_time(state: &str) -> Option<NaiveTime> {
    let s = state.trim();
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .ok()
}

/// Parse a "H:M-H:M" range
pub fn parse_range(state: &str) -> Option<(NaiveTime, NaiveTime)> {
    let (start, end) = state.trim().split_once('-')?;
    Some((parse_time(start)?, parse_time(end)?))
}

pub fn format_hms(time: NaiveTime) -> String {
    time.format("%H:%M:%S").to_string()
}

pub fn format_hm(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

pub fn format_range(start: NaiveTime, end: NaiveTime) -> String {
    format!("{}-{}", format_hm(start), format_hm(end))
}

/// Narrow contract consumed from the host automation platform
///
/// Actions are named generically (`turn_on`, `turn_off`, `press`) or as a
/// fully qualified host service; the implementation decides how to route them.
#[async_trait]
pub trait HostPlatform: Send + Sync {
    /// Read a named value; `None` when the value does not exist or is unavailable
    async fn read_value(&self, id: &str) -> Result<Option<HostValue>>;

    /// Write a named value (numbers, options, times are all sent as text)
    async fn write_value(&self, id: &str, value: &str) -> Result<()>;

    /// Fire-and-forget action invocation
    async fn invoke_action(&self, action: &str, params: Value) -> Result<()>;

    /// Health/status sink
    async fn publish_status(&self, message: &str, degraded: bool) -> Result<()>;

    /// Host name for logging
    fn name(&self) -> &str;
}
