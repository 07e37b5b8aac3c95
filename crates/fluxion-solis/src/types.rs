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

use chrono::{DateTime, Utc};
use fluxion_control::host::unit_multiplier;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw battery-capacity register counts per kWh of nominal capacity
pub const CAPACITY_SCALE: f64 = 19.53125;

pub fn nominal_capacity_kwh(raw: f64) -> f64 {
    raw / CAPACITY_SCALE
}

/// One device returned by `/v1/api/inverterList`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InverterSummary {
    pub sn: String,
    #[serde(default)]
    pub id: Option<String>,
}

/// Live snapshot from `/v1/api/inverterDetail`, powers in watts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InverterTelemetry {
    pub soc: Option<f64>,
    /// Positive while charging
    pub battery_power_w: Option<f64>,
    pub pv_power_w: Option<f64>,
    /// Positive while exporting
    pub grid_power_w: Option<f64>,
    pub data_timestamp: Option<DateTime<Utc>>,
    pub raw_battery_capacity: Option<f64>,
    pub nominal_capacity_kwh: Option<f64>,
}

fn number(detail: &Value, key: &str) -> Option<f64> {
    match detail.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Null | Value::Bool(_) | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Value of `key` converted to watts using its `<key>Str` unit companion
fn power_w(detail: &Value, key: &str) -> Option<f64> {
    let value = number(detail, key)?;
    let unit = detail.get(format!("{key}Str")).and_then(Value::as_str);
    Some(value * unit_multiplier(unit))
}

impl InverterTelemetry {
    #[expect(clippy::cast_possible_truncation)]
    pub fn from_detail(detail: &Value) -> Self {
        let data_timestamp = number(detail, "dataTimestamp")
            .and_then(|ms| DateTime::<Utc>::from_timestamp_millis(ms as i64));

        Self {
            soc: number(detail, "batteryCapacitySoc"),
            battery_power_w: power_w(detail, "batteryPower"),
            pv_power_w: power_w(detail, "dcPac"),
            grid_power_w: power_w(detail, "psum"),
            data_timestamp,
            raw_battery_capacity: None,
            nominal_capacity_kwh: None,
        }
    }

    pub fn with_raw_capacity(mut self, raw: Option<f64>) -> Self {
        self.raw_battery_capacity = raw;
        self.nominal_capacity_kwh = raw.map(nominal_capacity_kwh);
        self
    }
}
