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

use fluxion_types::InverterType;
use serde::{Deserialize, Serialize};

/// Host entity ids used to drive one local device
///
/// Every field may be overridden from configuration; unset fields mean the
/// device does not expose that value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalEntityMap {
    pub charge_start: Option<String>,
    pub charge_end: Option<String>,
    pub discharge_start: Option<String>,
    pub discharge_end: Option<String>,
    pub charge_rate: Option<String>,
    pub discharge_rate: Option<String>,
    /// Rates are written as a percentage of the maximum rate
    pub rate_is_percent: bool,
    pub charge_enable: Option<String>,
    pub discharge_enable: Option<String>,
    pub target_soc: Option<String>,
    pub reserve: Option<String>,
    pub inverter_mode: Option<String>,
    pub idle_start: Option<String>,
    pub idle_end: Option<String>,
    pub inverter_time: Option<String>,
}

impl LocalEntityMap {
    /// Default entity naming of the local integration for `inverter_type`
    pub fn for_prefix(prefix: &str, inverter_type: InverterType) -> Self {
        let p = prefix;
        match inverter_type {
            InverterType::GivEnergy => Self {
                charge_start: Some(format!("select.{p}_charge_start_time_slot_1")),
                charge_end: Some(format!("select.{p}_charge_end_time_slot_1")),
                discharge_start: Some(format!("select.{p}_discharge_start_time_slot_1")),
                discharge_end: Some(format!("select.{p}_discharge_end_time_slot_1")),
                charge_rate: Some(format!("number.{p}_battery_charge_rate")),
                discharge_rate: Some(format!("number.{p}_battery_discharge_rate")),
                rate_is_percent: false,
                charge_enable: Some(format!("switch.{p}_enable_charge_schedule")),
                discharge_enable: None,
                target_soc: Some(format!("number.{p}_target_soc")),
                reserve: Some(format!("number.{p}_battery_power_reserve")),
                inverter_mode: Some(format!("select.{p}_mode")),
                idle_start: Some(format!("select.{p}_battery_pause_start_time_slot")),
                idle_end: Some(format!("select.{p}_battery_pause_end_time_slot")),
                inverter_time: Some(format!("sensor.{p}_invertor_time")),
            },
            InverterType::Solax | InverterType::SolaxUltra => Self {
                charge_start: Some(format!("number.{p}_charger_start_time_1")),
                charge_end: Some(format!("number.{p}_charger_end_time_1")),
                discharge_start: Some(format!("number.{p}_discharger_start_time_1")),
                discharge_end: Some(format!("number.{p}_discharger_end_time_1")),
                charge_rate: Some(format!("number.{p}_battery_charge_max_current")),
                discharge_rate: Some(format!("number.{p}_battery_discharge_max_current")),
                rate_is_percent: false,
                reserve: Some(format!("number.{p}_selfuse_discharge_min_soc")),
                inverter_time: Some(format!("sensor.{p}_rtc")),
                ..Self::default()
            },
            InverterType::SolisCloud => Self::default(),
        }
    }

    /// Fields set in `overrides` replace the defaults
    pub fn overlay(self, overrides: &LocalEntityMap) -> Self {
        fn pick(base: Option<String>, over: &Option<String>) -> Option<String> {
            over.clone().or(base)
        }

        Self {
            charge_start: pick(self.charge_start, &overrides.charge_start),
            charge_end: pick(self.charge_end, &overrides.charge_end),
            discharge_start: pick(self.discharge_start, &overrides.discharge_start),
            discharge_end: pick(self.discharge_end, &overrides.discharge_end),
            charge_rate: pick(self.charge_rate, &overrides.charge_rate),
            discharge_rate: pick(self.discharge_rate, &overrides.discharge_rate),
            rate_is_percent: self.rate_is_percent || overrides.rate_is_percent,
            charge_enable: pick(self.charge_enable, &overrides.charge_enable),
            discharge_enable: pick(self.discharge_enable, &overrides.discharge_enable),
            target_soc: pick(self.target_soc, &overrides.target_soc),
            reserve: pick(self.reserve, &overrides.reserve),
            inverter_mode: pick(self.inverter_mode, &overrides.inverter_mode),
            idle_start: pick(self.idle_start, &overrides.idle_start),
            idle_end: pick(self.idle_end, &overrides.idle_end),
            inverter_time: pick(self.inverter_time, &overrides.inverter_time),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlay_prefers_overrides() {
        let base = LocalEntityMap::for_prefix("givtcp", InverterType::GivEnergy);
        let overrides = LocalEntityMap {
            target_soc: Some("number.custom_target".to_owned()),
            ..LocalEntityMap::default()
        };
        let merged = base.overlay(&overrides);
        assert_eq!(merged.target_soc.as_deref(), Some("number.custom_target"));
        assert_eq!(
            merged.charge_start.as_deref(),
            Some("select.givtcp_charge_start_time_slot_1")
        );
    }

    #[test]
    fn test_cloud_device_has_no_local_entities() {
        let map = LocalEntityMap::for_prefix("solis", InverterType::SolisCloud);
        assert_eq!(map, LocalEntityMap::default());
    }
}
