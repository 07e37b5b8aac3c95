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

//! Control-ID (CID) register map of Solis hybrid inverters

use fluxion_types::SLOT_COUNT;

pub const STORAGE_MODE: u32 = 636;
pub const BATTERY_RESERVE_SOC: u32 = 157;
pub const BATTERY_OVER_DISCHARGE_SOC: u32 = 158;
pub const BATTERY_RECOVERY_SOC: u32 = 159;
pub const BATTERY_FORCE_CHARGE_SOC: u32 = 160;
pub const BATTERY_MAX_CHARGE_SOC: u32 = 2012;
pub const MAX_CHARGE_CURRENT: u32 = 851;
pub const MAX_DISCHARGE_CURRENT: u32 = 852;
pub const POWER_LIMIT: u32 = 376;
pub const MAX_OUTPUT_POWER: u32 = 6043;
pub const MAX_EXPORT_POWER: u32 = 499;
pub const BATTERY_CAPACITY: u32 = 1240;

/// Packed charge/discharge settings string (variants A and B)
pub const CHARGE_DISCHARGE_SETTINGS: u32 = 103;

/// Indicates which time-of-use register layout the firmware uses
pub const TOU_MODE_INDICATOR: u32 = 6798;

/// Indicator value for the split-register (V2) layout
pub const TOU_V2_ENABLED: &str = "43605";

/// Registers of one V2 slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRegisters {
    pub charge_enable: u32,
    pub charge_time: u32,
    pub charge_soc: u32,
    pub charge_current: u32,
    pub discharge_enable: u32,
    pub discharge_time: u32,
    pub discharge_soc: u32,
    pub discharge_current: u32,
}

impl SlotRegisters {
    /// Registers for slot `index` (0-based, < 6)
    #[expect(clippy::cast_possible_truncation)]
    pub fn for_slot(index: usize) -> Self {
        let i = index as u32;
        Self {
            charge_enable: 5916 + i,
            charge_time: 5946 + 3 * i,
            charge_soc: 5928 + i,
            charge_current: 5948 + 3 * i,
            discharge_enable: 5922 + i,
            discharge_time: 5964 + 4 * i,
            discharge_soc: 5965 + 4 * i,
            discharge_current: 5967 + 4 * i,
        }
    }

    pub fn all(&self) -> [u32; 8] {
        [
            self.charge_enable,
            self.charge_time,
            self.charge_soc,
            self.charge_current,
            self.discharge_enable,
            self.discharge_time,
            self.discharge_soc,
            self.discharge_current,
        ]
    }
}

/// Every V2 slot register, slot by slot
pub fn v2_slot_cids() -> Vec<u32> {
    (0..SLOT_COUNT)
        .flat_map(|i| SlotRegisters::for_slot(i).all())
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterCategory {
    Mode,
    Battery,
    Power,
    Schedule,
}

/// Static description of one register
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterInfo {
    pub cid: u32,
    pub name: String,
    pub unit: Option<&'static str>,
    pub category: RegisterCategory,
}

impl RegisterInfo {
    fn new(cid: u32, name: impl Into<String>, unit: Option<&'static str>, category: RegisterCategory) -> Self {
        Self {
            cid,
            name: name.into(),
            unit,
            category,
        }
    }
}

/// Known registers with names and units
pub fn register_table() -> Vec<RegisterInfo> {
    use RegisterCategory::{Battery, Mode, Power, Schedule};

    let mut table = vec![
        RegisterInfo::new(STORAGE_MODE, "Storage mode", None, Mode),
        RegisterInfo::new(TOU_MODE_INDICATOR, "Time-of-use register layout", None, Mode),
        RegisterInfo::new(BATTERY_RESERVE_SOC, "Battery reserve SOC", Some("%"), Battery),
        RegisterInfo::new(BATTERY_OVER_DISCHARGE_SOC, "Battery over-discharge SOC", Some("%"), Battery),
        RegisterInfo::new(BATTERY_RECOVERY_SOC, "Battery recovery SOC", Some("%"), Battery),
        RegisterInfo::new(BATTERY_FORCE_CHARGE_SOC, "Battery force-charge SOC", Some("%"), Battery),
        RegisterInfo::new(BATTERY_MAX_CHARGE_SOC, "Battery max charge SOC", Some("%"), Battery),
        RegisterInfo::new(BATTERY_CAPACITY, "Battery capacity", Some("Ah"), Battery),
        RegisterInfo::new(MAX_CHARGE_CURRENT, "Max charge current", Some("A"), Power),
        RegisterInfo::new(MAX_DISCHARGE_CURRENT, "Max discharge current", Some("A"), Power),
        RegisterInfo::new(POWER_LIMIT, "Power limit", Some("%"), Power),
        RegisterInfo::new(MAX_OUTPUT_POWER, "Max output power", Some("%"), Power),
        RegisterInfo::new(MAX_EXPORT_POWER, "Max export power", Some("W"), Power),
        RegisterInfo::new(CHARGE_DISCHARGE_SETTINGS, "Charge/discharge settings", None, Schedule),
    ];

    for slot in 0..SLOT_COUNT {
        let regs = SlotRegisters::for_slot(slot);
        let n = slot + 1;
        table.extend([
            RegisterInfo::new(regs.charge_enable, format!("Slot {n} charge enable"), None, Schedule),
            RegisterInfo::new(regs.charge_time, format!("Slot {n} charge time"), None, Schedule),
            RegisterInfo::new(regs.charge_soc, format!("Slot {n} charge SOC"), Some("%"), Schedule),
            RegisterInfo::new(regs.charge_current, format!("Slot {n} charge current"), Some("A"), Schedule),
            RegisterInfo::new(regs.discharge_enable, format!("Slot {n} discharge enable"), None, Schedule),
            RegisterInfo::new(regs.discharge_time, format!("Slot {n} discharge time"), None, Schedule),
            RegisterInfo::new(regs.discharge_soc, format!("Slot {n} discharge SOC"), Some("%"), Schedule),
            RegisterInfo::new(regs.discharge_current, format!("Slot {n} discharge current"), Some("A"), Schedule),
        ]);
    }
    table
}

pub fn lookup(cid: u32) -> Option<RegisterInfo> {
    register_table().into_iter().find(|r| r.cid == cid)
}
