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

//! Wire encodings of the six-slot charge/discharge schedule
//!
//! The packed layouts only carry three slots and no SOC; slots 4-6 decode to
//! disabled defaults and the SOC values live in global registers.

use crate::registers::SlotRegisters;
use anyhow::{Result, anyhow};
use chrono::NaiveTime;
use fluxion_types::{SLOT_COUNT, ScheduleVariant, SlotSetting};
use std::collections::HashMap;

/// Slots that fit into a packed settings string
pub const PACKED_SLOTS: usize = 3;

/// Packed string layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackedLayout {
    /// `charge_current, discharge_current, charge_start, charge_end, discharge_start, discharge_end`
    A,
    /// `charge_current, discharge_current, charge_start-charge_end, discharge_start-discharge_end`
    B,
}

impl PackedLayout {
    pub fn fields_per_slot(&self) -> usize {
        match self {
            Self::A => 6,
            Self::B => 4,
        }
    }

    pub fn field_count(&self) -> usize {
        self.fields_per_slot() * PACKED_SLOTS
    }

    /// Layout whose field count matches `count`
    pub fn from_field_count(count: usize) -> Option<Self> {
        [Self::A, Self::B]
            .into_iter()
            .find(|layout| layout.field_count() == count)
    }
}

impl TryFrom<ScheduleVariant> for PackedLayout {
    type Error = anyhow::Error;

    fn try_from(variant: ScheduleVariant) -> Result<Self> {
        match variant {
            ScheduleVariant::PackedA => Ok(Self::A),
            ScheduleVariant::PackedB => Ok(Self::B),
            ScheduleVariant::V2 => Err(anyhow!("V2 schedules are not packed")),
        }
    }
}

impl From<PackedLayout> for ScheduleVariant {
    fn from(layout: PackedLayout) -> Self {
        match layout {
            PackedLayout::A => ScheduleVariant::PackedA,
            PackedLayout::B => ScheduleVariant::PackedB,
        }
    }
}

/// Zero-padded `HH:MM`
pub fn format_hm(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

/// Parse `HH:MM` (or `H:M`), anything else falls back to midnight
pub fn parse_hm(s: &str) -> NaiveTime {
    let mut parts = s.trim().splitn(2, ':');
    let hour = parts.next().and_then(|h| h.trim().parse::<u32>().ok());
    let minute = parts.next().and_then(|m| m.trim().parse::<u32>().ok());
    match (hour, minute) {
        (Some(h), Some(m)) => NaiveTime::from_hms_opt(h, m, 0).unwrap_or(NaiveTime::MIN),
        _ => NaiveTime::MIN,
    }
}

pub fn format_range(start: NaiveTime, end: NaiveTime) -> String {
    format!("{}-{}", format_hm(start), format_hm(end))
}

/// Parse `HH:MM-HH:MM`, missing halves default to midnight
pub fn parse_range(s: &str) -> (NaiveTime, NaiveTime) {
    match s.split_once('-') {
        Some((start, end)) => (parse_hm(start), parse_hm(end)),
        None => (parse_hm(s), NaiveTime::MIN),
    }
}

// negative values saturate to 0
#[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn parse_u32(s: Option<&&str>) -> u32 {
    s.and_then(|v| v.trim().parse::<f64>().ok())
        .map(|v| v.round() as u32)
        .unwrap_or(0)
}

fn time_field(s: Option<&&str>) -> NaiveTime {
    s.map(|v| parse_hm(v)).unwrap_or(NaiveTime::MIN)
}

/// Encode the first three slots; missing slots encode as zero fields
pub fn encode(slots: &[SlotSetting], layout: PackedLayout) -> String {
    let empty = SlotSetting::disabled();
    let mut fields: Vec<String> = Vec::with_capacity(layout.field_count());

    for i in 0..PACKED_SLOTS {
        let slot = slots.get(i).unwrap_or(&empty);
        fields.push(slot.charge_current.to_string());
        fields.push(slot.discharge_current.to_string());
        match layout {
            PackedLayout::A => {
                fields.push(format_hm(slot.charge_start));
                fields.push(format_hm(slot.charge_end));
                fields.push(format_hm(slot.discharge_start));
                fields.push(format_hm(slot.discharge_end));
            }
            PackedLayout::B => {
                fields.push(format_range(slot.charge_start, slot.charge_end));
                fields.push(format_range(slot.discharge_start, slot.discharge_end));
            }
        }
    }

    fields.join(",")
}

/// Decode a packed string into all six slots
///
/// Enables are derived from the windows. Short strings leave the missing
/// fields at their defaults.
pub fn decode(wire: &str, layout: PackedLayout) -> Vec<SlotSetting> {
    let fields: Vec<&str> = wire.split(',').collect();
    let per_slot = layout.fields_per_slot();

    let mut slots = Vec::with_capacity(SLOT_COUNT);
    for i in 0..PACKED_SLOTS {
        let f = |n: usize| fields.get(i * per_slot + n);
        let mut slot = SlotSetting {
            charge_current: parse_u32(f(0)),
            discharge_current: parse_u32(f(1)),
            ..SlotSetting::default()
        };
        match layout {
            PackedLayout::A => {
                slot.charge_start = time_field(f(2));
                slot.charge_end = time_field(f(3));
                slot.discharge_start = time_field(f(4));
                slot.discharge_end = time_field(f(5));
            }
            PackedLayout::B => {
                (slot.charge_start, slot.charge_end) =
                    f(2).map(|v| parse_range(v)).unwrap_or((NaiveTime::MIN, NaiveTime::MIN));
                (slot.discharge_start, slot.discharge_end) =
                    f(3).map(|v| parse_range(v)).unwrap_or((NaiveTime::MIN, NaiveTime::MIN));
            }
        }
        slots.push(slot.with_derived_enables());
    }
    slots.resize(SLOT_COUNT, SlotSetting::disabled());
    slots
}

fn flag(enabled: bool) -> String {
    let value = if enabled { "1" } else { "0" };
    value.to_string()
}

/// Register writes for all six slots in the split-register layout
pub fn encode_v2(slots: &[SlotSetting]) -> Vec<(u32, String)> {
    let empty = SlotSetting::disabled();
    let mut writes = Vec::with_capacity(SLOT_COUNT * 8);

    for i in 0..SLOT_COUNT {
        let slot = slots.get(i).unwrap_or(&empty);
        let regs = SlotRegisters::for_slot(i);
        writes.extend([
            (regs.charge_enable, flag(slot.charge_enable)),
            (regs.charge_time, format_range(slot.charge_start, slot.charge_end)),
            (regs.charge_soc, slot.charge_soc.to_string()),
            (regs.charge_current, slot.charge_current.to_string()),
            (regs.discharge_enable, flag(slot.discharge_enable)),
            (regs.discharge_time, format_range(slot.discharge_start, slot.discharge_end)),
            (regs.discharge_soc, slot.discharge_soc.to_string()),
            (regs.discharge_current, slot.discharge_current.to_string()),
        ]);
    }
    writes
}

/// Decode six slots from split-register values; absent registers use defaults
pub fn decode_v2(values: &HashMap<u32, String>) -> Vec<SlotSetting> {
    let num = |cid: u32| parse_u32(values.get(&cid).map(String::as_str).as_ref());
    let enabled = |cid: u32| values.get(&cid).is_some_and(|v| v.trim() == "1");
    let range = |cid: u32| {
        values
            .get(&cid)
            .map(|v| parse_range(v))
            .unwrap_or((NaiveTime::MIN, NaiveTime::MIN))
    };

    (0..SLOT_COUNT)
        .map(|i| {
            let regs = SlotRegisters::for_slot(i);
            let (charge_start, charge_end) = range(regs.charge_time);
            let (discharge_start, discharge_end) = range(regs.discharge_time);
            SlotSetting {
                charge_enable: enabled(regs.charge_enable),
                charge_start,
                charge_end,
                charge_soc: num(regs.charge_soc),
                charge_current: num(regs.charge_current),
                discharge_enable: enabled(regs.discharge_enable),
                discharge_start,
                discharge_end,
                discharge_soc: num(regs.discharge_soc),
                discharge_current: num(regs.discharge_current),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn scenario_slots() -> Vec<SlotSetting> {
        let slot = SlotSetting {
            charge_start: t(2, 0),
            charge_end: t(5, 30),
            charge_current: 62,
            discharge_current: 45,
            discharge_start: t(16, 0),
            discharge_end: t(19, 0),
            ..SlotSetting::default()
        }
        .with_derived_enables();
        vec![slot, SlotSetting::disabled(), SlotSetting::disabled()]
    }

    const SCENARIO_A: &str =
        "62,45,02:00,05:30,16:00,19:00,0,0,00:00,00:00,00:00,00:00,0,0,00:00,00:00,00:00,00:00";

    #[test]
    fn test_encode_variant_a_scenario() {
        assert_eq!(encode(&scenario_slots(), PackedLayout::A), SCENARIO_A);
    }

    #[test]
    fn test_encode_variant_b() {
        assert_eq!(
            encode(&scenario_slots(), PackedLayout::B),
            "62,45,02:00-05:30,16:00-19:00,0,0,00:00-00:00,00:00-00:00,0,0,00:00-00:00,00:00-00:00"
        );
    }

    #[test]
    fn test_decode_derives_enables() {
        let slots = decode(SCENARIO_A, PackedLayout::A);
        assert_eq!(slots.len(), SLOT_COUNT);
        assert!(slots[0].charge_enable);
        assert!(slots[0].discharge_enable);
        assert!(!slots[1].charge_enable);
        assert_eq!(slots[0].charge_end, t(5, 30));
        assert_eq!(slots[5], SlotSetting::disabled());
    }

    #[test]
    fn test_wire_strings_reencode_exactly() {
        let a = "10,20,01:05,02:10,03:15,04:20,30,40,05:25,06:30,07:35,08:40,0,0,00:00,00:00,00:00,00:00";
        assert_eq!(encode(&decode(a, PackedLayout::A), PackedLayout::A), a);

        let b = "50,0,22:00-23:30,00:00-00:00,0,70,00:00-00:00,17:00-20:00,0,0,00:00-00:00,00:00-00:00";
        assert_eq!(encode(&decode(b, PackedLayout::B), PackedLayout::B), b);
    }

    #[test]
    fn test_decode_of_encoded_slots_is_identity() {
        let mut slots = scenario_slots();
        slots.resize(SLOT_COUNT, SlotSetting::disabled());
        for layout in [PackedLayout::A, PackedLayout::B] {
            assert_eq!(decode(&encode(&slots, layout), layout), slots);
        }
    }

    #[test]
    fn test_short_string_uses_defaults() {
        let slots = decode("62,45,02:00", PackedLayout::A);
        assert_eq!(slots[0].charge_current, 62);
        assert_eq!(slots[0].charge_start, t(2, 0));
        assert_eq!(slots[0].charge_end, NaiveTime::MIN);
        assert!(slots[0].charge_enable);
        assert_eq!(slots[1], SlotSetting::disabled());
    }

    #[test]
    fn test_layout_from_field_count() {
        assert_eq!(PackedLayout::from_field_count(18), Some(PackedLayout::A));
        assert_eq!(PackedLayout::from_field_count(12), Some(PackedLayout::B));
        assert_eq!(PackedLayout::from_field_count(7), None);
        assert!(PackedLayout::try_from(ScheduleVariant::V2).is_err());
    }

    #[test]
    fn test_v2_registers() {
        let mut slots = scenario_slots();
        slots[0].charge_soc = 80;
        let writes = encode_v2(&slots);
        assert_eq!(writes.len(), SLOT_COUNT * 8);
        assert!(writes.contains(&(5946, "02:00-05:30".to_string())));
        assert!(writes.contains(&(5928, "80".to_string())));
        assert!(writes.contains(&(5916, "1".to_string())));

        let values: HashMap<u32, String> = writes.into_iter().collect();
        let decoded = decode_v2(&values);
        assert_eq!(decoded[0], slots[0]);
        assert_eq!(decoded[5], SlotSetting::disabled());
    }
}
