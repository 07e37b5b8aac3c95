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

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

pub const MINUTES_PER_DAY: i64 = 24 * 60;

/// Time window in absolute minutes from the current "midnight" reference
///
/// Minutes are not wall-clock: a window starting tonight at 23:00 and ending
/// tomorrow at 05:00 is `{1380, 1740}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScheduleWindow {
    pub start_minute: i64,
    pub end_minute: i64,
    /// Average rate in watts over the window (0 when unknown)
    #[serde(default)]
    pub average_rate: f64,
}

pub type ChargeWindow = ScheduleWindow;
pub type ExportWindow = ScheduleWindow;

impl ScheduleWindow {
    pub fn new(start_minute: i64, end_minute: i64) -> Self {
        Self {
            start_minute,
            end_minute,
            average_rate: 0.0,
        }
    }

    pub fn with_rate(mut self, average_rate: f64) -> Self {
        self.average_rate = average_rate;
        self
    }

    pub fn duration_minutes(&self) -> i64 {
        self.end_minute - self.start_minute
    }

    /// Zero-length windows are the canonical "disabled" state on devices without an enable switch
    pub fn is_zero_length(&self) -> bool {
        self.start_minute == self.end_minute
    }

    pub fn contains(&self, minute: i64) -> bool {
        minute >= self.start_minute && minute < self.end_minute
    }

    /// Same window shifted by whole days
    pub fn shifted_days(&self, days: i64) -> Self {
        Self {
            start_minute: self.start_minute + days * MINUTES_PER_DAY,
            end_minute: self.end_minute + days * MINUTES_PER_DAY,
            average_rate: self.average_rate,
        }
    }

    /// Window compared as a normalized minute pair, ignoring the rate
    pub fn same_span(&self, other: &Self) -> bool {
        self.start_minute == other.start_minute && self.end_minute == other.end_minute
    }
}

/// A window currently valid for "now" plus its next daily occurrence
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowPair {
    pub current: ScheduleWindow,
    pub next: ScheduleWindow,
}

impl WindowPair {
    pub fn new(current: ScheduleWindow) -> Self {
        Self {
            current,
            next: current.shifted_days(1),
        }
    }
}

/// Idle (no charge, no discharge) period expressed as wall-clock times
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdleWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl IdleWindow {
    pub fn disabled() -> Self {
        Self {
            start: NaiveTime::MIN,
            end: NaiveTime::MIN,
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.start == self.end
    }
}

// ============= Cloud schedule slots =============

/// Number of parallel schedule slots exposed by the cloud protocol
pub const SLOT_COUNT: usize = 6;

/// One of the six parallel charge/discharge slots
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SlotSetting {
    pub charge_enable: bool,
    pub charge_start: NaiveTime,
    pub charge_end: NaiveTime,
    pub charge_soc: u32,
    pub charge_current: u32,
    pub discharge_enable: bool,
    pub discharge_start: NaiveTime,
    pub discharge_end: NaiveTime,
    pub discharge_soc: u32,
    pub discharge_current: u32,
}

impl Default for SlotSetting {
    fn default() -> Self {
        Self {
            charge_enable: false,
            charge_start: NaiveTime::MIN,
            charge_end: NaiveTime::MIN,
            charge_soc: 0,
            charge_current: 0,
            discharge_enable: false,
            discharge_start: NaiveTime::MIN,
            discharge_end: NaiveTime::MIN,
            discharge_soc: 0,
            discharge_current: 0,
        }
    }
}

impl SlotSetting {
    /// Disabled slot with all fields zeroed
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Recompute the enable flags from the windows (enabled when start != end)
    pub fn with_derived_enables(mut self) -> Self {
        self.charge_enable = self.charge_start != self.charge_end;
        self.discharge_enable = self.discharge_start != self.discharge_end;
        self
    }
}

/// Wire representation of the six-slot schedule on a cloud device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScheduleVariant {
    /// 18 packed fields: 6 per slot x 3 slots
    PackedA,
    /// 12 packed fields: 4 per slot x 3 slots, "start-end" ranges
    PackedB,
    /// Dedicated register per field for all 6 slots
    V2,
}

impl ScheduleVariant {
    pub fn is_packed(&self) -> bool {
        matches!(self, Self::PackedA | Self::PackedB)
    }
}

// ============= Plan =============

/// Desired device state handed over by the planner
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulePlan {
    /// Charge window in absolute minutes, `None` disables charging
    pub charge_window: Option<ChargeWindow>,
    /// Export (forced discharge) window in absolute minutes, `None` disables export
    pub export_window: Option<ExportWindow>,
    /// Charge target SOC in percent
    pub target_soc: Option<f64>,
    /// Reserve SOC in percent
    pub reserve_soc: Option<f64>,
    pub charge_rate_w: Option<f64>,
    pub discharge_rate_w: Option<f64>,
}
