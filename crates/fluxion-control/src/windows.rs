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

//! Window math in absolute minutes relative to the current local midnight

use chrono::{NaiveTime, TimeDelta, Timelike};
use fluxion_types::{IdleWindow, MINUTES_PER_DAY, ScheduleWindow, WindowPair};
use serde::{Deserialize, Serialize};

/// Last representable minute of a day (23:59)
pub const LAST_MINUTE_OF_DAY: i64 = MINUTES_PER_DAY - 1;

pub fn minutes_of(time: NaiveTime) -> i64 {
    i64::from(time.hour()) * 60 + i64::from(time.minute())
}

/// Wall-clock time for an absolute minute offset (wrapped into one day)
pub fn time_of_minute(minute: i64) -> NaiveTime {
    NaiveTime::MIN
        .overflowing_add_signed(TimeDelta::minutes(minute.rem_euclid(MINUTES_PER_DAY)))
        .0
}

/// Normalize raw wall-clock start/end into a window valid for `now_minute`
///
/// A window crossing midnight is anchored on whichever side is still
/// relevant; a window that already ended rolls to its next occurrence.
pub fn normalize_window(start: NaiveTime, end: NaiveTime, now_minute: i64) -> ScheduleWindow {
    let mut start_minute = minutes_of(start);
    let mut end_minute = minutes_of(end);

    if end_minute < start_minute {
        if end_minute > now_minute {
            start_minute -= MINUTES_PER_DAY;
        } else {
            end_minute += MINUTES_PER_DAY;
        }
    }

    if end_minute < now_minute {
        start_minute += MINUTES_PER_DAY;
        end_minute += MINUTES_PER_DAY;
    }

    ScheduleWindow::new(start_minute, end_minute)
}

/// Normalized window plus its next daily occurrence
pub fn normalize_pair(start: NaiveTime, end: NaiveTime, now_minute: i64) -> WindowPair {
    WindowPair::new(normalize_window(start, end, now_minute))
}

/// Wall-clock boundaries of an absolute window
pub fn window_times(window: &ScheduleWindow) -> (NaiveTime, NaiveTime) {
    (
        time_of_minute(window.start_minute),
        time_of_minute(window.end_minute),
    )
}

/// Clamp a window so it never crosses the midnight following its start
pub fn clamp_to_midnight(window: &ScheduleWindow) -> ScheduleWindow {
    let day_start = window.start_minute.div_euclid(MINUTES_PER_DAY) * MINUTES_PER_DAY;
    let last = day_start + LAST_MINUTE_OF_DAY;
    ScheduleWindow {
        start_minute: window.start_minute,
        end_minute: window.end_minute.min(last),
        average_rate: window.average_rate,
    }
}

/// Clock skew between controller and inverter, in seconds
///
/// Positive values mean the inverter clock runs ahead of the controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockSkew {
    #[serde(default)]
    pub start_secs: i64,
    #[serde(default)]
    pub end_secs: i64,
}

impl ClockSkew {
    /// Wall-clock boundaries as the inverter should receive them
    pub fn to_hardware(&self, start: NaiveTime, end: NaiveTime) -> (NaiveTime, NaiveTime) {
        (shift(start, self.start_secs), shift(end, self.end_secs))
    }

    /// Hardware-reported boundaries mapped back to controller wall clock
    pub fn from_hardware(&self, start: NaiveTime, end: NaiveTime) -> (NaiveTime, NaiveTime) {
        (shift(start, -self.start_secs), shift(end, -self.end_secs))
    }
}

fn shift(time: NaiveTime, secs: i64) -> NaiveTime {
    time.overflowing_add_signed(TimeDelta::seconds(secs)).0
}

/// Longest stretch between now and midnight with neither charging nor discharging
///
/// The result never reaches past the next active window and ends at 23:59
/// at the latest. Returns a disabled window when no gap exists.
pub fn derive_idle_window(
    charge: Option<&ScheduleWindow>,
    discharge: Option<&ScheduleWindow>,
    now_minute: i64,
) -> IdleWindow {
    let mut busy: Vec<(i64, i64)> = [charge, discharge]
        .into_iter()
        .flatten()
        .filter(|w| !w.is_zero_length())
        .map(|w| (w.start_minute.max(now_minute), w.end_minute.min(MINUTES_PER_DAY)))
        .filter(|(s, e)| e > s)
        .collect();
    busy.sort_unstable();

    let mut best: Option<(i64, i64)> = None;
    let mut cursor = now_minute;
    for (start, end) in busy.iter().copied().chain([(MINUTES_PER_DAY, MINUTES_PER_DAY)]) {
        if start > cursor {
            let gap = (cursor, start);
            if best.is_none_or(|(s, e)| gap.1 - gap.0 > e - s) {
                best = Some(gap);
            }
        }
        cursor = cursor.max(end);
    }

    match best {
        Some((start, end)) => IdleWindow {
            start: time_of_minute(start),
            end: time_of_minute(end.min(LAST_MINUTE_OF_DAY)),
        },
        None => IdleWindow::disabled(),
    }
}

/// Skew in whole minutes between a device clock and the controller clock
pub fn skew_minutes(device: chrono::NaiveDateTime, controller: chrono::NaiveDateTime) -> i64 {
    (device - controller).num_minutes()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_overnight_window_before_start() {
        let w = normalize_window(t(23, 0), t(5, 0), 22 * 60);
        assert_eq!((w.start_minute, w.end_minute), (1380, 1740));
    }

    #[test]
    fn test_overnight_window_after_end_rolls_forward() {
        let pair = normalize_pair(t(23, 0), t(5, 0), 6 * 60);
        assert_eq!(
            (pair.current.start_minute, pair.current.end_minute),
            (1380, 1740)
        );
        assert_eq!((pair.next.start_minute, pair.next.end_minute), (2820, 3180));
    }

    #[test]
    fn test_overnight_window_in_progress() {
        let w = normalize_window(t(23, 0), t(5, 0), 4 * 60);
        assert_eq!((w.start_minute, w.end_minute), (-60, 300));
        assert!(w.contains(240));
    }

    #[test]
    fn test_past_window_rolls_to_tomorrow() {
        let w = normalize_window(t(2, 0), t(5, 30), 12 * 60);
        assert_eq!((w.start_minute, w.end_minute), (1560, 1770));
    }

    #[test]
    fn test_time_of_minute_wraps_into_one_day() {
        assert_eq!(time_of_minute(0), t(0, 0));
        assert_eq!(time_of_minute(1439), t(23, 59));
        assert_eq!(time_of_minute(1560), t(2, 0));
        assert_eq!(time_of_minute(-60), t(23, 0));
        assert_eq!(time_of_minute(3180), t(5, 0));
    }

    #[test]
    fn test_clamp_to_midnight() {
        let w = clamp_to_midnight(&ScheduleWindow::new(1380, 1740));
        assert_eq!(w.end_minute, 1439);
        assert_eq!(window_times(&w), (t(23, 0), t(23, 59)));

        let rolled = clamp_to_midnight(&ScheduleWindow::new(2820, 3180));
        assert_eq!(rolled.end_minute, 2879);

        let inside = clamp_to_midnight(&ScheduleWindow::new(120, 330));
        assert_eq!(inside.end_minute, 330);
    }

    #[test]
    fn test_skew_round_trip() {
        let skew = ClockSkew {
            start_secs: 90,
            end_secs: -30,
        };
        let (hs, he) = skew.to_hardware(t(23, 59), t(0, 0));
        assert_eq!(hs, NaiveTime::from_hms_opt(0, 0, 30).unwrap());
        assert_eq!(he, NaiveTime::from_hms_opt(23, 59, 30).unwrap());
        assert_eq!(skew.from_hardware(hs, he), (t(23, 59), t(0, 0)));
    }

    #[test]
    fn test_idle_window_between_charge_and_export() {
        let charge = ScheduleWindow::new(120, 330);
        let export = ScheduleWindow::new(960, 1140);
        let idle = derive_idle_window(Some(&charge), Some(&export), 60);
        assert_eq!(idle.start, t(5, 30));
        assert_eq!(idle.end, t(16, 0));
    }

    #[test]
    fn test_idle_window_clamped_before_midnight() {
        let charge = ScheduleWindow::new(60, 120);
        let idle = derive_idle_window(Some(&charge), None, 600);
        assert_eq!(idle.start, t(10, 0));
        assert_eq!(idle.end, t(23, 59));
    }

    #[test]
    fn test_idle_window_none_when_fully_busy() {
        let charge = ScheduleWindow::new(0, 1440);
        assert!(derive_idle_window(Some(&charge), None, 300).is_disabled());
    }
}
