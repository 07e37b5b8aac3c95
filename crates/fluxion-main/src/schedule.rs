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

use crate::config::SystemConfig;
use std::time::Duration;

/// Which polling tiers fire on a tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DueTiers {
    pub telemetry: bool,
    pub settings: bool,
    pub reconcile: bool,
}

impl DueTiers {
    pub fn any(&self) -> bool {
        self.telemetry || self.settings || self.reconcile
    }
}

/// Fixed tick with slower tiers that fire every N seconds
///
/// All tiers fire on the first tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickSchedule {
    pub tick: Duration,
    pub telemetry: Duration,
    pub settings: Duration,
    pub reconcile: Duration,
}

impl TickSchedule {
    pub fn from_config(system: &SystemConfig) -> Self {
        Self {
            tick: Duration::from_secs(system.tick_secs.max(1)),
            telemetry: Duration::from_secs(system.telemetry_secs),
            settings: Duration::from_secs(system.settings_secs),
            reconcile: Duration::from_secs(system.reconcile_secs),
        }
    }

    /// Tiers due at `elapsed` since the loop started
    pub fn due(&self, elapsed: Duration) -> DueTiers {
        let secs = elapsed.as_secs();
        let tick = self.tick.as_secs().max(1);
        let fires = |period: Duration| {
            let period = period.as_secs().max(tick);
            secs.checked_rem(period).is_some_and(|r| r < tick)
        };

        DueTiers {
            telemetry: fires(self.telemetry),
            settings: fires(self.settings),
            reconcile: fires(self.reconcile),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule() -> TickSchedule {
        TickSchedule::from_config(&SystemConfig::default())
    }

    #[test]
    fn test_everything_fires_first() {
        let due = schedule().due(Duration::ZERO);
        assert!(due.telemetry && due.settings && due.reconcile);
    }

    #[test]
    fn test_tiers() {
        let s = schedule();
        assert!(!s.due(Duration::from_secs(5)).any());

        let due = s.due(Duration::from_secs(60));
        assert!(due.reconcile);
        assert!(!due.telemetry);

        let due = s.due(Duration::from_secs(300));
        assert!(due.reconcile && due.telemetry);
        assert!(!due.settings);

        let due = s.due(Duration::from_secs(3600));
        assert!(due.reconcile && due.telemetry && due.settings);
    }

    #[test]
    fn test_late_tick_still_fires() {
        let s = schedule();
        // ticks land at 62s when the previous tick ran long
        assert!(s.due(Duration::from_secs(62)).reconcile);
        assert!(!s.due(Duration::from_secs(65)).reconcile);
    }
}
