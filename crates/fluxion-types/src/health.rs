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
use serde::{Deserialize, Serialize};

/// Overall condition of one device as seen by the control layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DeviceCondition {
    #[default]
    Healthy,
    /// Working, but something needs attention (clock skew, unverified writes)
    Degraded,
}

/// Health record for one device, published after every reconcile pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceHealth {
    pub device_id: String,
    pub condition: DeviceCondition,
    pub last_check: DateTime<Utc>,
    /// Messages collected during the last pass
    pub recent_warnings: Vec<String>,
    /// Hardware writes performed in this session
    pub write_count: u64,
}

impl DeviceHealth {
    pub fn new(device_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            device_id: device_id.into(),
            condition: DeviceCondition::Healthy,
            last_check: now,
            recent_warnings: Vec::new(),
            write_count: 0,
        }
    }

    /// Record a degraded condition
    pub fn degrade(&mut self, message: impl Into<String>) {
        self.condition = DeviceCondition::Degraded;
        self.recent_warnings.push(message.into());
    }

    pub fn is_degraded(&self) -> bool {
        self.condition == DeviceCondition::Degraded
    }

    /// One-line status message for the host status sink
    pub fn summary(&self) -> String {
        if self.recent_warnings.is_empty() {
            format!("{}: OK ({} writes)", self.device_id, self.write_count)
        } else {
            format!(
                "{}: {} ({} writes)",
                self.device_id,
                self.recent_warnings.join("; "),
                self.write_count
            )
        }
    }
}
