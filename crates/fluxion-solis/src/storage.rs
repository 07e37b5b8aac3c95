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

//! Storage-mode register: a bit field of independent operating flags

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One flag of the storage-mode register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageFlag {
    SelfUse,
    TimeOfUse,
    OffGrid,
    Backup,
    GridCharging,
    FeedIn,
}

impl StorageFlag {
    pub fn bit(&self) -> u32 {
        match self {
            Self::SelfUse => 0,
            Self::TimeOfUse => 1,
            Self::OffGrid => 2,
            Self::Backup => 4,
            Self::GridCharging => 5,
            Self::FeedIn => 6,
        }
    }

    pub fn mask(&self) -> u32 {
        1 << self.bit()
    }

    pub fn is_set(&self, value: u32) -> bool {
        value & self.mask() != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitOp {
    Set,
    Clear,
    Toggle,
}

pub fn apply_bit(value: u32, flag: StorageFlag, op: BitOp) -> u32 {
    match op {
        BitOp::Set => value | flag.mask(),
        BitOp::Clear => value & !flag.mask(),
        BitOp::Toggle => value ^ flag.mask(),
    }
}

/// Named storage-mode presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageMode {
    SelfUse,
    SelfUseNoGridCharging,
    SelfUseNoTimed,
    FeedIn,
    FeedInNoTimed,
    FeedInNoGridCharging,
    Backup,
    OffGrid,
}

impl StorageMode {
    pub fn value(&self) -> u32 {
        match self {
            Self::SelfUse => 35,
            Self::SelfUseNoGridCharging => 1,
            Self::SelfUseNoTimed => 33,
            Self::FeedIn => 98,
            Self::FeedInNoTimed => 96,
            Self::FeedInNoGridCharging => 64,
            Self::Backup => 49,
            Self::OffGrid => 4,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SelfUse => "Self-Use",
            Self::SelfUseNoGridCharging => "Self-Use - No Grid Charging",
            Self::SelfUseNoTimed => "Self-Use - No Timed Charge/Discharge",
            Self::FeedIn => "Feed-in priority",
            Self::FeedInNoTimed => "Feed-in priority - No Timed Charge/Discharge",
            Self::FeedInNoGridCharging => "Feed-in priority - No Grid Charging",
            Self::Backup => "Backup/Reserve",
            Self::OffGrid => "Off-Grid Mode",
        }
    }

    pub fn all() -> &'static [StorageMode] {
        &[
            Self::SelfUse,
            Self::SelfUseNoGridCharging,
            Self::SelfUseNoTimed,
            Self::FeedIn,
            Self::FeedInNoTimed,
            Self::FeedInNoGridCharging,
            Self::Backup,
            Self::OffGrid,
        ]
    }

    pub fn from_value(value: u32) -> Option<Self> {
        Self::all().iter().copied().find(|m| m.value() == value)
    }
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for StorageMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|m| m.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| anyhow::anyhow!("Unknown storage mode: '{}'", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_bits() {
        assert!(StorageFlag::TimeOfUse.is_set(StorageMode::SelfUse.value()));
        assert!(!StorageFlag::TimeOfUse.is_set(StorageMode::SelfUseNoTimed.value()));
        assert!(StorageFlag::FeedIn.is_set(StorageMode::FeedIn.value()));
        assert!(StorageFlag::Backup.is_set(StorageMode::Backup.value()));
        assert!(!StorageFlag::GridCharging.is_set(StorageMode::SelfUseNoGridCharging.value()));
    }

    #[test]
    fn test_toggle_twice_restores_value() {
        for mode in StorageMode::all() {
            for flag in [StorageFlag::Backup, StorageFlag::GridCharging, StorageFlag::TimeOfUse] {
                let once = apply_bit(mode.value(), flag, BitOp::Toggle);
                assert_ne!(once, mode.value());
                assert_eq!(apply_bit(once, flag, BitOp::Toggle), mode.value());
            }
        }
    }

    #[test]
    fn test_set_and_clear() {
        assert_eq!(apply_bit(33, StorageFlag::TimeOfUse, BitOp::Set), 35);
        assert_eq!(apply_bit(35, StorageFlag::TimeOfUse, BitOp::Clear), 33);
        assert_eq!(apply_bit(35, StorageFlag::TimeOfUse, BitOp::Set), 35);
    }

    #[test]
    fn test_mode_from_name() {
        assert_eq!(
            "feed-in priority".parse::<StorageMode>().unwrap(),
            StorageMode::FeedIn
        );
        assert!("Turbo".parse::<StorageMode>().is_err());
        assert_eq!(StorageMode::from_value(49), Some(StorageMode::Backup));
    }
}
