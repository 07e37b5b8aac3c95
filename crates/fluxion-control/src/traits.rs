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
use chrono::{NaiveDateTime, NaiveTime};
use fluxion_types::{RateLimits, SchedulePlan};

/// Source of the desired schedule for a device (the planner lives elsewhere)
#[async_trait]
pub trait PlanSource: Send + Sync {
    /// Current plan for `device_id`, `None` when nothing is planned
    async fn current_plan(&self, device_id: &str) -> Result<Option<SchedulePlan>>;

    fn name(&self) -> &str;
}

/// Slot-one schedule as seen by the control layer, in controller units
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CloudSchedule {
    /// Charge window in hardware wall-clock time, `None` when disabled
    pub charge: Option<(NaiveTime, NaiveTime)>,
    /// Discharge window in hardware wall-clock time, `None` when disabled
    pub discharge: Option<(NaiveTime, NaiveTime)>,
    pub charge_rate_w: f64,
    pub discharge_rate_w: f64,
    /// Charge target SOC in percent
    pub target_soc: Option<f64>,
}

/// Schedule operations a cloud backend offers to the window manager
///
/// Implementations read before writing, so writing an unchanged schedule
/// costs reads only.
#[async_trait]
pub trait CloudScheduleControl: Send + Sync {
    async fn read_schedule(&self) -> Result<CloudSchedule>;

    /// Write slot one; returns whether anything changed on the device
    async fn write_schedule(&self, schedule: &CloudSchedule) -> Result<bool>;

    async fn read_reserve(&self) -> Result<Option<f64>>;

    async fn write_reserve(&self, soc: f64) -> Result<bool>;

    /// Device wall clock, if the backend reports one
    async fn device_time(&self) -> Result<Option<NaiveDateTime>>;

    /// Poll live telemetry (5 minute tier)
    async fn refresh_telemetry(&self) -> Result<()>;

    /// Poll slow settings and re-detect the schedule wire variant (hourly tier)
    ///
    /// Returns rate limits derived from the device settings when available.
    async fn refresh_settings(&self) -> Result<Option<RateLimits>>;

    /// Register writes sent to the device so far
    fn write_count(&self) -> u64;

    fn name(&self) -> &str;
}
