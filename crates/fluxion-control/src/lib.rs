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

pub mod clock;
pub mod dedup;
pub mod entities;
pub mod errors;
pub mod host;
pub mod memory;
pub mod retry;
pub mod schedule_manager;
pub mod traits;
pub mod windows;
pub mod write_verify;

pub use clock::{Clock, FakeClock, SystemClock};
pub use dedup::{HookKind, ServiceCallDedup, ServiceHook, ServiceHooks};
pub use entities::LocalEntityMap;
pub use errors::{ControlError, ControlResult};
pub use host::{HostPlatform, HostValue};
pub use memory::MemoryHost;
pub use retry::{RetryError, RetryPolicy, RetryState, retry_with_backoff};
pub use schedule_manager::{
    ApplyReport, ControlChannel, ManagerSettings, ObservedState, ScheduleWindowManager,
};
pub use traits::{CloudSchedule, CloudScheduleControl, PlanSource};
pub use windows::ClockSkew;
pub use write_verify::{DesiredValue, LocalWriteVerifyEngine};
