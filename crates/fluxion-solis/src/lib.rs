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

pub mod auth;
pub mod backend;
pub mod cache;
pub mod client;
pub mod codec;
pub mod errors;
pub mod registers;
pub mod simulated;
pub mod storage;
pub mod types;

pub use backend::{BackendSettings, CloudRegisterBackend, storage_mode_for};
pub use cache::RegisterCache;
pub use client::{CloudTransport, DEFAULT_BASE_URL, HttpTransport, SolisClient};
pub use codec::PackedLayout;
pub use errors::{SolisError, SolisResult};
pub use simulated::{ControlCall, SimulatedCloud};
pub use storage::{BitOp, StorageFlag, StorageMode};
pub use types::{InverterSummary, InverterTelemetry};
