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

use thiserror::Error;

/// Errors raised by the control layer
#[derive(Error, Debug)]
pub enum ControlError {
    /// Fatal: the device cannot be driven with the configuration it was given
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A backend call failed after its own retry budget
    #[error("Backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

impl ControlError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

pub type ControlResult<T> = Result<T, ControlError>;
