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

use std::time::Duration;
use thiserror::Error;

/// Solis cloud API error types
#[derive(Error, Debug)]
pub enum SolisError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Solis API returned error status {status}: {message}")]
    ApiError { status: u16, message: String },

    /// HTTP succeeded but the JSON envelope reports failure
    #[error("Solis API error code {code}: {message}")]
    ApiCode { code: String, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Write to register {cid} rejected: {message}")]
    WriteRejected { cid: u32, message: String },

    #[error("Gave up after {attempts} attempts in {elapsed:?}: {last}")]
    RetryExhausted {
        attempts: u32,
        elapsed: Duration,
        last: Box<SolisError>,
    },

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl SolisError {
    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::HttpError(_) | Self::ApiCode { .. } => true,
            Self::ApiError { status, .. } => *status >= 500 || *status == 429,
            Self::InvalidResponse(_)
            | Self::JsonError(_)
            | Self::WriteRejected { .. }
            | Self::RetryExhausted { .. }
            | Self::ConfigError(_) => false,
        }
    }
}

pub type SolisResult<T> = Result<T, SolisError>;
