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

use crate::clock::Clock;
use crate::host::{HostPlatform, HostValue, format_hms};
use chrono::NaiveTime;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Value to converge a host entity on
#[derive(Debug, Clone, PartialEq)]
pub enum DesiredValue {
    /// Written through the `turn_on`/`turn_off` actions
    Bool(bool),
    /// Compared within a tolerance
    Number(f64),
    /// Compared exactly (options, modes)
    Text(String),
    /// Compared as a wall-clock time, written as "HH:MM:SS"
    Time(NaiveTime),
}

impl DesiredValue {
    pub fn matches(&self, current: &HostValue, tolerance: f64) -> bool {
        match self {
            Self::Bool(desired) => current.as_bool() == Some(*desired),
            Self::Number(desired) => current
                .as_f64()
                .is_some_and(|value| (value - desired).abs() <= tolerance),
            Self::Text(desired) => current.state.trim() == desired,
            Self::Time(desired) => current.as_time() == Some(*desired),
        }
    }

    /// Text representation sent to the host
    #[expect(clippy::cast_possible_truncation)]
    pub fn render(&self) -> String {
        match self {
            Self::Bool(true) => "on".to_owned(),
            Self::Bool(false) => "off".to_owned(),
            Self::Number(value) if value.fract() == 0.0 => format!("{}", *value as i64),
            Self::Number(value) => format!("{value}"),
            Self::Text(text) => text.clone(),
            Self::Time(time) => format_hms(*time),
        }
    }
}

/// Write, wait, re-read, retry against the host platform
///
/// Used where the control channel acknowledges nothing: success means the
/// value read back matches.
pub struct LocalWriteVerifyEngine {
    host: Arc<dyn HostPlatform>,
    clock: Arc<dyn Clock>,
    poll_delay: Duration,
    write_count: AtomicU64,
}

impl std::fmt::Debug for LocalWriteVerifyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalWriteVerifyEngine")
            .field("host", &self.host.name())
            .field("poll_delay", &self.poll_delay)
            .field("write_count", &self.write_count())
            .finish_non_exhaustive()
    }
}

impl LocalWriteVerifyEngine {
    pub fn new(host: Arc<dyn HostPlatform>, clock: Arc<dyn Clock>, poll_delay: Duration) -> Self {
        Self {
            host,
            clock,
            poll_delay,
            write_count: AtomicU64::new(0),
        }
    }

    /// Number of verified value-changing writes performed in this session
    pub fn write_count(&self) -> u64 {
        self.write_count.load(Ordering::Relaxed)
    }

    pub fn host(&self) -> &Arc<dyn HostPlatform> {
        &self.host
    }

    async fn read(&self, id: &str) -> Option<HostValue> {
        match self.host.read_value(id).await {
            Ok(value) => value,
            Err(e) => {
                warn!("⚠️ [WRITE] Failed to read {}: {:#}", id, e);
                None
            }
        }
    }

    async fn issue_write(&self, id: &str, desired: &DesiredValue) -> anyhow::Result<()> {
        match desired {
            DesiredValue::Bool(on) => {
                let action = if *on { "turn_on" } else { "turn_off" };
                self.host
                    .invoke_action(action, json!({ "entity_id": id }))
                    .await
            }
            other => self.host.write_value(id, &other.render()).await,
        }
    }

    /// Converge `id` on `desired`; returns whether the value matches at the end
    ///
    /// No write is issued when the current value already matches. On
    /// exhaustion a degraded status is published and `false` returned.
    pub async fn write_and_verify(
        &self,
        name: &str,
        id: &str,
        desired: &DesiredValue,
        tolerance: f64,
        max_retries: u32,
    ) -> bool {
        if self
            .read(id)
            .await
            .is_some_and(|current| desired.matches(&current, tolerance))
        {
            debug!("✓ [WRITE] {} already {} ({})", name, desired.render(), id);
            return true;
        }

        for attempt in 1..=max_retries {
            info!(
                "📝 [WRITE] {} -> {} ({}, attempt {}/{})",
                name,
                desired.render(),
                id,
                attempt,
                max_retries
            );
            if let Err(e) = self.issue_write(id, desired).await {
                warn!("⚠️ [WRITE] {} write to {} failed: {:#}", name, id, e);
            }

            self.clock.sleep(self.poll_delay).await;

            if let Some(current) = self.read(id).await {
                if desired.matches(&current, tolerance) {
                    self.write_count.fetch_add(1, Ordering::Relaxed);
                    info!("✅ [WRITE] {} verified as {}", name, current.state);
                    return true;
                }
                debug!(
                    "   {} reads back '{}', wanted '{}'",
                    name,
                    current.state,
                    desired.render()
                );
            }
        }

        let message = format!(
            "{} ({}) did not reach {} after {} attempts",
            name,
            id,
            desired.render(),
            max_retries
        );
        warn!("⚠️ [WRITE] {}", message);
        if let Err(e) = self.host.publish_status(&message, true).await {
            warn!("⚠️ [WRITE] Failed to publish status: {:#}", e);
        }
        false
    }
}
