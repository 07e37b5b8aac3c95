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

use crate::host::{HostPlatform, HostValue};
use anyhow::{Result, bail};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Recorded action invocation
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub action: String,
    pub params: Value,
}

#[derive(Debug, Default)]
struct MemoryState {
    values: HashMap<String, HostValue>,
    writes: Vec<(String, String)>,
    invocations: Vec<Invocation>,
    statuses: Vec<(String, bool)>,
    /// Ids whose value never changes on write (simulates a device ignoring writes)
    stuck: HashSet<String>,
    /// Ids whose reads fail
    broken: HashSet<String>,
}

/// In-memory host platform that records every call
///
/// `turn_on`/`turn_off` actions flip the named value to "on"/"off".
#[derive(Debug, Clone, Default)]
pub struct MemoryHost {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, id: &str, state: &str) {
        self.state
            .lock()
            .values
            .insert(id.to_owned(), HostValue::new(state));
    }

    pub fn set_with_unit(&self, id: &str, state: &str, unit: &str) {
        self.state
            .lock()
            .values
            .insert(id.to_owned(), HostValue::with_unit(state, unit));
    }

    pub fn get(&self, id: &str) -> Option<String> {
        self.state.lock().values.get(id).map(|v| v.state.clone())
    }

    pub fn mark_stuck(&self, id: &str) {
        self.state.lock().stuck.insert(id.to_owned());
    }

    pub fn mark_broken(&self, id: &str) {
        self.state.lock().broken.insert(id.to_owned());
    }

    pub fn writes(&self) -> Vec<(String, String)> {
        self.state.lock().writes.clone()
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.state.lock().invocations.clone()
    }

    pub fn statuses(&self) -> Vec<(String, bool)> {
        self.state.lock().statuses.clone()
    }

    /// Writes plus invocations, the number of calls that would hit hardware
    pub fn mutation_count(&self) -> usize {
        let state = self.state.lock();
        state.writes.len() + state.invocations.len()
    }

    pub fn clear_history(&self) {
        let mut state = self.state.lock();
        state.writes.clear();
        state.invocations.clear();
        state.statuses.clear();
    }

    fn store(state: &mut MemoryState, id: &str, value: &str) {
        if state.stuck.contains(id) {
            return;
        }
        let unit = state.values.get(id).and_then(|v| v.unit.clone());
        state.values.insert(
            id.to_owned(),
            HostValue {
                state: value.to_owned(),
                unit,
            },
        );
    }
}

#[async_trait]
impl HostPlatform for MemoryHost {
    async fn read_value(&self, id: &str) -> Result<Option<HostValue>> {
        let state = self.state.lock();
        if state.broken.contains(id) {
            bail!("read of {} failed", id);
        }
        Ok(state.values.get(id).filter(|v| v.is_available()).cloned())
    }

    async fn write_value(&self, id: &str, value: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.writes.push((id.to_owned(), value.to_owned()));
        Self::store(&mut state, id, value);
        Ok(())
    }

    async fn invoke_action(&self, action: &str, params: Value) -> Result<()> {
        let mut state = self.state.lock();
        state.invocations.push(Invocation {
            action: action.to_owned(),
            params: params.clone(),
        });

        let target = params.get("entity_id").and_then(Value::as_str);
        match (action, target) {
            ("turn_on", Some(id)) => Self::store(&mut state, id, "on"),
            ("turn_off", Some(id)) => Self::store(&mut state, id, "off"),
            _ => {}
        }
        Ok(())
    }

    async fn publish_status(&self, message: &str, degraded: bool) -> Result<()> {
        self.state
            .lock()
            .statuses
            .push((message.to_owned(), degraded));
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
