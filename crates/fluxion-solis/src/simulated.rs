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

//! In-memory cloud that answers the register endpoints from a map

use crate::client::{
    CloudTransport, PATH_CONTROL, PATH_INVERTER_DETAIL, PATH_INVERTER_LIST, PATH_READ,
    PATH_READ_BATCH,
};
use crate::errors::{SolisError, SolisResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Recorded `/v2/api/control` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlCall {
    pub cid: u32,
    pub value: String,
    pub yuanzhi: Option<String>,
}

#[derive(Debug, Default)]
struct SimulatedState {
    registers: HashMap<u32, String>,
    controls: Vec<ControlCall>,
    requests: Vec<String>,
    /// Remaining requests answered with HTTP 503
    failures_left: u32,
    always_fail: bool,
    rejected: HashSet<u32>,
    serials: Vec<String>,
    detail: Value,
}

/// Fake Solis cloud for tests and dry runs
#[derive(Debug, Clone, Default)]
pub struct SimulatedCloud {
    state: Arc<Mutex<SimulatedState>>,
}

impl SimulatedCloud {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_register(&self, cid: u32, value: &str) {
        self.state.lock().registers.insert(cid, value.to_owned());
    }

    pub fn register(&self, cid: u32) -> Option<String> {
        self.state.lock().registers.get(&cid).cloned()
    }

    pub fn controls(&self) -> Vec<ControlCall> {
        self.state.lock().controls.clone()
    }

    /// Paths of every request seen, in order
    pub fn requests(&self) -> Vec<String> {
        self.state.lock().requests.clone()
    }

    pub fn clear_history(&self) {
        let mut state = self.state.lock();
        state.controls.clear();
        state.requests.clear();
    }

    pub fn fail_next(&self, count: u32) {
        self.state.lock().failures_left = count;
    }

    pub fn fail_always(&self) {
        self.state.lock().always_fail = true;
    }

    /// Writes to `cid` are answered with a non-zero result code
    pub fn reject_writes_to(&self, cid: u32) {
        self.state.lock().rejected.insert(cid);
    }

    pub fn set_serials(&self, serials: &[&str]) {
        self.state.lock().serials = serials.iter().map(|s| (*s).to_owned()).collect();
    }

    pub fn set_detail(&self, detail: Value) {
        self.state.lock().detail = detail;
    }
}

fn field_str(body: &Value, key: &str) -> String {
    match body.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

fn page_field(body: &Value, key: &str, default: usize) -> usize {
    body.get(key)
        .and_then(Value::as_u64)
        .and_then(|v| usize::try_from(v).ok())
        .unwrap_or(default)
        .max(1)
}

fn parse_cid(body: &Value) -> SolisResult<u32> {
    field_str(body, "cid")
        .parse()
        .map_err(|_| SolisError::InvalidResponse(format!("bad cid in request: {}", body)))
}

#[async_trait]
impl CloudTransport for SimulatedCloud {
    async fn post(&self, path: &str, body: &str) -> SolisResult<Value> {
        let body: Value = serde_json::from_str(body)?;
        let mut state = self.state.lock();
        state.requests.push(path.to_owned());

        if state.always_fail || state.failures_left > 0 {
            state.failures_left = state.failures_left.saturating_sub(1);
            return Err(SolisError::ApiError {
                status: 503,
                message: "simulated outage".to_owned(),
            });
        }

        match path {
            PATH_READ => {
                let cid = parse_cid(&body)?;
                let value = state.registers.get(&cid).cloned().unwrap_or_default();
                Ok(json!({ "msg": value }))
            }
            PATH_READ_BATCH => {
                let entries: Vec<Value> = field_str(&body, "cids")
                    .split(',')
                    .filter_map(|c| c.trim().parse::<u32>().ok())
                    .filter_map(|cid| {
                        state
                            .registers
                            .get(&cid)
                            .map(|v| json!({ "cid": cid, "msg": v }))
                    })
                    .collect();
                Ok(json!([entries]))
            }
            PATH_CONTROL => {
                let cid = parse_cid(&body)?;
                let value = field_str(&body, "value");
                let yuanzhi = body
                    .get("yuanzhi")
                    .map(|_| field_str(&body, "yuanzhi"));
                state.controls.push(ControlCall {
                    cid,
                    value: value.clone(),
                    yuanzhi,
                });
                if state.rejected.contains(&cid) {
                    return Ok(json!([{ "code": "1", "msg": "setting rejected" }]));
                }
                state.registers.insert(cid, value.clone());
                Ok(json!([{ "code": "0", "msg": value }]))
            }
            PATH_INVERTER_LIST => {
                let page_no = page_field(&body, "pageNo", 1);
                let page_size = page_field(&body, "pageSize", 20);
                let records: Vec<Value> = state
                    .serials
                    .iter()
                    .skip((page_no - 1) * page_size)
                    .take(page_size)
                    .map(|sn| json!({ "sn": sn }))
                    .collect();
                Ok(json!({ "page": { "records": records, "total": state.serials.len() } }))
            }
            PATH_INVERTER_DETAIL => Ok(state.detail.clone()),
            other => Err(SolisError::ApiError {
                status: 404,
                message: format!("unknown path {}", other),
            }),
        }
    }
}
