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

use crate::host::HostPlatform;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tracing::{debug, info, warn};

/// External service invocation configured for a device event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceHook {
    /// Host action, e.g. "button.press" or "script.turn_on"
    pub action: String,
    #[serde(default)]
    pub data: Value,
}

/// Device events that may fire a service hook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookKind {
    ChargeStart,
    ChargeStop,
    ExportStart,
    ExportStop,
    Restart,
}

impl HookKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChargeStart => "charge_start",
            Self::ChargeStop => "charge_stop",
            Self::ExportStart => "export_start",
            Self::ExportStop => "export_stop",
            Self::Restart => "restart",
        }
    }
}

/// Service hooks configured for one device
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceHooks {
    #[serde(default)]
    pub charge_start: Option<ServiceHook>,
    #[serde(default)]
    pub charge_stop: Option<ServiceHook>,
    #[serde(default)]
    pub export_start: Option<ServiceHook>,
    #[serde(default)]
    pub export_stop: Option<ServiceHook>,
    #[serde(default)]
    pub restart: Option<ServiceHook>,
}

impl ServiceHooks {
    pub fn get(&self, kind: HookKind) -> Option<&ServiceHook> {
        match kind {
            HookKind::ChargeStart => self.charge_start.as_ref(),
            HookKind::ChargeStop => self.charge_stop.as_ref(),
            HookKind::ExportStart => self.export_start.as_ref(),
            HookKind::ExportStop => self.export_stop.as_ref(),
            HookKind::Restart => self.restart.as_ref(),
        }
    }
}

/// Suppresses repeated identical service invocations
///
/// The only state shared between device tasks.
#[derive(Debug, Default)]
pub struct ServiceCallDedup {
    last: Mutex<HashMap<String, u64>>,
}

fn fingerprint(action: &str, data: &Value) -> u64 {
    let mut hasher = DefaultHasher::new();
    action.hash(&mut hasher);
    data.to_string().hash(&mut hasher);
    hasher.finish()
}

impl ServiceCallDedup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the call and return whether it differs from the last one for `key`
    pub fn should_invoke(&self, key: &str, action: &str, data: &Value) -> bool {
        let print = fingerprint(action, data);
        let mut last = self.last.lock();
        if last.get(key) == Some(&print) {
            return false;
        }
        last.insert(key.to_owned(), print);
        true
    }

    /// Re-arm `key` so the next call goes through even if identical
    pub fn forget(&self, key: &str) {
        self.last.lock().remove(key);
    }

    /// Fire the hook for `kind` on `device_id`, unless it is a repeat
    ///
    /// Returns whether an invocation was sent.
    pub async fn invoke_hook(
        &self,
        host: &dyn HostPlatform,
        device_id: &str,
        hooks: &ServiceHooks,
        kind: HookKind,
    ) -> bool {
        let Some(hook) = hooks.get(kind) else {
            return false;
        };
        let key = format!("{}/{}", device_id, kind.as_str());

        // start/stop of the same role are mutually exclusive, re-arm the opposite one
        match kind {
            HookKind::ChargeStart => self.forget(&format!("{device_id}/charge_stop")),
            HookKind::ChargeStop => self.forget(&format!("{device_id}/charge_start")),
            HookKind::ExportStart => self.forget(&format!("{device_id}/export_stop")),
            HookKind::ExportStop => self.forget(&format!("{device_id}/export_start")),
            HookKind::Restart => {}
        }

        if !self.should_invoke(&key, &hook.action, &hook.data) {
            debug!("🔁 [HOOK] Suppressed repeated {} for {}", kind.as_str(), device_id);
            return false;
        }

        info!("📞 [HOOK] {} for {}: {}", kind.as_str(), device_id, hook.action);
        match host.invoke_action(&hook.action, hook.data.clone()).await {
            Ok(()) => true,
            Err(e) => {
                warn!("⚠️ [HOOK] {} for {} failed: {:#}", kind.as_str(), device_id, e);
                self.forget(&key);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryHost;
    use serde_json::json;

    #[test]
    fn test_identical_call_suppressed_until_forgotten() {
        let dedup = ServiceCallDedup::new();
        let data = json!({"entity_id": "button.restart"});

        assert!(dedup.should_invoke("inv1/restart", "button.press", &data));
        assert!(!dedup.should_invoke("inv1/restart", "button.press", &data));
        assert!(dedup.should_invoke("inv2/restart", "button.press", &data));

        dedup.forget("inv1/restart");
        assert!(dedup.should_invoke("inv1/restart", "button.press", &data));
    }

    #[test]
    fn test_changed_payload_goes_through() {
        let dedup = ServiceCallDedup::new();
        assert!(dedup.should_invoke("k", "script.turn_on", &json!({"rate": 1})));
        assert!(dedup.should_invoke("k", "script.turn_on", &json!({"rate": 2})));
    }

    #[tokio::test]
    async fn test_hook_start_stop_alternate() {
        let host = MemoryHost::new();
        let dedup = ServiceCallDedup::new();
        let hooks = ServiceHooks {
            charge_start: Some(ServiceHook {
                action: "script.charge_on".to_owned(),
                data: Value::Null,
            }),
            charge_stop: Some(ServiceHook {
                action: "script.charge_off".to_owned(),
                data: Value::Null,
            }),
            ..ServiceHooks::default()
        };

        assert!(dedup.invoke_hook(&host, "inv1", &hooks, HookKind::ChargeStart).await);
        assert!(!dedup.invoke_hook(&host, "inv1", &hooks, HookKind::ChargeStart).await);
        assert!(dedup.invoke_hook(&host, "inv1", &hooks, HookKind::ChargeStop).await);
        assert!(dedup.invoke_hook(&host, "inv1", &hooks, HookKind::ChargeStart).await);
        assert!(!dedup.invoke_hook(&host, "inv1", &hooks, HookKind::ExportStart).await);

        let actions: Vec<_> = host.invocations().into_iter().map(|c| c.action).collect();
        assert_eq!(
            actions,
            vec!["script.charge_on", "script.charge_off", "script.charge_on"]
        );
    }
}
