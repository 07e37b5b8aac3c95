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

//! Home Assistant as the host platform of the local control channel

use crate::client::HomeAssistantClient;
use crate::errors::HaError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use fluxion_control::{HostPlatform, HostValue};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::debug;

/// Where device status lines are published
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusTarget {
    /// `persistent_notification.create`, only for degraded statuses
    Notification,
    /// `input_text.set_value` on the given entity, every status
    InputText(String),
}

#[derive(Debug, Clone)]
pub struct HaHost {
    client: Arc<HomeAssistantClient>,
    status: StatusTarget,
}

/// Service and payload key that set a value on an entity of `domain`
fn setter_for(domain: &str) -> Option<(&'static str, &'static str)> {
    match domain {
        "number" => Some(("number.set_value", "value")),
        "input_number" => Some(("input_number.set_value", "value")),
        "select" => Some(("select.select_option", "option")),
        "input_select" => Some(("input_select.select_option", "option")),
        "time" => Some(("time.set_value", "time")),
        "input_datetime" => Some(("input_datetime.set_datetime", "time")),
        "text" => Some(("text.set_value", "value")),
        "input_text" => Some(("input_text.set_value", "value")),
        _ => None,
    }
}

fn domain_of(entity_id: &str) -> &str {
    entity_id.split_once('.').map_or(entity_id, |(domain, _)| domain)
}

/// Numbers go over the wire as JSON numbers when they parse as one
fn payload_value(domain: &str, value: &str) -> Value {
    if matches!(domain, "number" | "input_number") {
        if let Ok(n) = value.trim().parse::<f64>() {
            return json!(n);
        }
    }
    json!(value)
}

impl HaHost {
    pub fn new(client: Arc<HomeAssistantClient>, status: StatusTarget) -> Self {
        Self { client, status }
    }

    pub fn client(&self) -> &Arc<HomeAssistantClient> {
        &self.client
    }
}

#[async_trait]
impl HostPlatform for HaHost {
    async fn read_value(&self, id: &str) -> Result<Option<HostValue>> {
        match self.client.get_state(id).await {
            Ok(state) => {
                let value = state.to_host_value();
                Ok(value.is_available().then_some(value))
            }
            Err(HaError::EntityNotFound(_)) => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read entity: {}", id)),
        }
    }

    async fn write_value(&self, id: &str, value: &str) -> Result<()> {
        let domain = domain_of(id);
        let (service, key) = setter_for(domain)
            .with_context(|| format!("Entity {} has no writable domain", id))?;

        debug!("📝 [HA WRITE] {} = {}", id, value);
        let mut data = json!({ "entity_id": id });
        data[key] = payload_value(domain, value);
        self.client
            .call_service(service, data)
            .await
            .with_context(|| format!("Failed to write {} to {}", value, id))
    }

    /// `turn_on`/`turn_off` resolve to the entity's own domain; anything else is a full service name
    async fn invoke_action(&self, action: &str, params: Value) -> Result<()> {
        let service = if action.contains('.') {
            action.to_owned()
        } else {
            let entity = params
                .get("entity_id")
                .and_then(Value::as_str)
                .with_context(|| format!("Action {} needs an entity_id", action))?;
            format!("{}.{}", domain_of(entity), action)
        };

        self.client
            .call_service(&service, params)
            .await
            .with_context(|| format!("Failed to invoke {}", service))
    }

    async fn publish_status(&self, message: &str, degraded: bool) -> Result<()> {
        match &self.status {
            StatusTarget::Notification => {
                if !degraded {
                    return Ok(());
                }
                self.client
                    .call_service(
                        "persistent_notification.create",
                        json!({
                            "title": "FluxION battery control",
                            "message": message,
                            "notification_id": "fluxion_control_status",
                        }),
                    )
                    .await?;
            }
            StatusTarget::InputText(entity_id) => {
                // input_text holds at most 255 characters
                let text: String = message.chars().take(255).collect();
                self.client
                    .call_service(
                        "input_text.set_value",
                        json!({ "entity_id": entity_id, "value": text }),
                    )
                    .await?;
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "Home Assistant"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setter_by_domain() {
        assert_eq!(setter_for("number"), Some(("number.set_value", "value")));
        assert_eq!(setter_for("select"), Some(("select.select_option", "option")));
        assert_eq!(setter_for("switch"), None);
    }

    #[test]
    fn test_payload_value() {
        assert_eq!(payload_value("number", "2500"), json!(2500.0));
        assert_eq!(payload_value("select", "03:30:00"), json!("03:30:00"));
        assert_eq!(payload_value("number", "abc"), json!("abc"));
    }

    #[test]
    fn test_domain_of() {
        assert_eq!(domain_of("switch.ge_enable_charge_schedule"), "switch");
        assert_eq!(domain_of("plain"), "plain");
    }
}
