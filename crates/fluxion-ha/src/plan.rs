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

use crate::client::HomeAssistantClient;
use crate::errors::HaError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use fluxion_control::PlanSource;
use fluxion_types::SchedulePlan;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Reads each device's plan from the attributes of one HA entity
///
/// The planner publishes `charge_window`, `export_window`, `target_soc`,
/// `reserve_soc`, `charge_rate_w` and `discharge_rate_w` attributes; windows are
/// `{start_minute, end_minute, average_rate}` objects.
#[derive(Debug, Clone)]
pub struct HaPlanSource {
    client: Arc<HomeAssistantClient>,
    entities: HashMap<String, String>,
}

impl HaPlanSource {
    pub fn new(client: Arc<HomeAssistantClient>) -> Self {
        Self {
            client,
            entities: HashMap::new(),
        }
    }

    pub fn with_device(mut self, device_id: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entities.insert(device_id.into(), entity_id.into());
        self
    }
}

#[async_trait]
impl PlanSource for HaPlanSource {
    async fn current_plan(&self, device_id: &str) -> Result<Option<SchedulePlan>> {
        let Some(entity_id) = self.entities.get(device_id) else {
            return Ok(None);
        };

        let state = match self.client.get_state(entity_id).await {
            Ok(state) => state,
            Err(HaError::EntityNotFound(_)) => {
                warn!("⚠️ [PLAN] Plan entity {} does not exist", entity_id);
                return Ok(None);
            }
            Err(e) => return Err(e).with_context(|| format!("Failed to read plan {}", entity_id)),
        };
        if !state.to_host_value().is_available() {
            return Ok(None);
        }

        let attributes = Value::Object(state.attributes.into_iter().collect());
        let plan: SchedulePlan = serde_json::from_value(attributes)
            .with_context(|| format!("Plan entity {} has malformed attributes", entity_id))?;
        debug!("📋 [PLAN] {}: {:?}", device_id, plan);
        Ok(Some(plan))
    }

    fn name(&self) -> &str {
        "Home Assistant plan entity"
    }
}
