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

//! Signed HTTP transport and retrying client for the Solis cloud API

use crate::auth::sign_request;
use crate::errors::{SolisError, SolisResult};
use async_trait::async_trait;
use fluxion_control::{Clock, RetryError, RetryPolicy, retry_with_backoff};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, trace};

pub const DEFAULT_BASE_URL: &str = "https://www.soliscloud.com:13333";

pub const PATH_READ: &str = "/v2/api/atRead";
pub const PATH_READ_BATCH: &str = "/v2/api/atReadBatch";
pub const PATH_CONTROL: &str = "/v2/api/control";
pub const PATH_INVERTER_LIST: &str = "/v1/api/inverterList";
pub const PATH_INVERTER_DETAIL: &str = "/v1/api/inverterDetail";

/// One signed POST to the cloud, returning the `data` member of the envelope
#[async_trait]
pub trait CloudTransport: Send + Sync + fmt::Debug {
    async fn post(&self, path: &str, body: &str) -> SolisResult<Value>;
}

/// reqwest-backed transport
#[derive(Clone)]
pub struct HttpTransport {
    base_url: String,
    key_id: String,
    secret: String,
    client: Client,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .field("key_id", &self.key_id)
            .field("secret", &"<redacted>")
            .finish_non_exhaustive()
    }
}

impl HttpTransport {
    pub fn new(
        base_url: impl Into<String>,
        key_id: impl Into<String>,
        secret: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> SolisResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| SolisError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            key_id: key_id.into(),
            secret: secret.into(),
            client,
            clock,
        })
    }
}

/// Unwrap `{success, code, msg, data}`; code "0" (or 0) means success
pub fn parse_envelope(envelope: Value) -> SolisResult<Value> {
    let code = match envelope.get("code") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Null | Value::Bool(_) | Value::Array(_) | Value::Object(_)) | None => String::new(),
    };
    let success = envelope
        .get("success")
        .and_then(Value::as_bool)
        .unwrap_or(code == "0");

    if !success || (!code.is_empty() && code != "0") {
        let message = envelope
            .get("msg")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_owned();
        return Err(SolisError::ApiCode { code, message });
    }

    Ok(envelope.get("data").cloned().unwrap_or(Value::Null))
}

#[async_trait]
impl CloudTransport for HttpTransport {
    async fn post(&self, path: &str, body: &str) -> SolisResult<Value> {
        let headers = sign_request(&self.key_id, &self.secret, body, path, self.clock.now())?;
        let url = format!("{}{}", self.base_url, path);
        debug!("🔍 [SOLIS] POST {}", path);
        trace!("   Body: {}", body);

        let response = self
            .client
            .post(&url)
            .header("Authorization", headers.authorization)
            .header("Content-MD5", headers.content_md5)
            .header("Date", headers.date)
            .header("Content-Type", headers.content_type)
            .body(body.to_owned())
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {
                let envelope = response.json::<Value>().await?;
                parse_envelope(envelope)
            }
            status => {
                let message = response.text().await.unwrap_or_default();
                error!("❌ [SOLIS] {} returned {}: {}", path, status, message);
                Err(SolisError::ApiError {
                    status: status.as_u16(),
                    message,
                })
            }
        }
    }
}

/// Retrying client over any transport
///
/// Transient failures are retried with backoff until the policy budget is
/// spent.
#[derive(Debug, Clone)]
pub struct SolisClient {
    transport: Arc<dyn CloudTransport>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
}

impl SolisClient {
    pub fn new(transport: Arc<dyn CloudTransport>, clock: Arc<dyn Clock>) -> Self {
        Self {
            transport,
            clock,
            policy: RetryPolicy::cloud(),
        }
    }

    /// Client over the real HTTP transport
    pub fn connect(
        base_url: impl Into<String>,
        key_id: impl Into<String>,
        secret: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> SolisResult<Self> {
        let transport = HttpTransport::new(base_url, key_id, secret, clock.clone())?;
        Ok(Self::new(Arc::new(transport), clock))
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// POST `body` to `path`, retrying transient failures
    pub async fn call(&self, path: &str, body: &Value) -> SolisResult<Value> {
        let body = serde_json::to_string(body)?;

        retry_with_backoff(
            &self.policy,
            self.clock.as_ref(),
            path,
            || self.transport.post(path, &body),
            SolisError::is_transient,
        )
        .await
        .map_err(|e| match e {
            RetryError::Exhausted { state, last } => SolisError::RetryExhausted {
                attempts: state.attempts_made,
                elapsed: state.elapsed,
                last: Box::new(last),
            },
            RetryError::Permanent(e) => e,
        })
    }
}
