//! Model runtime collaborator
//!
//! The runtime itself is an opaque HTTP service. This module only defines
//! the narrow interface the hub needs from it, plus an adapter for the
//! Ollama API.

use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, trace};

use crate::config::RuntimeConfig;

/// Result of asking the runtime to switch models
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchOutcome {
    pub success: bool,
    pub message: String,
    pub duration_ms: u64,
}

/// Errors talking to the runtime
#[derive(Debug)]
pub enum RuntimeError {
    /// The runtime could not be reached
    Unreachable(String),

    /// The runtime answered with an unexpected status
    BadStatus(u16),

    /// The response body could not be decoded
    InvalidResponse(String),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::Unreachable(msg) => write!(f, "model runtime unreachable: {}", msg),
            RuntimeError::BadStatus(status) => {
                write!(f, "model runtime returned HTTP {}", status)
            }
            RuntimeError::InvalidResponse(msg) => {
                write!(f, "invalid response from model runtime: {}", msg)
            }
        }
    }
}

impl std::error::Error for RuntimeError {}

impl From<reqwest::Error> for RuntimeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            RuntimeError::InvalidResponse(err.to_string())
        } else {
            RuntimeError::Unreachable(err.to_string())
        }
    }
}

/// Inventory and switching operations of the model runtime
///
/// Calls have no latency bound; callers must not hold locks across them.
#[async_trait]
pub trait RuntimeInventory: Send + Sync {
    /// Identifiers (`<model>:<tag>`) of every installed model
    async fn list_entities(&self) -> Result<Vec<String>, RuntimeError>;

    /// Make `entity_id` the active model for `session_id`
    async fn switch_to(&self, entity_id: &str, session_id: &str)
    -> Result<SwitchOutcome, RuntimeError>;
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    keep_alive: &'a str,
}

/// Runtime adapter for the Ollama HTTP API
///
/// Switching issues an empty generate request, which loads the model and
/// keeps it resident for `keep_alive`.
pub struct OllamaRuntime {
    base_url: String,
    keep_alive: String,

    /// HTTP client (reused across requests)
    client: reqwest::Client,
}

impl OllamaRuntime {
    pub fn new(config: &RuntimeConfig) -> Result<Self, RuntimeError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RuntimeError::Unreachable(e.to_string()))?;

        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            keep_alive: config.keep_alive.clone(),
            client,
        })
    }
}

#[async_trait]
impl RuntimeInventory for OllamaRuntime {
    #[instrument(skip(self))]
    async fn list_entities(&self) -> Result<Vec<String>, RuntimeError> {
        let url = format!("{}/api/tags", self.base_url);
        trace!("requesting model list from {url}");

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(RuntimeError::BadStatus(response.status().as_u16()));
        }

        let tags: TagsResponse = response.json().await?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    #[instrument(skip(self))]
    async fn switch_to(
        &self,
        entity_id: &str,
        session_id: &str,
    ) -> Result<SwitchOutcome, RuntimeError> {
        let url = format!("{}/api/generate", self.base_url);
        let start = Instant::now();

        let response = self
            .client
            .post(&url)
            .json(&GenerateRequest {
                model: entity_id,
                prompt: "",
                stream: false,
                keep_alive: &self.keep_alive,
            })
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let duration_ms = start.elapsed().as_millis() as u64;

        debug!("switch to {entity_id} answered {status} after {duration_ms}ms");

        if status.is_success() {
            Ok(SwitchOutcome {
                success: true,
                message: format!("switched to {entity_id}"),
                duration_ms,
            })
        } else {
            Ok(SwitchOutcome {
                success: false,
                message: format!("runtime refused switch to {entity_id} ({status}): {body}"),
                duration_ms,
            })
        }
    }
}
