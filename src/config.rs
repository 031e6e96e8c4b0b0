//! Agent configuration.
//!
//! One JSON document describes a deployment: which store to poll, how to
//! reach the backend, and which serial port the printer hangs off. The
//! operator pastes the connection string issued by the backend into
//! `api_key`; a separate `store_url` is only needed when the connection
//! string does not embed one.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::coordinator::PollSettings;
use crate::error::StoreError;
use crate::store::RemoteReceiptStore;
use crate::transport::SerialConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Deployment configuration for one print relay instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Store identity on the backend.
    pub store_id: String,
    /// API key or full connection string.
    pub api_key: String,
    /// Backend base URL; ignored when the connection string embeds one.
    #[serde(default)]
    pub store_url: String,
    /// Printer serial line.
    pub serial: SerialConfig,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,
}

fn default_poll_interval_secs() -> u64 {
    3
}

fn default_batch_limit() -> usize {
    10
}

impl AgentConfig {
    /// Load and parse a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            interval: Duration::from_secs(self.poll_interval_secs),
            batch_limit: self.batch_limit,
        }
    }

    /// Build the HTTP store client this config points at.
    pub fn remote_store(&self) -> Result<RemoteReceiptStore, StoreError> {
        RemoteReceiptStore::new(&self.store_url, &self.api_key)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
