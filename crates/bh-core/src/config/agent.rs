//! Agent configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::duration_secs;
use crate::types::WorkerId;

/// Configuration for the worker agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Control plane address to connect to
    pub server_address: String,

    /// Worker identifier (optional, defaults to hostname)
    pub worker_id: Option<String>,

    /// Local service each reverse-dialed stream is piped to
    pub forward_to: String,

    /// How often to write a keepalive frame
    #[serde(with = "duration_secs")]
    pub keepalive_interval: Duration,

    /// Silence after which the control transport is considered dead
    #[serde(with = "duration_secs")]
    pub keepalive_timeout: Duration,

    /// Connection timeout
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Backoff configuration for reconnections
    pub backoff: BackoffConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server_address: "localhost:7070".to_string(),
            worker_id: None,
            forward_to: "127.0.0.1:8080".to_string(),
            keepalive_interval: Duration::from_secs(15),
            keepalive_timeout: Duration::from_secs(45),
            connect_timeout: Duration::from_secs(30),
            backoff: BackoffConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Get the worker ID, falling back to hostname
    pub fn worker_id(&self) -> WorkerId {
        self.worker_id
            .clone()
            .map(WorkerId::new)
            .unwrap_or_else(WorkerId::from_hostname)
    }
}

/// Exponential backoff configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Initial delay
    #[serde(with = "duration_secs")]
    pub initial: Duration,

    /// Maximum delay
    #[serde(with = "duration_secs")]
    pub max: Duration,

    /// Multiplier for each retry
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}
