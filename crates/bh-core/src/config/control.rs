//! Control plane daemon configuration

use serde::{Deserialize, Serialize};

use super::RegistryConfig;

/// Configuration for the `bh-control` daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Address workers connect to
    pub bind_address: String,

    /// Registry and tunnel tuning
    pub registry: RegistryConfig,

    /// Local listeners that forward into workers
    pub expose: Vec<ExposeRule>,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:7070".to_string(),
            registry: RegistryConfig::default(),
            expose: vec![],
        }
    }
}

/// Forward local connections on `listen` to streams dialed on `worker_id`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExposeRule {
    /// Worker to dial
    pub worker_id: String,
    /// Local address to accept connections on
    pub listen: String,
}

impl std::str::FromStr for ExposeRule {
    type Err = String;

    /// Parse `worker=listen_addr`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (worker_id, listen) = s
            .split_once('=')
            .ok_or_else(|| format!("expected WORKER=ADDR, got '{}'", s))?;
        if worker_id.is_empty() || listen.is_empty() {
            return Err(format!("expected WORKER=ADDR, got '{}'", s));
        }
        Ok(Self {
            worker_id: worker_id.to_string(),
            listen: listen.to_string(),
        })
    }
}
