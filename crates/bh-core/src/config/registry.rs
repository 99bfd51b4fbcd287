//! Connection registry configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::duration_secs;

/// Tuning for the connection registry and its tunnels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// How often each tunnel writes a keepalive frame
    #[serde(with = "duration_secs")]
    pub keepalive_interval: Duration,

    /// Silence on a control transport after which the tunnel is closed
    #[serde(with = "duration_secs")]
    pub keepalive_timeout: Duration,

    /// Deadline applied by `Registry::dial`
    #[serde(with = "duration_secs")]
    pub dial_timeout: Duration,

    /// How long a worker whose transport dropped may take to re-register
    /// before dials waiting on it fail. Zero disables the grace period.
    #[serde(with = "duration_secs")]
    pub grace_period: Duration,

    /// Maximum dials waiting on one worker during its grace period
    pub max_pending_dials: usize,

    /// Deadline for a new connection to send its handshake frame
    #[serde(with = "duration_secs")]
    pub handshake_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_secs(15),
            keepalive_timeout: Duration::from_secs(45),
            dial_timeout: Duration::from_secs(30),
            grace_period: Duration::ZERO,
            max_pending_dials: 100,
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

impl RegistryConfig {
    /// Whether dials wait for a dropped worker to reconnect
    pub fn grace_enabled(&self) -> bool {
        !self.grace_period.is_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RegistryConfig::default();
        assert!(!config.grace_enabled());
        assert!(config.keepalive_timeout > config.keepalive_interval);
        assert_eq!(config.max_pending_dials, 100);
    }

    #[test]
    fn test_durations_serialize_as_seconds() {
        let config = RegistryConfig {
            grace_period: Duration::from_secs(30),
            ..RegistryConfig::default()
        };
        let text = toml::to_string(&config).unwrap();
        assert!(text.contains("grace_period = 30"));
        assert!(text.contains("dial_timeout = 30"));
    }
}
