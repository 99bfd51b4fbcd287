//! Configuration management for backhaul

mod agent;
mod control;
mod registry;
pub mod serde_utils;

pub use agent::{AgentConfig, BackoffConfig};
pub use control::{ControlConfig, ExposeRule};
pub use registry::RegistryConfig;

use crate::error::ConfigError;
use std::path::{Path, PathBuf};

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("backhaul")
}

/// Get the default configuration file path for a component ("control", "agent")
pub fn default_config_path(component: &str) -> PathBuf {
    default_config_dir().join(format!("{}.toml", component))
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to a file
pub fn save_config<T: serde::Serialize>(path: &Path, config: &T) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ConfigError::Invalid(format!("Failed to create config dir: {}", e)))?;
    }

    std::fs::write(path, content)
        .map_err(|e| ConfigError::Invalid(format!("Failed to write config: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_load_missing_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.toml");
        let result: Result<ControlConfig, _> = load_config(&path);
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_save_and_load_control_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("control.toml");

        let mut config = ControlConfig::default();
        config.bind_address = "127.0.0.1:9000".to_string();
        config.registry.grace_period = Duration::from_secs(20);
        config.expose.push(ExposeRule {
            worker_id: "runner-1".to_string(),
            listen: "127.0.0.1:15900".to_string(),
        });

        save_config(&path, &config).unwrap();
        let loaded: ControlConfig = load_config(&path).unwrap();

        assert_eq!(loaded.bind_address, "127.0.0.1:9000");
        assert_eq!(loaded.registry.grace_period, Duration::from_secs(20));
        assert_eq!(loaded.expose, config.expose);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.toml");
        std::fs::write(&path, "server_address = \"relay.example:7070\"\n").unwrap();

        let loaded: AgentConfig = load_config(&path).unwrap();
        assert_eq!(loaded.server_address, "relay.example:7070");
        assert_eq!(loaded.connect_timeout, AgentConfig::default().connect_timeout);
    }

    #[test]
    fn test_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "bind_address = [").unwrap();

        let result: Result<ControlConfig, _> = load_config(&path);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
