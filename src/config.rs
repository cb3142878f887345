use crate::error::{ExchangeError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Serialize, Default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub acme: AgentConfig,
    pub bob: AgentConfig,
    pub convergence: ConvergenceConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Startup settings for one agent runtime: the wallet it opens and the
/// endpoint its inbound transport is registered under.
#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct AgentConfig {
    pub label: String,
    pub wallet_id: String,
    pub wallet_key: String,
    pub endpoint: String,
}

/// Tuning for the bounded wait used by the suspending operations.
#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct ConvergenceConfig {
    pub timeout_ms: u64,
    pub poll_interval_ms: u64,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3001,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            label: "demo-agent".to_string(),
            wallet_id: "main-wallet".to_string(),
            wallet_key: "demo-wallet-key-000000000000000".to_string(),
            endpoint: "http://localhost:3002".to_string(),
        }
    }
}

impl AgentConfig {
    pub fn acme_default() -> Self {
        Self {
            label: "demo-agent-acme".to_string(),
            wallet_id: "mainAcme".to_string(),
            wallet_key: "demoagentacme0000000000000000000".to_string(),
            endpoint: "http://localhost:3002".to_string(),
        }
    }

    pub fn bob_default() -> Self {
        Self {
            label: "demo-agent-bob".to_string(),
            wallet_id: "mainBob".to_string(),
            wallet_key: "demoagentbob00000000000000000000".to_string(),
            endpoint: "http://localhost:3003".to_string(),
        }
    }
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 20_000,
            poll_interval_ms: 250,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: None,
        }
    }
}

impl AppConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .map_err(|e| ExchangeError::Internal(format!("Failed to read config file: {e}")))?;

        let config: AppConfig = toml::from_str(&config_str)
            .map_err(|e| ExchangeError::Internal(format!("Failed to parse config file: {e}")))?;

        Ok(config)
    }

    pub fn load_with_env_overrides<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;

        if let Ok(acme_endpoint) = std::env::var("ACME_AGENT_ENDPOINT") {
            config.acme.endpoint = acme_endpoint;
        }

        if let Ok(bob_endpoint) = std::env::var("BOB_AGENT_ENDPOINT") {
            config.bob.endpoint = bob_endpoint;
        }

        if let Ok(log_level) = std::env::var("RUST_LOG") {
            config.logging.level = log_level;
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(ExchangeError::Internal(
                "Server port cannot be 0".to_string(),
            ));
        }

        for (name, agent) in [("acme", &self.acme), ("bob", &self.bob)] {
            if agent.label.is_empty() {
                return Err(ExchangeError::Internal(format!(
                    "{name} agent label cannot be empty"
                )));
            }
            if agent.wallet_id.is_empty() {
                return Err(ExchangeError::Internal(format!(
                    "{name} agent wallet id cannot be empty"
                )));
            }
            if agent.endpoint.is_empty() {
                return Err(ExchangeError::Internal(format!(
                    "{name} agent endpoint cannot be empty"
                )));
            }
        }

        if self.acme.endpoint == self.bob.endpoint {
            return Err(ExchangeError::Internal(
                "Acme and Bob agents cannot share an endpoint".to_string(),
            ));
        }

        if self.convergence.timeout_ms == 0 || self.convergence.poll_interval_ms == 0 {
            return Err(ExchangeError::Internal(
                "Convergence timeout and poll interval must be non-zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Default two-agent layout matching the original demo deployment.
    pub fn demo() -> Self {
        Self {
            acme: AgentConfig::acme_default(),
            bob: AgentConfig::bob_default(),
            ..Default::default()
        }
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_demo_config() {
        let config = AppConfig::demo();
        assert_eq!(config.server.port, 3001);
        assert_eq!(config.acme.label, "demo-agent-acme");
        assert_eq!(config.bob.label, "demo-agent-bob");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::demo();
        assert!(config.validate().is_ok());

        config.server.port = 0;
        assert!(config.validate().is_err());

        config = AppConfig::demo();
        config.bob.endpoint = config.acme.endpoint.clone();
        assert!(config.validate().is_err());

        config = AppConfig::demo();
        config.convergence.timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_file_roundtrip() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path();

        let toml_str = toml::to_string_pretty(&AppConfig::demo()).unwrap();
        std::fs::write(path, toml_str).unwrap();

        let loaded = AppConfig::load(path).unwrap();
        assert_eq!(loaded.server.port, 3001);
        assert_eq!(loaded.acme.endpoint, "http://localhost:3002");
        assert_eq!(loaded.bob.endpoint, "http://localhost:3003");
    }

    #[test]
    fn test_partial_config_file() {
        let temp_file = NamedTempFile::new().unwrap();
        let config_toml = r#"
[server]
host = "0.0.0.0"
port = 8080

[acme]
label = "issuer"
wallet_id = "issuer-wallet"
wallet_key = "k"
endpoint = "http://localhost:9002"

[bob]
label = "holder"
wallet_id = "holder-wallet"
wallet_key = "k"
endpoint = "http://localhost:9003"

[convergence]
timeout_ms = 5000
poll_interval_ms = 100

[logging]
level = "debug"
"#;
        std::fs::write(temp_file.path(), config_toml).unwrap();

        let config = AppConfig::load(temp_file.path()).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.convergence.timeout_ms, 5000);
        assert_eq!(config.logging.level, "debug");
        assert!(config.validate().is_ok());
    }
}
