//! Configuration for the bus client
//!
//! Loaded from TOML. Broker credentials are never stored in the file; the
//! file names the environment variables holding them, and they are resolved
//! when the client is built.

use crate::bus::client::BusOptions;
use crate::bus::connection::ReconnectConfig;
use crate::bus::health_monitor::HealthMonitor;
use crate::transport::{BrokerAddress, Credentials};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Top-level bus client configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BusConfig {
    pub client: ClientSection,
    pub broker: BrokerSection,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub health: HealthSection,
    #[serde(default)]
    pub request: RequestSection,
}

/// Client identity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientSection {
    /// Client identifier (must match [a-zA-Z0-9._-]+)
    pub id: String,
}

/// Broker connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// Broker URL with protocol and port, `mqtt://` or `mqtts://`
    pub url: String,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    /// Upper bound for a single open attempt
    #[serde(default = "default_open_timeout_ms")]
    pub open_timeout_ms: u64,
}

fn default_open_timeout_ms() -> u64 {
    5_000
}

/// Health reporting settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HealthSection {
    /// Consecutive failed opens still reported as Degraded
    pub grace_attempts: u32,
    /// Port for the health HTTP server
    pub port: u16,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            grace_attempts: 3,
            port: 8080,
        }
    }
}

/// Request/response settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RequestSection {
    /// Timeout used when a request does not name one
    pub default_timeout_ms: u64,
    /// Destination responses are sent to (default: `responses/{client.id}`)
    pub reply_to: Option<String>,
}

impl Default for RequestSection {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
            reply_to: None,
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to render TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid client ID format: {0}")]
    InvalidClientId(String),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl BusConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: BusConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_client_id(&self.client.id)?;
        self.broker_address()?;

        if self.broker.open_timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "broker.open_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.request.default_timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "request.default_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if matches!(&self.request.reply_to, Some(reply_to) if reply_to.trim().is_empty()) {
            return Err(ConfigError::InvalidConfig(
                "request.reply_to must not be empty".to_string(),
            ));
        }

        HealthMonitor::validate_reconnect_config(&self.reconnect)
            .map_err(|e| ConfigError::InvalidConfig(format!("reconnect: {e}")))
    }

    pub fn broker_address(&self) -> Result<BrokerAddress, ConfigError> {
        let address = BrokerAddress::parse(&self.broker.url)
            .map_err(|e| ConfigError::InvalidBrokerUrl(e.to_string()))?;
        match address.scheme() {
            "mqtt" | "mqtts" => Ok(address),
            other => Err(ConfigError::InvalidBrokerUrl(format!(
                "unsupported scheme '{other}' in {}, expected mqtt or mqtts",
                self.broker.url
            ))),
        }
    }

    /// Resolve credentials from the configured environment variables.
    ///
    /// No `username_env` means anonymous. A named but unset username variable
    /// is an error; a missing password resolves to empty.
    pub fn credentials(&self) -> Result<Credentials, ConfigError> {
        let Some(username_env) = &self.broker.username_env else {
            return Ok(Credentials::anonymous());
        };
        let username = std::env::var(username_env)
            .map_err(|_| ConfigError::EnvVarNotFound(username_env.clone()))?;
        let password = self
            .broker
            .password_env
            .as_ref()
            .and_then(|name| std::env::var(name).ok())
            .unwrap_or_default();
        Ok(Credentials::new(username, password))
    }

    /// Destination responses are delivered to
    pub fn reply_destination(&self) -> String {
        self.request
            .reply_to
            .clone()
            .unwrap_or_else(|| format!("responses/{}", self.client.id))
    }

    /// Everything needed to build a [`BusClient`](crate::bus::client::BusClient)
    pub fn to_options(&self) -> Result<BusOptions, ConfigError> {
        Ok(BusOptions {
            client_id: self.client.id.clone(),
            credentials: self.credentials()?,
            address: self.broker_address()?,
            reconnect: self.reconnect.clone(),
            open_timeout: Duration::from_millis(self.broker.open_timeout_ms),
            grace_attempts: self.health.grace_attempts,
            default_timeout: Duration::from_millis(self.request.default_timeout_ms),
            reply_to: self.reply_destination(),
        })
    }
}

/// Validate client ID format: [a-zA-Z0-9._-]+
pub fn validate_client_id(client_id: &str) -> Result<(), ConfigError> {
    let valid_chars = client_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');

    if client_id.is_empty() || !valid_chars {
        return Err(ConfigError::InvalidClientId(format!(
            "Client ID '{client_id}' must match pattern [a-zA-Z0-9._-]+"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[client]
id = "orders"

[broker]
url = "mqtt://localhost:1883"
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = BusConfig::from_toml_str(MINIMAL).unwrap();

        assert_eq!(config.client.id, "orders");
        assert_eq!(config.broker.open_timeout_ms, 5_000);
        assert_eq!(config.reconnect, ReconnectConfig::default());
        assert_eq!(config.health.grace_attempts, 3);
        assert_eq!(config.request.default_timeout_ms, 30_000);
        assert_eq!(config.reply_destination(), "responses/orders");
    }

    #[test]
    fn test_full_config() {
        let config = BusConfig::from_toml_str(
            r#"
[client]
id = "billing.worker-1"

[broker]
url = "mqtts://broker.example.com"
open_timeout_ms = 1500

[reconnect]
initial_delay_ms = 100
multiplier = 1.5
max_delay_ms = 5000
max_attempts = 20
auth_failure_budget = 1

[health]
grace_attempts = 5
port = 9090

[request]
default_timeout_ms = 2000
reply_to = "billing/replies"
"#,
        )
        .unwrap();

        assert_eq!(config.reconnect.max_attempts, Some(20));
        assert_eq!(config.reconnect.multiplier, 1.5);
        assert_eq!(config.health.port, 9090);
        assert_eq!(config.reply_destination(), "billing/replies");

        let options = config.to_options().unwrap();
        assert_eq!(options.address.port(), 8883);
        assert_eq!(options.open_timeout, Duration::from_millis(1500));
        assert_eq!(options.default_timeout, Duration::from_secs(2));
        assert_eq!(options.grace_attempts, 5);
        assert_eq!(options.credentials, Credentials::anonymous());
    }

    #[test]
    fn test_invalid_client_id() {
        assert!(validate_client_id("invalid@client").is_err());
        assert!(validate_client_id("").is_err());
        assert!(validate_client_id("valid-client_123.test").is_ok());
    }

    #[test]
    fn test_rejects_unsupported_scheme() {
        let err = BusConfig::from_toml_str(
            r#"
[client]
id = "orders"

[broker]
url = "http://localhost:1883"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBrokerUrl(_)));
    }

    #[test]
    fn test_rejects_bad_reconnect_policy() {
        let err = BusConfig::from_toml_str(&format!(
            "{MINIMAL}\n[reconnect]\nmultiplier = 0.5\n"
        ))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidConfig(_)));
    }

    #[test]
    fn test_missing_username_variable_is_reported() {
        let config = BusConfig::from_toml_str(&format!(
            "{MINIMAL}username_env = \"RESILIENT_BUS_TEST_UNSET_USERNAME\"\n"
        ))
        .unwrap();

        match config.credentials() {
            Err(ConfigError::EnvVarNotFound(name)) => {
                assert_eq!(name, "RESILIENT_BUS_TEST_UNSET_USERNAME")
            }
            other => panic!("expected EnvVarNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_round_trips_through_toml() {
        let config = BusConfig::from_toml_str(MINIMAL).unwrap();
        let rendered = config.to_toml_string().unwrap();
        assert_eq!(BusConfig::from_toml_str(&rendered).unwrap(), config);
    }
}
