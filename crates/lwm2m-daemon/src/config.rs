//! Configuration loading

use anyhow::Result;
use lwm2m_client::ClientSettings;
use lwm2m_coap::TransmissionParams;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub coap: CoapConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Management server, `coap://host[:port]` or `host:port`
    #[serde(default = "default_server_uri")]
    pub uri: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            uri: default_server_uri(),
        }
    }
}

fn default_server_uri() -> String {
    "coap://192.168.0.100:5683".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_endpoint_name")]
    pub endpoint_name: String,
    /// Registration lifetime in seconds
    #[serde(default = "default_lifetime")]
    pub lifetime_secs: u32,
    #[serde(default = "default_binding_mode")]
    pub binding_mode: String,
    /// Local UDP port (0 picks an ephemeral port)
    #[serde(default)]
    pub local_port: u16,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint_name: default_endpoint_name(),
            lifetime_secs: default_lifetime(),
            binding_mode: default_binding_mode(),
            local_port: 0,
        }
    }
}

fn default_endpoint_name() -> String {
    "rust-lwm2m-client".to_string()
}

fn default_lifetime() -> u32 {
    86400
}

fn default_binding_mode() -> String {
    "U".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoapConfig {
    #[serde(default = "default_ack_timeout")]
    pub ack_timeout_ms: u64,
    #[serde(default = "default_max_retransmit")]
    pub max_retransmit: u32,
}

impl Default for CoapConfig {
    fn default() -> Self {
        Self {
            ack_timeout_ms: default_ack_timeout(),
            max_retransmit: default_max_retransmit(),
        }
    }
}

fn default_ack_timeout() -> u64 {
    2000
}

fn default_max_retransmit() -> u32 {
    4
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Fixed seed for reproducible sensor values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Config {
    pub fn to_client_settings(&self) -> ClientSettings {
        ClientSettings {
            endpoint_name: self.client.endpoint_name.clone(),
            lifetime_secs: self.client.lifetime_secs,
            binding_mode: self.client.binding_mode.clone(),
            ..Default::default()
        }
    }

    pub fn to_transmission_params(&self) -> TransmissionParams {
        TransmissionParams {
            ack_timeout: Duration::from_millis(self.coap.ack_timeout_ms),
            max_retransmit: self.coap.max_retransmit,
            ..Default::default()
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}

/// Save default configuration to file
pub fn save_default_config(path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(&Config::default())?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();

        assert_eq!(config.server.uri, "coap://192.168.0.100:5683");
        assert_eq!(config.client.endpoint_name, "rust-lwm2m-client");
        assert_eq!(config.client.lifetime_secs, 86400);
        assert_eq!(config.client.binding_mode, "U");
        assert_eq!(config.client.local_port, 0);
        assert_eq!(config.coap.ack_timeout_ms, 2000);
        assert_eq!(config.coap.max_retransmit, 4);
        assert_eq!(config.simulation.seed, None);
    }

    #[test]
    fn test_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device.toml");
        std::fs::write(
            &path,
            r#"
[server]
uri = "coap://10.0.0.5"

[client]
endpoint_name = "bench-node"
lifetime_secs = 300

[simulation]
seed = 42
"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.server.uri, "coap://10.0.0.5");
        assert_eq!(config.client.endpoint_name, "bench-node");
        assert_eq!(config.client.binding_mode, "U");
        assert_eq!(config.coap.max_retransmit, 4);
        assert_eq!(config.simulation.seed, Some(42));

        let settings = config.to_client_settings();
        assert_eq!(settings.lifetime_secs, 300);
        assert_eq!(settings.update_interval(), Duration::from_secs(150));
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device.toml");
        std::fs::write(&path, "[client]\nlifetime_secs = \"soon\"\n").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_default_config_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device.toml");
        save_default_config(&path).unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.client.endpoint_name, "rust-lwm2m-client");

        let params = config.to_transmission_params();
        assert_eq!(params.ack_timeout, Duration::from_millis(2000));
        assert_eq!(params.max_retransmit, 4);
        assert_eq!(params.exchange_lifetime, TransmissionParams::default().exchange_lifetime);
    }
}
