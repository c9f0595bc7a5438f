use crate::error::ConfigError;

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

pub const DEFAULT_ADDRESS: &str = "0.0.0.0";
pub const DEFAULT_NETWORK_TYPE: &str = "ip4:tcp";

/// Pacing shared by every job: wait `interval_ms` before each iteration and stop after
/// `count` iterations (0 means no limit)
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct BasicJobConfig {
    #[serde(default)]
    pub interval_ms: u64,
    #[serde(default)]
    pub count: u64,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkConfig {
    #[serde(default)]
    pub address: String,
    #[serde(default, alias = "name")]
    pub network_type: String,
}

impl NetworkConfig {
    pub fn with_defaults(mut self) -> Self {
        if self.address.is_empty() {
            self.address = DEFAULT_ADDRESS.to_string();
        }
        if self.network_type.is_empty() {
            self.network_type = DEFAULT_NETWORK_TYPE.to_string();
        }
        self
    }
}

/// The arguments of a flood job
#[derive(Deserialize, Debug, Clone)]
pub struct JobConfig {
    #[serde(flatten)]
    pub basic: BasicJobConfig,
    /// Packet template: field name to literal or template expression, arbitrarily nested
    #[serde(default)]
    pub packet: Map<String, Value>,
    #[serde(default)]
    pub network: NetworkConfig,
    pub host: String,
    #[serde(deserialize_with = "string_or_integer")]
    pub port: String,
    /// Seed of the packet template random generator
    #[serde(default)]
    pub seed: Option<u64>,
}

fn string_or_integer<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrInteger {
        String(String),
        Integer(i64),
    }
    Ok(match StringOrInteger::deserialize(deserializer)? {
        StringOrInteger::String(s) => s,
        StringOrInteger::Integer(i) => i.to_string(),
    })
}

impl JobConfig {
    pub fn from_toml(config: &str) -> Result<Self, ConfigError> {
        toml::from_str(config).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn from_json(config: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(config).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load a job file. Files ending in ".json" are read as JSON, anything else as TOML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => JobConfig::from_json(&content)?,
            _ => JobConfig::from_toml(&content)?,
        };
        log::trace!("Job configuration: {config:?}");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_network_defaults() {
        let network = NetworkConfig::default().with_defaults();
        assert_eq!(network.address, "0.0.0.0");
        assert_eq!(network.network_type, "ip4:tcp");

        let network = NetworkConfig {
            address: "192.168.0.3".into(),
            network_type: "ip4:udp".into(),
        }
        .with_defaults();
        assert_eq!(network.address, "192.168.0.3");
        assert_eq!(network.network_type, "ip4:udp");
    }

    #[test]
    fn test_config_toml() {
        let config = JobConfig::from_toml(
            r#"
interval_ms = 10
count = 3
host = "10.0.0.1"
port = 53
seed = 42

[network]
name = "ip4:udp"

[packet]
payload = "ping"

[packet.udp]
src_port = "{{ random_port }}"
"#,
        )
        .unwrap();
        assert_eq!(
            config.basic,
            BasicJobConfig {
                interval_ms: 10,
                count: 3
            }
        );
        assert_eq!(config.host, "10.0.0.1");
        assert_eq!(config.port, "53");
        assert_eq!(config.seed, Some(42));
        assert_eq!(config.network.network_type, "ip4:udp");
        assert_eq!(config.network.address, "");
        assert_eq!(
            Value::Object(config.packet),
            json!({ "payload": "ping", "udp": { "src_port": "{{ random_port }}" } })
        );
    }

    #[test]
    fn test_config_json() {
        let config = JobConfig::from_json(
            r#"{
    "host": "{{ local_ip }}",
    "port": "{{ random_port }}",
    "packet": { "tcp": { "flags": "S" } }
}"#,
        )
        .unwrap();
        assert_eq!(config.basic, BasicJobConfig::default());
        assert_eq!(config.port, "{{ random_port }}");
        assert_eq!(config.network, NetworkConfig::default());
        assert!(config.packet.contains_key("tcp"));
    }

    #[test]
    fn test_config_errors() {
        assert!(matches!(
            JobConfig::from_toml("port = \"80\""),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            JobConfig::from_toml("host = \"a\"\nport = [1]"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            JobConfig::from_file(Path::new("/nonexistent/job.toml")),
            Err(ConfigError::Io(_))
        ));
    }
}
