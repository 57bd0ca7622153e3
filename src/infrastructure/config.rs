//! Gateway configuration: the cluster catalogue and operation timeouts, loaded once at
//! startup from a JSON file and read-only afterwards.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::domain::{ClusterSettings, SerdeFormat, ServiceTimeouts};

pub const VALID_SASL_MECHANISMS: &[&str] = &["PLAIN", "SCRAM-SHA-256", "SCRAM-SHA-512", "GSSAPI", "OAUTHBEARER"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration from {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("no clusters configured")]
    NoClusters,

    #[error("cluster name cannot be empty")]
    EmptyClusterName,

    #[error("cluster '{0}' is configured more than once")]
    DuplicateCluster(String),

    #[error("cluster '{0}' has no broker addresses")]
    NoBrokers(String),

    #[error("cluster '{cluster}' has invalid security settings: {reason}")]
    InvalidSecurity { cluster: String, reason: String },

    #[error("timeout '{0}' must be greater than zero")]
    ZeroTimeout(&'static str),
}

/// Top-level configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub clusters: Vec<ClusterConfig>,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

impl GatewayConfig {
    /// A configuration with a single plaintext cluster
    pub fn single(name: impl Into<String>, brokers: Vec<String>) -> Self {
        Self {
            clusters: vec![ClusterConfig::new(name, brokers)],
            timeouts: TimeoutConfig::default(),
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&contents)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: GatewayConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.clusters.is_empty() {
            return Err(ConfigError::NoClusters);
        }
        let mut seen = HashSet::new();
        for cluster in &self.clusters {
            cluster.validate()?;
            if !seen.insert(cluster.name.as_str()) {
                return Err(ConfigError::DuplicateCluster(cluster.name.clone()));
            }
        }
        self.timeouts.validate()
    }
}

/// Connection settings of one named cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub name: String,
    pub brokers: Vec<String>,
    #[serde(default)]
    pub security: SecurityConfig,
    /// Raw client properties, applied after everything else
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    #[serde(default)]
    pub key_format: SerdeFormat,
    #[serde(default)]
    pub value_format: SerdeFormat,
    #[serde(default)]
    pub acks: Acks,
    #[serde(default)]
    pub hide_internal_topics: bool,
}

impl ClusterConfig {
    pub fn new(name: impl Into<String>, brokers: Vec<String>) -> Self {
        Self {
            name: name.into(),
            brokers,
            security: SecurityConfig::default(),
            properties: BTreeMap::new(),
            key_format: SerdeFormat::default(),
            value_format: SerdeFormat::default(),
            acks: Acks::default(),
            hide_internal_topics: false,
        }
    }

    pub fn bootstrap_servers(&self) -> String {
        self.brokers.join(",")
    }

    pub fn settings(&self) -> ClusterSettings {
        ClusterSettings {
            key_format: self.key_format,
            value_format: self.value_format,
            hide_internal_topics: self.hide_internal_topics,
        }
    }

    /// Client properties shared by the admin, producer and consumer clients
    pub fn client_properties(&self) -> BTreeMap<String, String> {
        let mut properties = BTreeMap::new();
        properties.insert("bootstrap.servers".to_string(), self.bootstrap_servers());
        properties.insert("client.id".to_string(), format!("kafka-gateway-{}", self.name));
        self.security.apply(&mut properties);
        for (key, value) in &self.properties {
            properties.insert(key.clone(), value.clone());
        }
        properties
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyClusterName);
        }
        if self.brokers.iter().all(|b| b.trim().is_empty()) {
            return Err(ConfigError::NoBrokers(self.name.clone()));
        }
        self.security
            .validate()
            .map_err(|reason| ConfigError::InvalidSecurity {
                cluster: self.name.clone(),
                reason,
            })
    }
}

/// Producer acknowledgment level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Acks {
    #[serde(rename = "0")]
    None,
    #[serde(rename = "1")]
    Leader,
    #[default]
    #[serde(rename = "all")]
    All,
}

impl Acks {
    pub fn as_str(&self) -> &'static str {
        match self {
            Acks::None => "0",
            Acks::Leader => "1",
            Acks::All => "all",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityProtocol {
    #[default]
    Plaintext,
    Ssl,
    SaslPlaintext,
    SaslSsl,
}

impl SecurityProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityProtocol::Plaintext => "plaintext",
            SecurityProtocol::Ssl => "ssl",
            SecurityProtocol::SaslPlaintext => "sasl_plaintext",
            SecurityProtocol::SaslSsl => "sasl_ssl",
        }
    }

    pub fn uses_sasl(&self) -> bool {
        matches!(self, SecurityProtocol::SaslPlaintext | SecurityProtocol::SaslSsl)
    }
}

impl fmt::Display for SecurityProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub protocol: SecurityProtocol,
    pub sasl_mechanism: Option<String>,
    pub sasl_username: Option<String>,
    pub sasl_password: Option<String>,
    pub ssl_ca_location: Option<String>,
}

// Keeps the password out of logs
impl fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("protocol", &self.protocol)
            .field("sasl_mechanism", &self.sasl_mechanism)
            .field("sasl_username", &self.sasl_username)
            .field("sasl_password", &self.sasl_password.as_ref().map(|_| "***"))
            .field("ssl_ca_location", &self.ssl_ca_location)
            .finish()
    }
}

impl SecurityConfig {
    fn validate(&self) -> Result<(), String> {
        if let Some(mechanism) = &self.sasl_mechanism {
            if !VALID_SASL_MECHANISMS.contains(&mechanism.as_str()) {
                return Err(format!(
                    "unknown sasl_mechanism '{}', expected one of: {}",
                    mechanism,
                    VALID_SASL_MECHANISMS.join(", ")
                ));
            }
        }
        if self.sasl_username.is_some() != self.sasl_password.is_some() {
            return Err("sasl_username and sasl_password must be set together".to_string());
        }
        if self.protocol.uses_sasl() && self.sasl_mechanism.is_none() {
            return Err(format!("protocol {} requires a sasl_mechanism", self.protocol));
        }
        Ok(())
    }

    fn apply(&self, properties: &mut BTreeMap<String, String>) {
        properties.insert("security.protocol".to_string(), self.protocol.as_str().to_string());
        let optional = [
            ("sasl.mechanism", &self.sasl_mechanism),
            ("sasl.username", &self.sasl_username),
            ("sasl.password", &self.sasl_password),
            ("ssl.ca.location", &self.ssl_ca_location),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                properties.insert(key.to_string(), value.clone());
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub admin_timeout_ms: u64,
    pub produce_timeout_ms: u64,
    pub consume_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub shutdown_timeout_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            admin_timeout_ms: 10_000,
            produce_timeout_ms: 10_000,
            consume_timeout_ms: 3_000,
            poll_interval_ms: 250,
            shutdown_timeout_ms: 5_000,
        }
    }
}

impl TimeoutConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let entries = [
            ("admin_timeout_ms", self.admin_timeout_ms),
            ("produce_timeout_ms", self.produce_timeout_ms),
            ("consume_timeout_ms", self.consume_timeout_ms),
            ("poll_interval_ms", self.poll_interval_ms),
            ("shutdown_timeout_ms", self.shutdown_timeout_ms),
        ];
        match entries.iter().find(|(_, value)| *value == 0) {
            Some((name, _)) => Err(ConfigError::ZeroTimeout(name)),
            None => Ok(()),
        }
    }

    pub fn service_timeouts(&self) -> ServiceTimeouts {
        ServiceTimeouts {
            admin: Duration::from_millis(self.admin_timeout_ms),
            produce: Duration::from_millis(self.produce_timeout_ms),
            consume: Duration::from_millis(self.consume_timeout_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "clusters": [
            {
                "name": "local",
                "brokers": ["localhost:9092"]
            },
            {
                "name": "prod",
                "brokers": ["kafka-1:9093", "kafka-2:9093"],
                "security": {
                    "protocol": "sasl_ssl",
                    "sasl_mechanism": "SCRAM-SHA-512",
                    "sasl_username": "gateway",
                    "sasl_password": "secret"
                },
                "properties": { "client.id": "ops-gateway" },
                "value_format": "json",
                "acks": "1",
                "hide_internal_topics": true
            }
        ],
        "timeouts": { "consume_timeout_ms": 1500 }
    }"#;

    #[test]
    fn parses_clusters_with_defaults() {
        let config = GatewayConfig::from_json(SAMPLE).unwrap();

        let local = &config.clusters[0];
        assert_eq!(local.acks, Acks::All);
        assert_eq!(local.key_format, SerdeFormat::String);
        assert!(!local.hide_internal_topics);

        let prod = &config.clusters[1];
        assert_eq!(prod.bootstrap_servers(), "kafka-1:9093,kafka-2:9093");
        assert_eq!(prod.value_format, SerdeFormat::Json);
        assert_eq!(prod.acks, Acks::Leader);

        assert_eq!(config.timeouts.consume_timeout_ms, 1500);
        assert_eq!(config.timeouts.admin_timeout_ms, 10_000);
    }

    #[test]
    fn user_properties_override_derived_ones() {
        let config = GatewayConfig::from_json(SAMPLE).unwrap();
        let properties = config.clusters[1].client_properties();

        assert_eq!(properties["client.id"], "ops-gateway");
        assert_eq!(properties["security.protocol"], "sasl_ssl");
        assert_eq!(properties["sasl.mechanism"], "SCRAM-SHA-512");
        assert!(!properties.contains_key("ssl.ca.location"));
    }

    #[test]
    fn rejects_duplicate_clusters() {
        let mut config = GatewayConfig::single("local", vec!["localhost:9092".to_string()]);
        config.clusters.push(config.clusters[0].clone());

        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateCluster(name)) if name == "local"
        ));
    }

    #[test]
    fn rejects_clusters_without_brokers() {
        let config = GatewayConfig::single("empty", vec![" ".to_string()]);
        assert!(matches!(config.validate(), Err(ConfigError::NoBrokers(_))));
    }

    #[test]
    fn rejects_half_configured_sasl() {
        let mut cluster = ClusterConfig::new("secure", vec!["kafka:9093".to_string()]);
        cluster.security.protocol = SecurityProtocol::SaslSsl;
        cluster.security.sasl_mechanism = Some("PLAIN".to_string());
        cluster.security.sasl_username = Some("user".to_string());

        assert!(matches!(
            cluster.validate(),
            Err(ConfigError::InvalidSecurity { .. })
        ));
    }

    #[test]
    fn rejects_zero_timeouts() {
        let mut config = GatewayConfig::single("local", vec!["localhost:9092".to_string()]);
        config.timeouts.poll_interval_ms = 0;

        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroTimeout("poll_interval_ms"))
        ));
    }

    #[test]
    fn debug_output_masks_password() {
        let security = SecurityConfig {
            sasl_password: Some("hunter2".to_string()),
            ..Default::default()
        };
        assert!(!format!("{:?}", security).contains("hunter2"));
    }
}
