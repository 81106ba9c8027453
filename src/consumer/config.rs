//! Consumer configuration structures

use crate::consumer::error::{ConsumerError, ConsumerResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Extra librdkafka properties that may be passed through.
/// Group, commit and offset-store settings are owned by this crate.
pub const ALLOWED_KAFKA_PROPS: &[&str] = &[
    // Compression settings
    "compression.type",
    // Fetch settings
    "fetch.min.bytes",
    "fetch.wait.max.ms",
    "fetch.max.bytes",
    "max.partition.fetch.bytes",
    // Request settings
    "request.timeout.ms",
    "metadata.max.age.ms",
    "socket.receive.buffer.bytes",
    "socket.send.buffer.bytes",
    // Consumer settings
    "queued.min.messages",
    "queued.max.messages.kbytes",
    "fetch.error.backoff.ms",
    "heartbeat.interval.ms",
    "partition.assignment.strategy",
    // Connection settings
    "reconnect.backoff.ms",
    "reconnect.backoff.max.ms",
    "connections.max.idle.ms",
    "socket.keepalive.enable",
    // Security
    "security.protocol",
    "sasl.mechanisms",
    "sasl.username",
    "sasl.password",
    // Monitoring
    "statistics.interval.ms",
];

/// When marked offsets become durable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CommitMode {
    /// Commit synchronously after every marked message, before the next
    /// message is pulled from the claim
    #[default]
    Sync,
    /// Only mark; the broker client commits marked offsets periodically and
    /// when the generation ends
    Auto,
}

/// Where to start when the group has no committed offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OffsetReset {
    #[default]
    Earliest,
    Latest,
}

impl OffsetReset {
    pub fn as_str(self) -> &'static str {
        match self {
            OffsetReset::Earliest => "earliest",
            OffsetReset::Latest => "latest",
        }
    }
}

/// Consumer group configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Kafka broker addresses (comma-separated)
    pub brokers: String,

    /// Consumer group ID
    pub group_id: String,

    /// Topics to consume from
    pub topics: Vec<String>,

    /// Client identifier reported to the brokers
    pub client_id: String,

    /// Session timeout in milliseconds
    pub session_timeout_ms: u32,

    /// Maximum poll interval in milliseconds
    pub max_poll_interval_ms: u32,

    /// Offset reset policy
    pub auto_offset_reset: OffsetReset,

    /// Commit cadence
    pub commit_mode: CommitMode,

    /// Auto-commit interval in milliseconds (only with `CommitMode::Auto`)
    pub auto_commit_interval_ms: u32,

    /// Per-claim buffer between the fetch loop and the claim handler
    pub channel_buffer_size: usize,

    /// Additional Kafka properties
    pub kafka_properties: HashMap<String, String>,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            group_id: "kafka-handler".to_string(),
            topics: Vec::new(),
            client_id: format!("kafka-handler-{}", uuid::Uuid::new_v4()),
            session_timeout_ms: 30000,
            max_poll_interval_ms: 300000,
            auto_offset_reset: OffsetReset::Earliest,
            commit_mode: CommitMode::Sync,
            auto_commit_interval_ms: 5000,
            channel_buffer_size: 256,
            kafka_properties: HashMap::new(),
        }
    }
}

/// Builder for ConsumerConfig
pub struct ConsumerConfigBuilder {
    config: ConsumerConfig,
}

impl ConsumerConfigBuilder {
    /// Create a new consumer config builder
    pub fn new() -> Self {
        Self {
            config: ConsumerConfig::default(),
        }
    }

    /// Set the broker addresses
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.config.brokers = brokers.into();
        self
    }

    /// Set the consumer group ID
    pub fn group_id(mut self, group_id: impl Into<String>) -> Self {
        self.config.group_id = group_id.into();
        self
    }

    /// Set the topics to consume
    pub fn topics(mut self, topics: Vec<String>) -> Self {
        self.config.topics = topics;
        self
    }

    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.config.client_id = client_id.into();
        self
    }

    pub fn session_timeout_ms(mut self, timeout: u32) -> Self {
        self.config.session_timeout_ms = timeout;
        self
    }

    pub fn auto_offset_reset(mut self, reset: OffsetReset) -> Self {
        self.config.auto_offset_reset = reset;
        self
    }

    /// Set the commit cadence
    pub fn commit_mode(mut self, mode: CommitMode) -> Self {
        self.config.commit_mode = mode;
        self
    }

    /// Set the per-claim channel buffer size
    pub fn channel_buffer_size(mut self, size: usize) -> Self {
        self.config.channel_buffer_size = size;
        self
    }

    /// Add a custom Kafka property
    pub fn kafka_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.kafka_properties.insert(key.into(), value.into());
        self
    }

    /// Build the consumer configuration
    pub fn build(self) -> ConsumerConfig {
        self.config
    }
}

impl Default for ConsumerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsumerConfig {
    /// Create a new consumer config builder
    pub fn builder() -> ConsumerConfigBuilder {
        ConsumerConfigBuilder::new()
    }

    /// Load a YAML configuration file and validate it
    pub fn from_yaml_file(path: impl AsRef<Path>) -> ConsumerResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ConsumerError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&raw)
    }

    /// Parse a YAML document and validate it
    pub fn from_yaml_str(raw: &str) -> ConsumerResult<Self> {
        let config: ConsumerConfig = serde_yaml::from_str(raw)
            .map_err(|e| ConsumerError::Config(format!("invalid YAML: {}", e)))?;
        config.validate().map_err(ConsumerError::Config)?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.brokers.trim().is_empty() {
            return Err("Brokers cannot be empty".to_string());
        }

        if self.group_id.trim().is_empty() {
            return Err("Group ID cannot be empty".to_string());
        }

        if self.topics.is_empty() {
            return Err("Topics cannot be empty".to_string());
        }

        if self.topics.iter().any(|t| t.trim().is_empty()) {
            return Err("Topic names cannot be empty".to_string());
        }

        if self.channel_buffer_size == 0 {
            return Err("Channel buffer size must be greater than 0".to_string());
        }

        if self.commit_mode == CommitMode::Auto && self.auto_commit_interval_ms == 0 {
            return Err("Auto-commit interval must be greater than 0".to_string());
        }

        if let Some(key) = self
            .kafka_properties
            .keys()
            .find(|key| !ALLOWED_KAFKA_PROPS.contains(&key.as_str()))
        {
            return Err(format!("Disallowed Kafka property '{}'", key));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConsumerConfig::default();
        assert_eq!(config.commit_mode, CommitMode::Sync);
        assert_eq!(config.auto_offset_reset, OffsetReset::Earliest);
        assert!(config.client_id.starts_with("kafka-handler-"));
        // no topics by default
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builder() {
        let config = ConsumerConfig::builder()
            .brokers("kafka:9092")
            .group_id("billing")
            .topics(vec!["invoices".to_string()])
            .commit_mode(CommitMode::Auto)
            .kafka_property("fetch.min.bytes", "1024")
            .build();

        assert_eq!(config.brokers, "kafka:9092");
        assert_eq!(config.commit_mode, CommitMode::Auto);
        assert!(config.validate().is_ok());
    }
}
