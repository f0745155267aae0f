//! Configuration for the login insights service
use crate::insights::HourBucketer;
use crate::kafka::{KafkaConsumerConfig, KafkaProducerConfig};
use crate::pipeline::RunnerConfig;
use serde::Deserialize;
use std::time::Duration;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration struct, loaded from environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Kafka broker addresses
    #[serde(default = "default_kafka_brokers")]
    pub kafka_brokers: String,

    /// Consumer group identity
    #[serde(default = "default_kafka_group_id")]
    pub kafka_group_id: String,

    /// Offset reset policy when the group has no committed offset
    #[serde(default = "default_kafka_auto_offset_reset")]
    pub kafka_auto_offset_reset: String,

    /// Topic carrying raw login events
    #[serde(default = "default_kafka_input_topic")]
    pub kafka_input_topic: String,

    /// Topic receiving enriched login events
    #[serde(default = "default_kafka_output_topic")]
    pub kafka_output_topic: String,

    /// Surface end-of-partition markers (they are ignored either way)
    #[serde(default)]
    pub kafka_enable_partition_eof: bool,

    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    /// Maximum wait for one enriched record to be acknowledged
    #[serde(default = "default_flush_timeout_ms")]
    pub flush_timeout_ms: u64,

    /// Offset-out-of-range resets allowed before giving up
    #[serde(default = "default_max_consecutive_offset_resets")]
    pub max_consecutive_offset_resets: u32,

    /// Time zone for hourly login buckets: `local`, `utc` or `+HH:MM`
    #[serde(default = "default_bucket_timezone")]
    pub bucket_timezone: String,
}

fn default_kafka_brokers() -> String {
    "localhost:29092".to_string()
}

fn default_kafka_group_id() -> String {
    "my_consumer_group".to_string()
}

fn default_kafka_auto_offset_reset() -> String {
    "earliest".to_string()
}

fn default_kafka_input_topic() -> String {
    "user-login".to_string()
}

fn default_kafka_output_topic() -> String {
    "processed-user-login".to_string()
}

fn default_poll_timeout_ms() -> u64 {
    1000
}

fn default_flush_timeout_ms() -> u64 {
    10_000
}

fn default_max_consecutive_offset_resets() -> u32 {
    5
}

fn default_bucket_timezone() -> String {
    "local".to_string()
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let config: Config = envy::from_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("KAFKA_BROKERS", &self.kafka_brokers),
            ("KAFKA_GROUP_ID", &self.kafka_group_id),
            ("KAFKA_INPUT_TOPIC", &self.kafka_input_topic),
            ("KAFKA_OUTPUT_TOPIC", &self.kafka_output_topic),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{} must not be empty", name)));
            }
        }

        if !matches!(
            self.kafka_auto_offset_reset.as_str(),
            "earliest" | "latest" | "smallest" | "largest" | "beginning" | "end" | "error"
        ) {
            return Err(ConfigError::Invalid(format!(
                "unsupported KAFKA_AUTO_OFFSET_RESET '{}'",
                self.kafka_auto_offset_reset
            )));
        }

        if self.poll_timeout_ms == 0 || self.flush_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "POLL_TIMEOUT_MS and FLUSH_TIMEOUT_MS must be positive".to_string(),
            ));
        }

        if self.max_consecutive_offset_resets == 0 {
            return Err(ConfigError::Invalid(
                "MAX_CONSECUTIVE_OFFSET_RESETS must be at least 1".to_string(),
            ));
        }

        self.bucketer()?;
        Ok(())
    }

    pub fn bucketer(&self) -> Result<HourBucketer, ConfigError> {
        self.bucket_timezone
            .parse::<HourBucketer>()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn consumer_config(&self) -> KafkaConsumerConfig {
        KafkaConsumerConfig {
            brokers: self.kafka_brokers.clone(),
            group_id: self.kafka_group_id.clone(),
            auto_offset_reset: self.kafka_auto_offset_reset.clone(),
            enable_partition_eof: self.kafka_enable_partition_eof,
            ..KafkaConsumerConfig::default()
        }
    }

    pub fn producer_config(&self) -> KafkaProducerConfig {
        KafkaProducerConfig {
            brokers: self.kafka_brokers.clone(),
            ..KafkaProducerConfig::default()
        }
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            input_topic: self.kafka_input_topic.clone(),
            output_topic: self.kafka_output_topic.clone(),
            poll_timeout: Duration::from_millis(self.poll_timeout_ms),
            flush_timeout: Duration::from_millis(self.flush_timeout_ms),
            max_consecutive_offset_resets: self.max_consecutive_offset_resets,
        }
    }
}
