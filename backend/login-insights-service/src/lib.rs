//! Login Insights Service - enriches user-login events and aggregates per-locale insights
//!
//! This service provides:
//! - A poll → enrich → publish pipeline over Kafka with offset-out-of-range recovery
//! - In-memory per-locale counters (device type, app version, hourly logins)
//! - A final insights report printed on shutdown

pub mod config;
pub mod error;
pub mod insights;
pub mod kafka;
pub mod pipeline;

pub use config::{Config, ConfigError};
pub use error::PipelineError;
pub use insights::{
    AggregationError, AggregationStore, Counter, HourBucketer, InsightsReport, InsightsSnapshot,
    LocaleInsight, LoginFields,
};
pub use kafka::{
    InboundMessage, InputStream, KafkaInputStream, KafkaOutputStream, OutputStream, PartitionRef,
    StreamError, StreamErrorCode,
};
pub use pipeline::{
    PipelineRunner, PipelineStats, RunSummary, RunnerConfig, RunnerState, ShutdownSignal,
};
