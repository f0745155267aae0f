//! Stream capabilities for the login insights pipeline
//!
//! The pipeline only talks to the `InputStream` and `OutputStream` traits:
//! - Consumer: `KafkaInputStream`, a `BaseConsumer` polled one message at a time
//! - Producer: `KafkaOutputStream`, a `BaseProducer` flushed after every send
//!
//! Tests drive the pipeline with in-memory implementations of the same traits.

pub mod consumer;
pub mod producer;

use std::fmt;
use std::time::Duration;

pub use consumer::{KafkaConsumerConfig, KafkaInputStream};
pub use producer::{KafkaOutputStream, KafkaProducerConfig};

/// Classification of a stream error, as far as the pipeline cares
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamErrorCode {
    /// Reached the end of a partition; more data may arrive later
    PartitionEof,
    /// The committed/requested offset no longer exists on the broker
    OffsetOutOfRange,
    /// Anything else
    Other,
}

/// Error raised by an input or output stream
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {detail}")]
pub struct StreamError {
    pub code: StreamErrorCode,
    pub detail: String,
}

impl StreamError {
    pub fn new(code: StreamErrorCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
        }
    }

    pub fn other(detail: impl Into<String>) -> Self {
        Self::new(StreamErrorCode::Other, detail)
    }
}

impl fmt::Display for StreamErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamErrorCode::PartitionEof => f.write_str("partition EOF"),
            StreamErrorCode::OffsetOutOfRange => f.write_str("offset out of range"),
            StreamErrorCode::Other => f.write_str("stream error"),
        }
    }
}

/// A topic partition currently assigned to the consumer
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionRef {
    pub topic: String,
    pub partition: i32,
}

impl PartitionRef {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for PartitionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.topic, self.partition)
    }
}

/// Message read from the input stream, detached from the client's buffers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub payload: Vec<u8>,
}

/// Source of event records
pub trait InputStream {
    fn subscribe(&mut self, topics: &[&str]) -> Result<(), StreamError>;

    /// Wait up to `timeout` for the next message.
    ///
    /// `None` means nothing arrived in time. End-of-partition and offset
    /// conditions come back as `Some(Err(_))` with the matching code.
    fn poll(&mut self, timeout: Duration) -> Option<Result<InboundMessage, StreamError>>;

    fn assignment(&self) -> Result<Vec<PartitionRef>, StreamError>;

    /// Move the read position of `partitions` to the earliest available offset
    fn seek_to_beginning(&mut self, partitions: &[PartitionRef]) -> Result<(), StreamError>;

    /// Leave the group and release partition assignments.
    /// Calling it more than once has no further effect.
    fn close(&mut self);
}

/// Sink for enriched records
pub trait OutputStream {
    /// Enqueue `payload` for `topic`. Delivery is only confirmed by `flush`.
    fn send(&mut self, topic: &str, payload: &[u8]) -> Result<(), StreamError>;

    /// Block until every enqueued message is delivered or `timeout` expires
    fn flush(&mut self, timeout: Duration) -> Result<(), StreamError>;
}
