//! Kafka input stream
//!
//! Wraps a `BaseConsumer` so the pipeline can poll it synchronously, one
//! message per iteration.

use super::{InboundMessage, InputStream, PartitionRef, StreamError, StreamErrorCode};
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::Message;
use rdkafka::{ClientConfig, Offset};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Seek requests are local to the client, this only bounds the wait for the fetcher
const SEEK_TIMEOUT: Duration = Duration::from_secs(5);

/// Kafka consumer configuration
#[derive(Debug, Clone)]
pub struct KafkaConsumerConfig {
    pub brokers: String,
    pub group_id: String,
    /// Where to start when the group has no committed offset (`earliest`/`latest`)
    pub auto_offset_reset: String,
    /// Surface end-of-partition markers to the poll loop
    pub enable_partition_eof: bool,
    pub session_timeout_ms: u32,
}

impl Default for KafkaConsumerConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:29092".to_string(),
            group_id: "my_consumer_group".to_string(),
            auto_offset_reset: "earliest".to_string(),
            enable_partition_eof: false,
            session_timeout_ms: 45_000,
        }
    }
}

/// `InputStream` backed by an rdkafka `BaseConsumer`
pub struct KafkaInputStream {
    consumer: Option<BaseConsumer>,
    group_id: String,
}

impl KafkaInputStream {
    /// Create a consumer. Nothing is fetched until `subscribe` is called.
    pub fn new(config: &KafkaConsumerConfig) -> Result<Self, KafkaError> {
        let consumer: BaseConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.group_id)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "true")
            .set("session.timeout.ms", config.session_timeout_ms.to_string())
            .set(
                "enable.partition.eof",
                if config.enable_partition_eof { "true" } else { "false" },
            )
            .create()?;

        info!(
            brokers = %config.brokers,
            group_id = %config.group_id,
            auto_offset_reset = %config.auto_offset_reset,
            "Kafka consumer created"
        );

        Ok(Self {
            consumer: Some(consumer),
            group_id: config.group_id.clone(),
        })
    }

    fn consumer(&self) -> Result<&BaseConsumer, StreamError> {
        self.consumer
            .as_ref()
            .ok_or_else(|| StreamError::other("consumer is closed"))
    }
}

impl InputStream for KafkaInputStream {
    fn subscribe(&mut self, topics: &[&str]) -> Result<(), StreamError> {
        self.consumer()?.subscribe(topics)?;
        info!(group_id = %self.group_id, topics = ?topics, "Kafka consumer subscribed");
        Ok(())
    }

    fn poll(&mut self, timeout: Duration) -> Option<Result<InboundMessage, StreamError>> {
        let consumer = self.consumer.as_ref()?;
        let result = consumer.poll(timeout)?;
        Some(
            result
                .map(|message| InboundMessage {
                    topic: message.topic().to_string(),
                    partition: message.partition(),
                    offset: message.offset(),
                    payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
                })
                .map_err(StreamError::from),
        )
    }

    fn assignment(&self) -> Result<Vec<PartitionRef>, StreamError> {
        let Some(consumer) = self.consumer.as_ref() else {
            return Ok(Vec::new());
        };
        let assignment = consumer.assignment()?;
        Ok(assignment
            .elements()
            .iter()
            .map(|elem| PartitionRef::new(elem.topic(), elem.partition()))
            .collect())
    }

    fn seek_to_beginning(&mut self, partitions: &[PartitionRef]) -> Result<(), StreamError> {
        let consumer = self.consumer()?;
        for partition in partitions {
            consumer.seek(
                &partition.topic,
                partition.partition,
                Offset::Beginning,
                SEEK_TIMEOUT,
            )?;
            debug!(partition = %partition, "Seeked to beginning");
        }
        Ok(())
    }

    fn close(&mut self) {
        let Some(consumer) = self.consumer.take() else {
            return;
        };
        consumer.unsubscribe();
        // Dropping the consumer leaves the group and commits the final offsets
        drop(consumer);
        info!(group_id = %self.group_id, "Kafka consumer closed");
    }
}

impl Drop for KafkaInputStream {
    fn drop(&mut self) {
        if self.consumer.is_some() {
            warn!(group_id = %self.group_id, "Kafka consumer dropped without close");
            self.close();
        }
    }
}

/// Map an rdkafka error onto the codes the pipeline reacts to
pub fn classify(err: &KafkaError) -> StreamErrorCode {
    match err {
        KafkaError::PartitionEOF(_) => StreamErrorCode::PartitionEof,
        _ if err.rdkafka_error_code() == Some(RDKafkaErrorCode::OffsetOutOfRange) => {
            StreamErrorCode::OffsetOutOfRange
        }
        _ => StreamErrorCode::Other,
    }
}

impl From<KafkaError> for StreamError {
    fn from(err: KafkaError) -> Self {
        StreamError::new(classify(&err), err.to_string())
    }
}
