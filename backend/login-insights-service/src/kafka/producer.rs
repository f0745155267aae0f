//! Kafka output stream
//!
//! Publishes enriched records through a `BaseProducer`. Delivery reports are
//! collected by the producer context and checked on every flush.

use super::{OutputStream, StreamError};
use rdkafka::client::ClientContext;
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use rdkafka::producer::{BaseProducer, BaseRecord, DeliveryResult, Producer, ProducerContext};
use rdkafka::ClientConfig;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Kafka producer configuration
#[derive(Debug, Clone)]
pub struct KafkaProducerConfig {
    pub brokers: String,
    /// Upper bound for a single delivery, including client retries
    pub message_timeout_ms: u32,
}

impl Default for KafkaProducerConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:29092".to_string(),
            message_timeout_ms: 30_000,
        }
    }
}

/// Counts failed deliveries reported by librdkafka
struct DeliveryTracker {
    failures: Arc<AtomicU64>,
}

impl ClientContext for DeliveryTracker {}

impl ProducerContext for DeliveryTracker {
    type DeliveryOpaque = ();

    fn delivery(&self, delivery_result: &DeliveryResult<'_>, _: Self::DeliveryOpaque) {
        if let Err((err, message)) = delivery_result {
            self.failures.fetch_add(1, Ordering::Relaxed);
            error!(
                topic = message.topic(),
                partition = message.partition(),
                error = %err,
                "Failed to deliver enriched record"
            );
        }
    }
}

/// `OutputStream` backed by an rdkafka `BaseProducer`
pub struct KafkaOutputStream {
    producer: BaseProducer<DeliveryTracker>,
    failed_deliveries: Arc<AtomicU64>,
}

impl KafkaOutputStream {
    pub fn new(config: &KafkaProducerConfig) -> Result<Self, KafkaError> {
        let failed_deliveries = Arc::new(AtomicU64::new(0));
        let context = DeliveryTracker {
            failures: failed_deliveries.clone(),
        };

        let producer: BaseProducer<DeliveryTracker> = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", config.message_timeout_ms.to_string())
            .set("acks", "all")
            .create_with_context(context)?;

        info!(brokers = %config.brokers, "Kafka producer created");

        Ok(Self {
            producer,
            failed_deliveries,
        })
    }
}

impl OutputStream for KafkaOutputStream {
    fn send(&mut self, topic: &str, payload: &[u8]) -> Result<(), StreamError> {
        let record = BaseRecord::<(), [u8]>::to(topic).payload(payload);
        self.producer
            .send(record)
            .map_err(|(err, _)| StreamError::from(err))
    }

    fn flush(&mut self, timeout: Duration) -> Result<(), StreamError> {
        self.producer.flush(timeout)?;

        let failed = self.failed_deliveries.swap(0, Ordering::Relaxed);
        if failed > 0 {
            return Err(StreamError::other(format!(
                "{} record(s) failed delivery",
                failed
            )));
        }
        Ok(())
    }
}
