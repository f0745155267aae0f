//! Login Insights Service - Main entry point
//!
//! Consumes user-login events, republishes them with a processing timestamp
//! and prints per-locale insights when stopped with Ctrl-C.

use anyhow::Result;
use login_insights_service::{
    AggregationStore, Config, InputStream, KafkaInputStream, KafkaOutputStream, OutputStream,
    PipelineRunner, ShutdownSignal,
};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "login_insights_service=debug,rdkafka=warn,info".into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        anyhow::anyhow!("Configuration error: {}", e)
    })?;

    let bucketer = config.bucketer()?;
    info!(
        input_topic = %config.kafka_input_topic,
        output_topic = %config.kafka_output_topic,
        bucket_timezone = %bucketer,
        "Configuration loaded"
    );

    let input = KafkaInputStream::new(&config.consumer_config()).map_err(|e| {
        error!("Failed to create Kafka consumer: {}", e);
        anyhow::anyhow!("Kafka consumer error: {}", e)
    })?;

    let output = KafkaOutputStream::new(&config.producer_config()).map_err(|e| {
        error!("Failed to create Kafka producer: {}", e);
        anyhow::anyhow!("Kafka producer error: {}", e)
    })?;

    let store = AggregationStore::new(bucketer);
    let shutdown = ShutdownSignal::new();
    let runner = PipelineRunner::new(
        input,
        output,
        store,
        config.runner_config(),
        shutdown.clone(),
    );

    run_until_stopped(runner, shutdown).await
}

/// Drive the blocking poll loop on its own thread and stop it on Ctrl-C
async fn run_until_stopped<I, O>(
    mut runner: PipelineRunner<I, O>,
    shutdown: ShutdownSignal,
) -> Result<()>
where
    I: InputStream + Send + 'static,
    O: OutputStream + Send + 'static,
{
    let signal_watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            shutdown.trigger();
        }
    });

    let outcome = tokio::task::spawn_blocking(move || runner.run()).await?;
    signal_watcher.abort();

    match outcome {
        Ok(summary) => {
            info!(
                messages_processed = summary.stats.messages_processed,
                locales = summary.locales,
                "Login insights service stopped"
            );
            Ok(())
        }
        Err(e) => {
            error!("Pipeline stopped on error: {}", e);
            Err(e.into())
        }
    }
}
