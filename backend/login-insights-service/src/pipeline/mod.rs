//! Poll → enrich → aggregate → publish loop
//!
//! `PipelineRunner` owns both streams and the aggregation store. It runs as a
//! small state machine:
//!
//! ```text
//! RUNNING --(shutdown signal | fatal error)--> DRAINING --(input closed)--> STOPPED
//! ```
//!
//! Entering `STOPPED` writes the final insights report exactly once.

pub mod enrich;

use crate::error::{PipelineError, Result};
use crate::insights::{AggregationStore, InsightsReport};
use crate::kafka::{
    InboundMessage, InputStream, OutputStream, PartitionRef, StreamError, StreamErrorCode,
};
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Runner settings
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub input_topic: String,
    pub output_topic: String,
    pub poll_timeout: Duration,
    /// Upper bound for confirming delivery of one enriched record
    pub flush_timeout: Duration,
    /// Offset resets allowed without a successfully processed message in between
    pub max_consecutive_offset_resets: u32,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            input_topic: "user-login".to_string(),
            output_topic: "processed-user-login".to_string(),
            poll_timeout: Duration::from_secs(1),
            flush_timeout: Duration::from_secs(10),
            max_consecutive_offset_resets: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Running,
    Draining,
    Stopped,
}

/// Cooperative stop flag shared between the runner and whoever handles signals
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Counters describing one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub messages_processed: u64,
    pub records_published: u64,
    pub offset_resets: u64,
    pub malformed_timestamps: u64,
    pub partition_eofs: u64,
}

/// Returned when the runner stopped because shutdown was requested
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub stats: PipelineStats,
    pub locales: usize,
}

/// Source of "now" in unix seconds
pub type Clock = Box<dyn Fn() -> i64 + Send>;

fn system_clock() -> i64 {
    chrono::Utc::now().timestamp()
}

pub struct PipelineRunner<I, O> {
    input: I,
    output: O,
    store: AggregationStore,
    config: RunnerConfig,
    shutdown: ShutdownSignal,
    state: RunnerState,
    transitions: Vec<RunnerState>,
    stats: PipelineStats,
    consecutive_offset_resets: u32,
    clock: Clock,
    report_out: Box<dyn Write + Send>,
}

impl<I: InputStream, O: OutputStream> PipelineRunner<I, O> {
    pub fn new(
        input: I,
        output: O,
        store: AggregationStore,
        config: RunnerConfig,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            input,
            output,
            store,
            config,
            shutdown,
            state: RunnerState::Running,
            transitions: vec![RunnerState::Running],
            stats: PipelineStats::default(),
            consecutive_offset_resets: 0,
            clock: Box::new(system_clock),
            report_out: Box::new(io::stdout()),
        }
    }

    /// Replace the time source used for `processed_timestamp`
    pub fn with_clock(mut self, clock: impl Fn() -> i64 + Send + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Write the final report somewhere other than stdout
    pub fn with_report_writer(mut self, out: impl Write + Send + 'static) -> Self {
        self.report_out = Box::new(out);
        self
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    /// Every state the runner has been in, oldest first
    pub fn transitions(&self) -> &[RunnerState] {
        &self.transitions
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn store(&self) -> &AggregationStore {
        &self.store
    }

    pub fn input(&self) -> &I {
        &self.input
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    /// Report over everything aggregated so far
    pub fn report(&self) -> InsightsReport {
        InsightsReport::new(self.store.snapshot())
    }

    /// Run until shutdown is requested or a fatal error occurs.
    ///
    /// Both exits go through DRAINING: the input stream is closed and the
    /// report is written before returning. A stopped runner cannot be restarted.
    pub fn run(&mut self) -> Result<RunSummary> {
        if self.state != RunnerState::Running {
            return Err(PipelineError::AlreadyStopped);
        }

        info!(
            input_topic = %self.config.input_topic,
            output_topic = %self.config.output_topic,
            poll_timeout_ms = self.config.poll_timeout.as_millis() as u64,
            "Starting login insights pipeline"
        );

        let outcome = self.consume();
        if let Err(e) = &outcome {
            error!(error = %e, kind = e.kind(), "Fatal pipeline error, draining");
        }

        self.drain();
        self.stop();

        outcome.map(|()| RunSummary {
            stats: self.stats,
            locales: self.store.len(),
        })
    }

    fn consume(&mut self) -> Result<()> {
        self.input
            .subscribe(&[self.config.input_topic.as_str()])
            .map_err(PipelineError::Input)?;

        while !self.shutdown.is_triggered() {
            self.step()?;
        }

        info!("Shutdown requested, draining");
        Ok(())
    }

    /// One poll-process-publish cycle
    fn step(&mut self) -> Result<()> {
        match self.input.poll(self.config.poll_timeout) {
            None => Ok(()),
            Some(Ok(message)) => self.process(message),
            Some(Err(err)) => self.handle_stream_error(err),
        }
    }

    fn handle_stream_error(&mut self, err: StreamError) -> Result<()> {
        match err.code {
            StreamErrorCode::PartitionEof => {
                self.stats.partition_eofs += 1;
                debug!(detail = %err.detail, "Reached end of partition");
                Ok(())
            }
            StreamErrorCode::OffsetOutOfRange => self.reset_offsets(&err),
            StreamErrorCode::Other => Err(PipelineError::Input(err)),
        }
    }

    fn reset_offsets(&mut self, err: &StreamError) -> Result<()> {
        if self.consecutive_offset_resets >= self.config.max_consecutive_offset_resets {
            return Err(PipelineError::OffsetResetExhausted(
                self.consecutive_offset_resets,
            ));
        }

        let partitions = self.input.assignment().map_err(PipelineError::OffsetReset)?;
        self.input
            .seek_to_beginning(&partitions)
            .map_err(PipelineError::OffsetReset)?;

        self.consecutive_offset_resets += 1;
        self.stats.offset_resets += 1;
        warn!(
            detail = %err.detail,
            partitions = ?partitions.iter().map(PartitionRef::to_string).collect::<Vec<_>>(),
            attempt = self.consecutive_offset_resets,
            "Offset out of range, reset to the earliest offset"
        );
        Ok(())
    }

    fn process(&mut self, message: InboundMessage) -> Result<()> {
        let processed_at = (self.clock)();
        let enriched = enrich::enrich(&mut self.store, &message.payload, processed_at).map_err(
            |source| PipelineError::Decode {
                partition: PartitionRef::new(message.topic.clone(), message.partition),
                offset: message.offset,
                source,
            },
        )?;

        self.stats.messages_processed += 1;
        self.consecutive_offset_resets = 0;

        if let Some(err) = &enriched.malformed_timestamp {
            self.stats.malformed_timestamps += 1;
            warn!(
                partition = message.partition,
                offset = message.offset,
                error = %err,
                "Skipping login frequency update"
            );
        }

        self.publish(&enriched.payload)?;

        debug!(
            partition = message.partition,
            offset = message.offset,
            "Published enriched record"
        );
        Ok(())
    }

    /// Send and flush so at most one record is ever in flight
    fn publish(&mut self, payload: &[u8]) -> Result<()> {
        let topic = &self.config.output_topic;
        self.output
            .send(topic, payload)
            .and_then(|()| self.output.flush(self.config.flush_timeout))
            .map_err(|source| PipelineError::Publish {
                topic: topic.clone(),
                source,
            })?;
        self.stats.records_published += 1;
        Ok(())
    }

    fn transition(&mut self, next: RunnerState) {
        debug!(from = ?self.state, to = ?next, "Pipeline state change");
        self.state = next;
        self.transitions.push(next);
    }

    fn drain(&mut self) {
        self.transition(RunnerState::Draining);
        self.input.close();
    }

    fn stop(&mut self) {
        self.transition(RunnerState::Stopped);

        let report = self.report();
        if let Err(e) = report.write_to(self.report_out.as_mut()) {
            warn!(error = %e, "Failed to write insights report");
        }

        info!(
            messages_processed = self.stats.messages_processed,
            records_published = self.stats.records_published,
            offset_resets = self.stats.offset_resets,
            malformed_timestamps = self.stats.malformed_timestamps,
            partition_eofs = self.stats.partition_eofs,
            locales = self.store.len(),
            "Pipeline stopped"
        );
    }
}
