//! Pipeline runner tests driven by in-memory streams
//!
//! The fake input plays back a scripted sequence of poll results and requests
//! shutdown once the script is exhausted, so every run terminates.

use login_insights_service::{
    AggregationStore, HourBucketer, InboundMessage, InputStream, OutputStream, PartitionRef,
    PipelineError, PipelineRunner, RunnerConfig, RunnerState, ShutdownSignal, StreamError,
    StreamErrorCode,
};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const NOW: i64 = 1_700_000_123;

/// Ordered record of calls made against the fakes
#[derive(Clone, Default)]
struct CallLog(Arc<Mutex<Vec<&'static str>>>);

impl CallLog {
    fn push(&self, call: &'static str) {
        self.0.lock().unwrap().push(call);
    }

    fn calls(&self) -> Vec<&'static str> {
        self.0.lock().unwrap().clone()
    }

    fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| **c == call).count()
    }

    fn position(&self, call: &str) -> Option<usize> {
        self.calls().iter().position(|c| *c == call)
    }
}

type PollResult = Option<Result<InboundMessage, StreamError>>;

struct ScriptedInput {
    script: VecDeque<PollResult>,
    shutdown: ShutdownSignal,
    assignment: Vec<PartitionRef>,
    fail_assignment: bool,
    subscribed: Vec<String>,
    seeks: Vec<Vec<PartitionRef>>,
    closed: bool,
    log: CallLog,
}

impl ScriptedInput {
    fn new(script: Vec<PollResult>, shutdown: ShutdownSignal, log: CallLog) -> Self {
        Self {
            script: script.into(),
            shutdown,
            assignment: vec![
                PartitionRef::new("user-login", 0),
                PartitionRef::new("user-login", 1),
            ],
            fail_assignment: false,
            subscribed: Vec::new(),
            seeks: Vec::new(),
            closed: false,
            log,
        }
    }
}

impl InputStream for ScriptedInput {
    fn subscribe(&mut self, topics: &[&str]) -> Result<(), StreamError> {
        self.log.push("subscribe");
        self.subscribed = topics.iter().map(|t| t.to_string()).collect();
        Ok(())
    }

    fn poll(&mut self, _timeout: Duration) -> PollResult {
        assert!(!self.closed, "poll after close");
        self.log.push("poll");
        let next = self.script.pop_front().flatten();
        if self.script.is_empty() {
            self.shutdown.trigger();
        }
        next
    }

    fn assignment(&self) -> Result<Vec<PartitionRef>, StreamError> {
        if self.fail_assignment {
            return Err(StreamError::other("coordinator unavailable"));
        }
        Ok(self.assignment.clone())
    }

    fn seek_to_beginning(&mut self, partitions: &[PartitionRef]) -> Result<(), StreamError> {
        self.log.push("seek");
        self.seeks.push(partitions.to_vec());
        Ok(())
    }

    fn close(&mut self) {
        self.log.push("close");
        self.closed = true;
    }
}

#[derive(Default)]
struct RecordingOutput {
    sent: Vec<(String, Vec<u8>)>,
    fail_flush: bool,
    log: CallLog,
}

impl RecordingOutput {
    fn records(&self) -> Vec<Value> {
        self.sent
            .iter()
            .map(|(_, payload)| serde_json::from_slice(payload).unwrap())
            .collect()
    }
}

impl OutputStream for RecordingOutput {
    fn send(&mut self, topic: &str, payload: &[u8]) -> Result<(), StreamError> {
        self.log.push("send");
        self.sent.push((topic.to_string(), payload.to_vec()));
        Ok(())
    }

    fn flush(&mut self, _timeout: Duration) -> Result<(), StreamError> {
        self.log.push("flush");
        if self.fail_flush {
            return Err(StreamError::other("Local: Message timed out"));
        }
        Ok(())
    }
}

/// Report sink that keeps the text and logs each flush
#[derive(Clone, Default)]
struct ReportBuffer {
    text: Arc<Mutex<Vec<u8>>>,
    log: CallLog,
}

impl ReportBuffer {
    fn text(&self) -> String {
        String::from_utf8(self.text.lock().unwrap().clone()).unwrap()
    }
}

impl Write for ReportBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.text.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.log.push("report");
        Ok(())
    }
}

fn message(offset: i64, payload: Value) -> PollResult {
    Some(Ok(InboundMessage {
        topic: "user-login".to_string(),
        partition: 0,
        offset,
        payload: serde_json::to_vec(&payload).unwrap(),
    }))
}

fn raw_message(offset: i64, payload: &[u8]) -> PollResult {
    Some(Ok(InboundMessage {
        topic: "user-login".to_string(),
        partition: 0,
        offset,
        payload: payload.to_vec(),
    }))
}

fn stream_error(code: StreamErrorCode) -> PollResult {
    Some(Err(StreamError::new(code, "user-login[0]")))
}

struct Harness {
    runner: PipelineRunner<ScriptedInput, RecordingOutput>,
    log: CallLog,
    report: ReportBuffer,
}

fn harness_with(script: Vec<PollResult>, config: RunnerConfig) -> Harness {
    let log = CallLog::default();
    let shutdown = ShutdownSignal::new();
    let input = ScriptedInput::new(script, shutdown.clone(), log.clone());
    let output = RecordingOutput {
        log: log.clone(),
        ..Default::default()
    };
    let report = ReportBuffer {
        log: log.clone(),
        ..Default::default()
    };

    let runner = PipelineRunner::new(
        input,
        output,
        AggregationStore::new(HourBucketer::utc()),
        config,
        shutdown,
    )
    .with_clock(|| NOW)
    .with_report_writer(report.clone());

    Harness {
        runner,
        log,
        report,
    }
}

fn harness(script: Vec<PollResult>) -> Harness {
    harness_with(script, RunnerConfig::default())
}

#[test]
fn test_enriches_publishes_and_aggregates() {
    let input = json!({
        "locale": "en-US",
        "device_type": "android",
        "app_version": "2.1",
        "timestamp": 1700000000,
        "user_id": "424cdd21-063a-43a7-b91b-7ca1a833afae",
    });
    let mut h = harness(vec![message(0, input.clone())]);

    let summary = h.runner.run().unwrap();

    assert_eq!(summary.stats.messages_processed, 1);
    assert_eq!(summary.stats.records_published, 1);
    assert_eq!(summary.locales, 1);

    let output = h.runner.output();
    assert_eq!(output.sent[0].0, "processed-user-login");
    let mut expected = input;
    expected["processed_timestamp"] = json!(NOW);
    assert_eq!(output.records(), vec![expected]);

    let insight = h.runner.store().get("en-US").unwrap();
    assert_eq!(insight.device_type_count.get("android"), 1);
    assert_eq!(insight.app_version_count.get("2.1"), 1);
    assert_eq!(insight.login_frequency.get("2023-11-14 22:00:00"), 1);

    assert_eq!(h.runner.input().subscribed, vec!["user-login".to_string()]);
    assert!(h.report.text().contains("2023-11-14 22:00:00: 1\n"));
}

#[test]
fn test_shutdown_closes_input_then_reports_once() {
    let mut h = harness(vec![
        message(0, json!({"locale": "en-US", "device_type": "ios"})),
        None,
    ]);

    h.runner.run().unwrap();

    assert_eq!(h.runner.state(), RunnerState::Stopped);
    assert_eq!(
        h.runner.transitions(),
        &[
            RunnerState::Running,
            RunnerState::Draining,
            RunnerState::Stopped
        ]
    );
    assert_eq!(h.log.count("close"), 1);
    assert_eq!(h.log.count("report"), 1);
    assert!(h.log.position("close").unwrap() < h.log.position("report").unwrap());
    assert_eq!(h.log.calls().last(), Some(&"report"));
    assert_eq!(
        h.report.text(),
        "\nLocale: en-US\nDevice Type Counts:\nios: 1\nApp Version Counts:\nLogin Frequency (Hourly):\n"
    );
}

#[test]
fn test_shutdown_before_first_poll() {
    let mut h = harness(vec![message(0, json!({"locale": "en-US"}))]);
    h.runner.input().shutdown.trigger();

    let summary = h.runner.run().unwrap();

    assert_eq!(summary.stats.messages_processed, 0);
    assert_eq!(h.log.count("poll"), 0);
    assert_eq!(h.log.count("close"), 1);
    assert_eq!(h.log.count("report"), 1);
    assert_eq!(h.report.text(), "");
}

#[test]
fn test_second_run_is_rejected() {
    let mut h = harness(vec![None]);

    h.runner.run().unwrap();
    let err = h.runner.run().unwrap_err();

    assert!(matches!(err, PipelineError::AlreadyStopped));
    assert_eq!(h.runner.transitions().len(), 3);
    assert_eq!(h.log.count("close"), 1);
    assert_eq!(h.log.count("report"), 1);
}

#[test]
fn test_empty_polls_and_partition_eof_are_ignored() {
    let mut h = harness(vec![
        None,
        stream_error(StreamErrorCode::PartitionEof),
        None,
        message(0, json!({"locale": "fr-FR", "app_version": "1.0"})),
    ]);

    let summary = h.runner.run().unwrap();

    assert_eq!(summary.stats.partition_eofs, 1);
    assert_eq!(summary.stats.records_published, 1);
    assert_eq!(h.log.count("poll"), 4);
}

#[test]
fn test_offset_out_of_range_seeks_assignment_to_beginning() {
    let mut h = harness(vec![
        stream_error(StreamErrorCode::OffsetOutOfRange),
        message(0, json!({"locale": "en-US"})),
    ]);

    let summary = h.runner.run().unwrap();

    assert_eq!(summary.stats.offset_resets, 1);
    assert_eq!(summary.stats.records_published, 1);
    assert_eq!(
        h.runner.input().seeks,
        vec![vec![
            PartitionRef::new("user-login", 0),
            PartitionRef::new("user-login", 1),
        ]]
    );
}

#[test]
fn test_offset_resets_are_capped() {
    let config = RunnerConfig {
        max_consecutive_offset_resets: 2,
        ..RunnerConfig::default()
    };
    let mut h = harness_with(
        vec![
            stream_error(StreamErrorCode::OffsetOutOfRange),
            stream_error(StreamErrorCode::OffsetOutOfRange),
            stream_error(StreamErrorCode::OffsetOutOfRange),
            message(0, json!({"locale": "en-US"})),
        ],
        config,
    );

    let err = h.runner.run().unwrap_err();

    assert!(matches!(err, PipelineError::OffsetResetExhausted(2)));
    assert_eq!(h.runner.input().seeks.len(), 2);
    assert!(h.runner.output().sent.is_empty());
    assert_eq!(h.log.count("close"), 1);
    assert_eq!(h.log.count("report"), 1);
}

#[test]
fn test_successful_message_resets_the_cap() {
    let config = RunnerConfig {
        max_consecutive_offset_resets: 1,
        ..RunnerConfig::default()
    };
    let mut h = harness_with(
        vec![
            stream_error(StreamErrorCode::OffsetOutOfRange),
            message(0, json!({"locale": "en-US"})),
            stream_error(StreamErrorCode::OffsetOutOfRange),
            message(1, json!({"locale": "en-US"})),
        ],
        config,
    );

    let summary = h.runner.run().unwrap();

    assert_eq!(summary.stats.offset_resets, 2);
    assert_eq!(summary.stats.records_published, 2);
}

#[test]
fn test_failed_assignment_lookup_is_fatal() {
    let log = CallLog::default();
    let shutdown = ShutdownSignal::new();
    let mut input = ScriptedInput::new(
        vec![stream_error(StreamErrorCode::OffsetOutOfRange), None],
        shutdown.clone(),
        log.clone(),
    );
    input.fail_assignment = true;
    let mut runner = PipelineRunner::new(
        input,
        RecordingOutput::default(),
        AggregationStore::new(HourBucketer::utc()),
        RunnerConfig::default(),
        shutdown,
    )
    .with_report_writer(io::sink());

    let err = runner.run().unwrap_err();

    assert!(matches!(err, PipelineError::OffsetReset(_)));
    assert_eq!(log.count("seek"), 0);
    assert_eq!(log.count("close"), 1);
    assert_eq!(runner.state(), RunnerState::Stopped);
}

#[test]
fn test_other_stream_error_is_fatal() {
    let mut h = harness(vec![
        stream_error(StreamErrorCode::Other),
        message(0, json!({"locale": "en-US"})),
    ]);

    let err = h.runner.run().unwrap_err();

    match err {
        PipelineError::Input(e) => assert_eq!(e.code, StreamErrorCode::Other),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(h.log.count("poll"), 1);
    assert!(h.runner.output().sent.is_empty());
    assert_eq!(h.runner.state(), RunnerState::Stopped);
    assert_eq!(
        h.runner.transitions(),
        &[
            RunnerState::Running,
            RunnerState::Draining,
            RunnerState::Stopped
        ]
    );
    assert_eq!(h.log.count("close"), 1);
    assert_eq!(h.log.count("report"), 1);
}

#[test]
fn test_undecodable_payload_stops_pipeline_and_still_reports() {
    let mut h = harness(vec![
        message(0, json!({"locale": "en-US", "device_type": "web"})),
        raw_message(1, b"\xff not json"),
        message(2, json!({"locale": "en-US", "device_type": "web"})),
    ]);

    let err = h.runner.run().unwrap_err();

    match err {
        PipelineError::Decode {
            partition, offset, ..
        } => {
            assert_eq!(partition, PartitionRef::new("user-login", 0));
            assert_eq!(offset, 1);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(h.runner.output().sent.len(), 1);
    assert_eq!(h.log.count("close"), 1);
    assert!(h.report.text().contains("web: 1\n"));
}

#[test]
fn test_malformed_timestamp_does_not_halt() {
    let mut h = harness(vec![
        message(
            0,
            json!({
                "locale": "en-US",
                "device_type": "android",
                "app_version": "2.1",
                "timestamp": "not-a-number",
            }),
        ),
        message(
            1,
            json!({"locale": "en-US", "device_type": "android", "timestamp": 1700000000}),
        ),
    ]);

    let summary = h.runner.run().unwrap();

    assert_eq!(summary.stats.malformed_timestamps, 1);
    assert_eq!(summary.stats.records_published, 2);
    assert_eq!(h.runner.output().records()[0]["timestamp"], "not-a-number");

    let insight = h.runner.store().get("en-US").unwrap();
    assert_eq!(insight.device_type_count.get("android"), 2);
    assert_eq!(insight.app_version_count.get("2.1"), 1);
    assert_eq!(insight.login_frequency.total(), 1);
}

#[test]
fn test_record_without_locale_is_published_not_aggregated() {
    let mut h = harness(vec![message(
        0,
        json!({"device_type": "android", "timestamp": 1700000000}),
    )]);

    let summary = h.runner.run().unwrap();

    assert_eq!(summary.stats.records_published, 1);
    assert_eq!(summary.locales, 0);
    assert!(h.runner.store().is_empty());
    assert_eq!(h.runner.output().records()[0]["processed_timestamp"], NOW);
}

#[test]
fn test_publish_failure_is_fatal() {
    let log = CallLog::default();
    let shutdown = ShutdownSignal::new();
    let input = ScriptedInput::new(
        vec![
            message(0, json!({"locale": "en-US"})),
            message(1, json!({"locale": "en-US"})),
        ],
        shutdown.clone(),
        log.clone(),
    );
    let output = RecordingOutput {
        fail_flush: true,
        log: log.clone(),
        ..Default::default()
    };
    let mut runner = PipelineRunner::new(
        input,
        output,
        AggregationStore::new(HourBucketer::utc()),
        RunnerConfig::default(),
        shutdown,
    )
    .with_report_writer(io::sink());

    let err = runner.run().unwrap_err();

    match err {
        PipelineError::Publish { topic, .. } => assert_eq!(topic, "processed-user-login"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(log.count("poll"), 1);
    assert_eq!(log.count("close"), 1);
}

#[test]
fn test_each_send_is_flushed_before_next_poll() {
    let mut h = harness(vec![
        message(0, json!({"locale": "en-US"})),
        message(1, json!({"locale": "de-DE"})),
        message(2, json!({"locale": "en-US"})),
    ]);

    h.runner.run().unwrap();

    let io_calls: Vec<_> = h
        .log
        .calls()
        .into_iter()
        .filter(|c| matches!(*c, "poll" | "send" | "flush"))
        .collect();
    assert_eq!(
        io_calls,
        vec![
            "poll", "send", "flush", "poll", "send", "flush", "poll", "send", "flush"
        ]
    );
}

#[test]
fn test_device_counts_match_input() {
    let devices = ["android", "ios", "android", "", "web", "android", "ios"];
    let script = devices
        .iter()
        .enumerate()
        .map(|(i, d)| message(i as i64, json!({"locale": "pt-BR", "device_type": d})))
        .collect();
    let mut h = harness(script);

    h.runner.run().unwrap();

    let counts = &h.runner.store().get("pt-BR").unwrap().device_type_count;
    for device in ["android", "ios", "web"] {
        let expected = devices.iter().filter(|d| **d == device).count() as u64;
        assert_eq!(counts.get(device), expected, "device {device}");
    }
    assert_eq!(counts.len(), 3);
}
