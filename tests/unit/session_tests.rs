//! Unit tests for the per-connection session state machine.
//!
//! Runs on tokio's paused clock so heartbeat, task and deadline timings
//! are exact. Frames are captured by an in-memory sink that can be told
//! to start failing after a number of writes.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;

use status_relay::models::status::StatusMessage;
use status_relay::stream::codec::{Frame, FrameEncoder, FrameReader, JsonFrameEncoder};
use status_relay::stream::counters::SessionCounters;
use status_relay::stream::session::{Session, SessionOutcome, SessionSettings};
use status_relay::stream::sink::{ChannelSink, FrameSink};
use status_relay::worker::runner::TaskRunner;
use status_relay::worker::workload::{DelayedWorkload, Workload, WorkloadFuture};
use status_relay::{AppError, Result};

// ── Test doubles ─────────────────────────────────────────────

/// Sink that records every accepted frame with its write time.
#[derive(Clone, Default)]
struct RecordingSink {
    frames: Arc<Mutex<Vec<(Instant, Bytes)>>>,
    attempts: Arc<AtomicUsize>,
    fail_after: Option<usize>,
}

impl RecordingSink {
    fn failing_after(writes: usize) -> Self {
        Self {
            fail_after: Some(writes),
            ..Self::default()
        }
    }

    fn frames(&self) -> Vec<(Instant, Bytes)> {
        self.frames.lock().unwrap().clone()
    }

    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl FrameSink for RecordingSink {
    fn write(&mut self, frame: Bytes) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let result = {
            let mut frames = self.frames.lock().unwrap();
            if self.fail_after.is_some_and(|limit| frames.len() >= limit) {
                Err(AppError::Disconnected("peer gone".into()))
            } else {
                frames.push((Instant::now(), frame));
                Ok(())
            }
        };
        Box::pin(std::future::ready(result))
    }
}

/// Encoder that fails on the n-th call (1-based) and delegates otherwise.
struct FlakyEncoder {
    inner: JsonFrameEncoder,
    calls: AtomicUsize,
    fail_on: usize,
}

impl FrameEncoder for FlakyEncoder {
    fn encode(&self, msg: &StatusMessage) -> Result<Bytes> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_on {
            return Err(AppError::Encode("forced failure".into()));
        }
        self.inner.encode(msg)
    }
}

/// Workload that resolves to a caller-chosen message after a delay.
struct ScriptedWorkload {
    delay: Duration,
    script: fn(StatusMessage) -> Result<StatusMessage>,
}

impl Workload for ScriptedWorkload {
    fn execute(&self, initial: StatusMessage) -> WorkloadFuture {
        let delay = self.delay;
        let script = self.script;
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            script(initial)
        })
    }
}

// ── Helpers ──────────────────────────────────────────────────

fn settings(heartbeat_secs: u64, deadline_secs: u64) -> SessionSettings {
    SessionSettings {
        heartbeat_interval: Duration::from_secs(heartbeat_secs),
        deadline: Duration::from_secs(deadline_secs),
        with_completion: true,
    }
}

fn delayed(secs: u64) -> Arc<dyn Workload> {
    Arc::new(DelayedWorkload::new(Duration::from_secs(secs)))
}

fn session(
    id: &str,
    settings: SessionSettings,
    workload: Option<Arc<dyn Workload>>,
) -> (Session, Arc<SessionCounters>) {
    let counters = SessionCounters::shared();
    let mut session = Session::new(id, settings, Arc::clone(&counters));
    if let Some(workload) = workload {
        session = session.with_runner(TaskRunner::new(workload, Arc::clone(&counters)));
    }
    (session, counters)
}

/// Decode recorded frames into `(offset from start, frame)` pairs.
fn decode(start: Instant, recorded: &[(Instant, Bytes)]) -> Vec<(Duration, Frame)> {
    recorded
        .iter()
        .map(|(at, bytes)| {
            let mut reader = FrameReader::new();
            reader.push(bytes);
            let frame = reader.next_frame().expect("one complete frame per write");
            assert!(!reader.has_partial(), "write must hold exactly one frame");
            (*at - start, frame)
        })
        .collect()
}

fn json(frame: &Frame) -> serde_json::Value {
    match frame {
        Frame::Status(payload) => serde_json::from_str(payload).expect("valid json payload"),
        Frame::Close => panic!("expected a status frame, got close"),
    }
}

fn is_completed(frame: &Frame) -> bool {
    matches!(frame, Frame::Status(_)) && json(frame)["status"] == serde_json::json!(true)
}

/// Let spawned workers observe cancellation on the paused clock.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

// ── Completion path ──────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn completes_after_heartbeats_with_single_terminal_frame() {
    let start = Instant::now();
    let (session, counters) = session("abc", settings(2, 300), Some(delayed(10)));
    let sink = RecordingSink::default();

    let report = session.run(sink.clone()).await;

    assert_eq!(report.outcome, SessionOutcome::Completed);
    let frames = decode(start, &sink.frames());
    let (close_at, last) = frames.last().expect("frames emitted");
    assert_eq!(*last, Frame::Close);
    assert_eq!(*close_at, Duration::from_secs(10));

    let statuses = &frames[..frames.len() - 1];
    let terminal: Vec<_> = statuses.iter().filter(|(_, f)| is_completed(f)).collect();
    assert_eq!(terminal.len(), 1, "exactly one completed frame");
    let (_, done) = statuses.last().expect("completion frame precedes close");
    assert!(is_completed(done), "close must immediately follow completion");
    assert_eq!(json(done)["message"], "success");
    assert_eq!(json(done)["id"], "abc");

    let heartbeats = statuses.len() - 1;
    assert!((4..=5).contains(&heartbeats), "got {heartbeats} heartbeats");
    for (_, frame) in &statuses[..heartbeats] {
        let value = json(frame);
        assert_eq!(value["status"], false);
        assert!(value["message"]
            .as_str()
            .is_some_and(|m| m.starts_with("current time is ")));
    }

    assert_eq!(report.frames_sent, frames.len());
    assert_eq!(counters.active_sessions(), 0);
    assert_eq!(counters.finished(SessionOutcome::Completed), 1);
}

#[tokio::test(start_paused = true)]
async fn non_terminal_completion_is_emitted_and_stream_continues() {
    let start = Instant::now();
    let workload: Arc<dyn Workload> = Arc::new(ScriptedWorkload {
        delay: Duration::from_secs(3),
        script: |mut msg| {
            msg.text = "halfway".into();
            Ok(msg)
        },
    });
    let (session, _counters) = session("abc", settings(2, 10), Some(workload));
    let sink = RecordingSink::default();

    let report = session.run(sink.clone()).await;

    assert_eq!(report.outcome, SessionOutcome::TimedOut);
    let frames = decode(start, &sink.frames());
    assert!(frames
        .iter()
        .any(|(at, f)| *at == Duration::from_secs(3) && json(f)["message"] == "halfway"));
    assert!(!frames.iter().any(|(_, f)| is_completed(f)));
    assert_eq!(frames.last().map(|(_, f)| f.clone()), Some(Frame::Close));
}

#[tokio::test(start_paused = true)]
async fn failed_task_closes_stream_with_failure_text() {
    let workload: Arc<dyn Workload> = Arc::new(ScriptedWorkload {
        delay: Duration::from_secs(1),
        script: |_| Err(AppError::Task("quota exceeded".into())),
    });
    let start = Instant::now();
    let (session, _counters) = session("abc", settings(2, 300), Some(workload));
    let sink = RecordingSink::default();

    let report = session.run(sink.clone()).await;

    assert_eq!(report.outcome, SessionOutcome::Completed);
    let frames = decode(start, &sink.frames());
    assert_eq!(frames.len(), 2);
    let value = json(&frames[0].1);
    assert_eq!(value["status"], true);
    assert_eq!(value["message"], "failed: task: quota exceeded");
    assert_eq!(frames[1].1, Frame::Close);
}

#[tokio::test(start_paused = true)]
async fn stream_id_cannot_be_changed_by_task() {
    let workload: Arc<dyn Workload> = Arc::new(ScriptedWorkload {
        delay: Duration::from_secs(1),
        script: |mut msg| {
            msg.id = "hijacked".into();
            Ok(msg.succeeded())
        },
    });
    let start = Instant::now();
    let (session, _counters) = session("abc", settings(2, 300), Some(workload));
    let sink = RecordingSink::default();

    session.run(sink.clone()).await;

    let frames = decode(start, &sink.frames());
    assert_eq!(json(&frames[0].1)["id"], "abc");
}

// ── Deadline path ────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn deadline_closes_stream_when_task_never_finishes() {
    let start = Instant::now();
    let (session, counters) = session("xyz", settings(2, 300), Some(delayed(400)));
    let sink = RecordingSink::default();

    let report = session.run(sink.clone()).await;

    assert_eq!(report.outcome, SessionOutcome::TimedOut);
    let frames = decode(start, &sink.frames());
    let (close_at, last) = frames.last().expect("frames emitted");
    assert_eq!(*last, Frame::Close);
    assert!(*close_at >= Duration::from_secs(300));
    assert!(*close_at <= Duration::from_secs(302));
    assert!(!frames.iter().any(|(_, f)| is_completed(f)));

    let heartbeats = frames.len() - 1;
    assert!((148..=150).contains(&heartbeats), "got {heartbeats} heartbeats");

    settle().await;
    assert_eq!(counters.active_workers(), 0, "abandoned task must exit");
    assert_eq!(counters.finished(SessionOutcome::TimedOut), 1);
}

#[tokio::test(start_paused = true)]
async fn heartbeats_keep_fixed_cadence() {
    let start = Instant::now();
    let (session, _counters) = session("abc", settings(2, 21), None);
    let sink = RecordingSink::default();

    session.run(sink.clone()).await;

    let frames = decode(start, &sink.frames());
    let heartbeat_times: Vec<Duration> = frames
        .iter()
        .filter(|(_, f)| matches!(f, Frame::Status(_)))
        .map(|(at, _)| *at)
        .collect();
    assert_eq!(heartbeat_times.len(), 10);
    for pair in heartbeat_times.windows(2) {
        assert_eq!(pair[1] - pair[0], Duration::from_secs(2));
    }
}

#[tokio::test(start_paused = true)]
async fn late_task_result_after_timeout_is_ignored() {
    let (session, counters) = session("abc", settings(1, 3), Some(delayed(4)));
    let sink = RecordingSink::default();

    let report = session.run(sink.clone()).await;
    assert_eq!(report.outcome, SessionOutcome::TimedOut);
    let written = sink.attempts();

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(sink.attempts(), written, "nothing written after the session ended");
    assert_eq!(counters.active_workers(), 0);
    assert_eq!(counters.active_sessions(), 0);
}

// ── Disconnect path ──────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn write_failure_short_circuits_session() {
    let (session, counters) = session("abc", settings(2, 300), Some(delayed(10)));
    let sink = RecordingSink::failing_after(2);

    let report = session.run(sink.clone()).await;

    assert_eq!(report.outcome, SessionOutcome::Disconnected);
    assert_eq!(report.frames_sent, 2);
    assert_eq!(sink.frames().len(), 2);
    assert_eq!(sink.attempts(), 3, "no write attempted after the failure");

    let start = sink.frames()[0].0;
    assert!(!decode(start, &sink.frames())
        .iter()
        .any(|(_, f)| *f == Frame::Close));

    settle().await;
    assert_eq!(counters.active_workers(), 0);
    assert_eq!(counters.finished(SessionOutcome::Disconnected), 1);
}

#[tokio::test(start_paused = true)]
async fn failure_writing_close_frame_after_completion_is_disconnect() {
    let (session, _counters) = session("abc", settings(2, 300), Some(delayed(1)));
    let sink = RecordingSink::failing_after(1);

    let report = session.run(sink.clone()).await;

    assert_eq!(report.outcome, SessionOutcome::Disconnected);
    assert_eq!(sink.frames().len(), 1);
    assert_eq!(sink.attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn stalled_reader_cannot_outlive_deadline() {
    let start = Instant::now();
    let (session, counters) = session("abc", settings(2, 10), Some(delayed(400)));
    let (sink, _rx) = ChannelSink::channel(1);

    let report = tokio::time::timeout(Duration::from_secs(120), session.run(sink))
        .await
        .expect("session must end at its deadline");

    assert_eq!(report.outcome, SessionOutcome::Disconnected);
    assert_eq!(report.frames_sent, 1, "only the first heartbeat fit in the buffer");
    assert_eq!(start.elapsed(), Duration::from_secs(10));

    settle().await;
    assert_eq!(counters.active_sessions(), 0);
    assert_eq!(counters.active_workers(), 0);
    assert_eq!(counters.finished(SessionOutcome::Disconnected), 1);
}

// ── Encoding failures ────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn encoding_failure_skips_one_frame_only() {
    let start = Instant::now();
    let encoder = Arc::new(FlakyEncoder {
        inner: JsonFrameEncoder::new(true),
        calls: AtomicUsize::new(0),
        fail_on: 2,
    });
    let (session, _counters) = session("abc", settings(2, 300), Some(delayed(9)));
    let session = session.with_encoder(encoder);
    let sink = RecordingSink::default();

    let report = session.run(sink.clone()).await;

    assert_eq!(report.outcome, SessionOutcome::Completed);
    assert_eq!(report.frames_skipped, 1);
    let times: Vec<Duration> = decode(start, &sink.frames()).into_iter().map(|(at, _)| at).collect();
    assert!(!times.contains(&Duration::from_secs(4)), "second heartbeat skipped");
    assert!(times.contains(&Duration::from_secs(2)));
    assert!(times.contains(&Duration::from_secs(6)));
}

#[tokio::test(start_paused = true)]
async fn unencodable_completion_is_skipped_and_stream_runs_to_deadline() {
    let start = Instant::now();
    // Call 1 is the heartbeat at 2s, call 2 the completion at 3s.
    let encoder = Arc::new(FlakyEncoder {
        inner: JsonFrameEncoder::new(true),
        calls: AtomicUsize::new(0),
        fail_on: 2,
    });
    let (session, counters) = session("abc", settings(2, 10), Some(delayed(3)));
    let session = session.with_encoder(encoder);
    let sink = RecordingSink::default();

    let report = session.run(sink.clone()).await;

    assert_eq!(report.outcome, SessionOutcome::TimedOut);
    assert_eq!(report.frames_skipped, 1);
    let frames = decode(start, &sink.frames());
    assert!(!frames.iter().any(|(_, f)| is_completed(f)), "no completed frame");

    let (close_at, last) = frames.last().expect("frames emitted");
    assert_eq!(*last, Frame::Close);
    assert_eq!(*close_at, Duration::from_secs(10));

    let after: Vec<_> = frames
        .iter()
        .filter(|(at, f)| *at > Duration::from_secs(3) && matches!(f, Frame::Status(_)))
        .collect();
    assert_eq!(
        after.iter().map(|(at, _)| *at).collect::<Vec<_>>(),
        [5, 7, 9].map(Duration::from_secs),
    );
    for (_, frame) in after {
        let value = json(frame);
        assert_eq!(value["status"], false);
        assert!(value["message"]
            .as_str()
            .is_some_and(|m| m.starts_with("current time is ")));
    }
    assert_eq!(counters.finished(SessionOutcome::TimedOut), 1);
}

// ── Heartbeat-only mode ──────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn heartbeat_only_mode_omits_status_and_skips_task() {
    let start = Instant::now();
    let counters = SessionCounters::shared();
    let runner = TaskRunner::new(delayed(1), Arc::clone(&counters));
    let settings = SessionSettings {
        with_completion: false,
        ..settings(2, 7)
    };
    let session = Session::new("abc", settings, Arc::clone(&counters)).with_runner(runner);
    let sink = RecordingSink::default();

    let report = session.run(sink.clone()).await;

    assert_eq!(report.outcome, SessionOutcome::TimedOut);
    let frames = decode(start, &sink.frames());
    assert_eq!(frames.len(), 4, "three heartbeats and a close frame");
    for (_, frame) in &frames[..3] {
        assert!(json(frame).get("status").is_none());
    }
    assert_eq!(counters.active_workers(), 0);
}
