//! Failure tests for the ingest path
//!
//! Nothing wrong with a single message or with the backend may stop the
//! processing of the next message:
//! - Graphite unreachable
//! - Malformed topics and payloads
//! - Unparsable timestamps
//! - Sweeps against a dead backend

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use sensor_watch::{
    ActivityKey,
    actors::sweeper::InactivitySweeper,
    config::{AlarmMode, SweepConfig, ThresholdConfig},
    error::{DecodeError, ForwardError},
    forwarder::{GraphiteForwarder, Metric, MetricSink},
    ingest::{IngestOutcome, Ingestor},
    monitors::resources::LimitMonitor,
    timestamp,
    tracker::ActivityTracker,
};

use crate::helpers::*;

#[tokio::test]
async fn test_backend_down_is_reported_per_metric() {
    let forwarder = GraphiteForwarder::new(&closed_backend_config().await);

    let result = forwarder
        .forward(&Metric::reading("host1", "TEMP", 1.0, 0))
        .await;
    assert_matches!(
        result,
        Err(ForwardError::Connect { .. } | ForwardError::Timeout { .. })
    );
}

#[tokio::test]
async fn test_backend_down_keeps_liveness() {
    let sink: Arc<dyn MetricSink> =
        Arc::new(GraphiteForwarder::new(&closed_backend_config().await));
    let ingestor = Ingestor::new(ActivityTracker::new(), sink, LimitMonitor::default());

    let outcome = ingestor
        .handle_message("/sensors/host1/TEMP", &payload("2024-01-01T00:00:00", 3.0))
        .await;
    assert_matches!(outcome, IngestOutcome::ForwardFailed(_));

    let key = ActivityKey::new("host1", "TEMP");
    assert!(ingestor.tracker().last_seen(&key).await.is_some());
    assert_eq!(ingestor.stats().forward_failures.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn test_bad_messages_do_not_block_good_ones() {
    let graphite = GraphiteCapture::start().await;
    let sink: Arc<dyn MetricSink> = Arc::new(GraphiteForwarder::new(&graphite.backend_config()));
    let ingestor = Ingestor::new(ActivityTracker::new(), sink, LimitMonitor::default());

    let outcome = ingestor
        .handle_message("/sensors/host1", &payload("2024-01-01T00:00:00", 1.0))
        .await;
    assert_matches!(outcome, IngestOutcome::Rejected(DecodeError::MalformedTopic { .. }));

    let outcome = ingestor
        .handle_message("/sensors/host1/TEMP", b"{\"value\": }")
        .await;
    assert_matches!(outcome, IngestOutcome::Rejected(DecodeError::MalformedPayload(_)));

    let outcome = ingestor
        .handle_message("/sensors/host1/TEMP", &payload("yesterday", 1.0))
        .await;
    assert_matches!(outcome, IngestOutcome::BadTimestamp(_));

    let outcome = ingestor
        .handle_message("/sensors/host1/TEMP", &payload("2024-01-01T00:00:01", 7.0))
        .await;
    assert_matches!(outcome, IngestOutcome::Forwarded);

    let epoch = timestamp::to_epoch("2024-01-01T00:00:01").unwrap();
    assert_eq!(
        graphite.wait_for_lines(1).await,
        vec![format!("host1.TEMP 7.000000 {epoch}")]
    );

    let stats = ingestor.stats();
    assert_eq!(stats.received.load(Ordering::Relaxed), 4);
    assert_eq!(stats.rejected.load(Ordering::Relaxed), 2);
    assert_eq!(stats.bad_timestamps.load(Ordering::Relaxed), 1);
    assert_eq!(stats.forwarded.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn test_sweep_against_dead_backend_keeps_going() {
    let sink: Arc<dyn MetricSink> =
        Arc::new(GraphiteForwarder::new(&closed_backend_config().await));
    let tracker = ActivityTracker::new();

    let start = Instant::now();
    tracker.touch(ActivityKey::new("m1", "TEMP"), start).await;

    let config = SweepConfig {
        interval_ms: 1_000,
        threshold: ThresholdConfig::Fixed { seconds: 1.0 },
        alarm_mode: AlarmMode::Level,
    };
    let mut sweeper = InactivitySweeper::new(&config, tracker, sink, start);

    for offset in [5, 6] {
        let report = sweeper.sweep(start + Duration::from_secs(offset), 0).await;
        assert_eq!(report.alarmed.len(), 1);
        assert_eq!(report.failed, 1);
    }
}
