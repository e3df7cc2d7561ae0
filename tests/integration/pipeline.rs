//! End-to-end flow from inbound message to Graphite line
//!
//! Messages go through a real [`GraphiteForwarder`] into a local TCP
//! listener; sweeps use the same forwarder for their alarms.

use std::sync::Arc;
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use sensor_watch::{
    ActivityKey,
    actors::sweeper::{InactivitySweeper, SweeperHandle},
    config::{AlarmMode, SweepConfig, ThresholdConfig},
    forwarder::{GraphiteForwarder, Metric, MetricSink},
    ingest::{IngestOutcome, Ingestor},
    monitors::resources::LimitMonitor,
    timestamp,
    tracker::ActivityTracker,
};

use crate::helpers::*;

fn fixed_sweep(seconds: f64) -> SweepConfig {
    SweepConfig {
        interval_ms: 60_000,
        threshold: ThresholdConfig::Fixed { seconds },
        alarm_mode: AlarmMode::Level,
    }
}

#[tokio::test]
async fn test_reading_reaches_graphite() {
    let graphite = GraphiteCapture::start().await;
    let sink: Arc<dyn MetricSink> = Arc::new(GraphiteForwarder::new(&graphite.backend_config()));
    let ingestor = Ingestor::new(ActivityTracker::new(), sink, LimitMonitor::default());

    let outcome = ingestor
        .handle_message(
            "/sensors/host1/TEMP",
            &payload("2024-01-01T00:00:00", 42.5),
        )
        .await;
    assert!(matches!(outcome, IngestOutcome::Forwarded));

    let epoch = timestamp::to_epoch("2024-01-01T00:00:00").unwrap();
    let lines = graphite.wait_for_lines(1).await;
    assert_eq!(lines, vec![format!("host1.TEMP 42.500000 {epoch}")]);

    let key = ActivityKey::new("host1", "TEMP");
    assert!(ingestor.tracker().last_seen(&key).await.is_some());
}

#[tokio::test]
async fn test_every_message_opens_its_own_connection() {
    let graphite = GraphiteCapture::start().await;
    let sink: Arc<dyn MetricSink> = Arc::new(GraphiteForwarder::new(&graphite.backend_config()));
    let ingestor = Ingestor::new(ActivityTracker::new(), sink, LimitMonitor::default());

    for (sensor, value) in [("TEMP", 20.0), ("HUM", 55.25), ("PRESS", 1013.0)] {
        ingestor
            .handle_message(
                &format!("/sensors/host1/{sensor}"),
                &payload("2024-01-01T00:00:00", value),
            )
            .await;
    }

    let mut lines = graphite.wait_for_lines(3).await;
    lines.sort();

    let epoch = timestamp::to_epoch("2024-01-01T00:00:00").unwrap();
    assert_eq!(
        lines,
        vec![
            format!("host1.HUM 55.250000 {epoch}"),
            format!("host1.PRESS 1013.000000 {epoch}"),
            format!("host1.TEMP 20.000000 {epoch}"),
        ]
    );
    assert_eq!(graphite.connections().await, 3);
}

#[tokio::test]
async fn test_silent_sensor_alarm_reaches_graphite() {
    let graphite = GraphiteCapture::start().await;
    let sink: Arc<dyn MetricSink> = Arc::new(GraphiteForwarder::new(&graphite.backend_config()));
    let tracker = ActivityTracker::new();

    let start = Instant::now();
    tracker.touch(ActivityKey::new("m1", "TEMP"), start).await;
    tracker
        .touch(ActivityKey::new("m1", "HUM"), start + Duration::from_secs(8))
        .await;

    let mut sweeper = InactivitySweeper::new(&fixed_sweep(5.0), tracker, sink, start);
    let report = sweeper.sweep(start + Duration::from_secs(10), 1_700_000_000).await;

    assert_eq!(report.alarmed, vec![ActivityKey::new("m1", "TEMP")]);
    assert_eq!(report.failed, 0);

    let lines = graphite.wait_for_lines(1).await;
    assert_eq!(lines, vec!["m1.alarms.inactive.TEMP 1.000000 1700000000".to_string()]);
}

#[tokio::test]
async fn test_adaptive_threshold_across_sweeps() {
    let sink = Arc::new(RecordingSink::default());
    let tracker = ActivityTracker::new();
    let key = ActivityKey::new("m1", "TEMP");

    let start = Instant::now();
    tracker.touch(key.clone(), start).await;

    let config = SweepConfig::default();
    let mut sweeper = InactivitySweeper::new(&config, tracker.clone(), sink.clone(), start);

    // one second between sweeps gives a ten second threshold
    let report = sweeper.sweep(start + Duration::from_secs(1), 0).await;
    assert_eq!(report.threshold_secs, 10.0);
    assert!(report.alarmed.is_empty());

    let report = sweeper.sweep(start + Duration::from_secs(12), 1).await;
    assert_eq!(report.threshold_secs, 110.0);
    assert!(report.alarmed.is_empty());

    let report = sweeper.sweep(start + Duration::from_secs(13), 2).await;
    assert_eq!(report.threshold_secs, 10.0);
    assert_eq!(report.alarmed, vec![key.clone()]);

    assert_eq!(sink.metrics().await, vec![Metric::inactivity_alarm(&key, 2)]);
}

#[tokio::test]
async fn test_sweeper_handle_reports_alarms() {
    let sink = Arc::new(RecordingSink::default());
    let tracker = ActivityTracker::new();
    let key = ActivityKey::new("m2", "MEM_USED");
    tracker.touch(key.clone(), Instant::now()).await;

    let handle = SweeperHandle::spawn(&fixed_sweep(0.0), tracker, sink.clone());

    let report = tokio_test::assert_ok!(handle.sweep_now().await);
    assert_eq!(report.scanned, 1);
    assert_eq!(report.alarmed, vec![key.clone()]);

    let metrics = sink.metrics().await;
    assert_eq!(metrics.len(), 1);
    assert_eq!(metrics[0].path, "m2.alarms.inactive.MEM_USED");
    assert_eq!(metrics[0].value, 1.0);

    tokio_test::assert_ok!(handle.shutdown().await);
}
