//! Concurrency tests
//!
//! Ingestion runs one task per message while the sweeper reads snapshots:
//! - Concurrent touches on distinct keys lose nothing
//! - Snapshots taken mid-write never contain duplicated or torn keys
//! - Parallel messages through the ingestor all get forwarded

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use pretty_assertions::assert_eq;
use sensor_watch::{
    ActivityKey, forwarder::MetricSink, ingest::Ingestor, monitors::resources::LimitMonitor,
    tracker::ActivityTracker,
};

use crate::helpers::*;

const MACHINES: usize = 8;
const SENSORS: usize = 25;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_touches_and_snapshots() {
    let tracker = ActivityTracker::new();

    let mut writers = vec![];
    for m in 0..MACHINES {
        let tracker = tracker.clone();
        writers.push(tokio::spawn(async move {
            for s in 0..SENSORS {
                tracker
                    .touch(ActivityKey::new(format!("m{m}"), format!("s{s}")), Instant::now())
                    .await;
                tokio::task::yield_now().await;
            }
        }));
    }

    let reader = {
        let tracker = tracker.clone();
        tokio::spawn(async move {
            for _ in 0..50 {
                let snapshot = tracker.snapshot().await;
                let unique: HashSet<_> = snapshot.iter().map(|(key, _)| key.clone()).collect();
                assert_eq!(unique.len(), snapshot.len(), "duplicated key in snapshot");
                for (key, _) in &snapshot {
                    assert!(key.machine_id.starts_with('m'), "torn key {key}");
                    assert!(key.sensor_id.starts_with('s'), "torn key {key}");
                }
                tokio::task::yield_now().await;
            }
        })
    };

    for writer in writers {
        writer.await.unwrap();
    }
    reader.await.unwrap();

    let snapshot = tracker.snapshot().await;
    assert_eq!(snapshot.len(), MACHINES * SENSORS);

    let keys: HashSet<_> = snapshot.into_iter().map(|(key, _)| key).collect();
    for m in 0..MACHINES {
        for s in 0..SENSORS {
            assert!(keys.contains(&ActivityKey::new(format!("m{m}"), format!("s{s}"))));
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_messages_are_all_forwarded() {
    let sink = Arc::new(RecordingSink::default());
    let ingestor = Ingestor::new(
        ActivityTracker::new(),
        sink.clone() as Arc<dyn MetricSink>,
        LimitMonitor::default(),
    );

    let mut tasks = vec![];
    for m in 0..MACHINES {
        let ingestor = ingestor.clone();
        tasks.push(tokio::spawn(async move {
            for s in 0..SENSORS {
                ingestor
                    .handle_message(
                        &format!("/sensors/m{m}/s{s}"),
                        &payload("2024-01-01T00:00:00", s as f64),
                    )
                    .await;
            }
        }));
    }

    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(sink.metrics().await.len(), MACHINES * SENSORS);
    assert_eq!(ingestor.tracker().len().await, MACHINES * SENSORS);
    assert_eq!(
        ingestor.stats().forwarded.load(Ordering::Relaxed),
        (MACHINES * SENSORS) as u64
    );
}
