//! Per-message ingestion: decode, forward, record liveness
//!
//! [`Ingestor::handle_message`] is invoked once per MQTT publish, possibly
//! from many tasks at the same time. Nothing that goes wrong with a single
//! message is allowed to escape it: bad messages are dropped and logged,
//! failed forwards are logged, and the next message is processed normally.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, trace, warn};

use crate::{
    decoder::decode,
    error::{DecodeError, ForwardError, ParseError},
    forwarder::{Metric, MetricSink},
    monitors::resources::LimitMonitor,
    timestamp::to_epoch,
    tracker::ActivityTracker,
};

/// What happened to one inbound message
#[derive(Debug)]
pub enum IngestOutcome {
    /// Metric forwarded and liveness recorded
    Forwarded,

    /// Topic or payload invalid; nothing recorded
    Rejected(DecodeError),

    /// Timestamp unparsable; metric skipped, liveness recorded
    BadTimestamp(ParseError),

    /// Backend unreachable; metric lost, liveness recorded
    ForwardFailed(ForwardError),
}

/// Counters for the ingestion path
#[derive(Debug, Default)]
pub struct IngestStats {
    pub received: AtomicU64,
    pub forwarded: AtomicU64,
    pub rejected: AtomicU64,
    pub bad_timestamps: AtomicU64,
    pub forward_failures: AtomicU64,
    pub limit_alarms_forwarded: AtomicU64,
    pub mqtt_connected: AtomicBool,
}

/// Point-in-time copy of [`IngestStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSnapshot {
    pub received: u64,
    pub forwarded: u64,
    pub rejected: u64,
    pub bad_timestamps: u64,
    pub forward_failures: u64,
    pub limit_alarms_forwarded: u64,
    pub mqtt_connected: bool,
}

impl IngestStats {
    pub fn set_mqtt_connected(&self, connected: bool) {
        self.mqtt_connected.store(connected, Ordering::Relaxed);
    }

    pub fn is_mqtt_connected(&self) -> bool {
        self.mqtt_connected.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> IngestSnapshot {
        IngestSnapshot {
            received: self.received.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            bad_timestamps: self.bad_timestamps.load(Ordering::Relaxed),
            forward_failures: self.forward_failures.load(Ordering::Relaxed),
            limit_alarms_forwarded: self.limit_alarms_forwarded.load(Ordering::Relaxed),
            mqtt_connected: self.is_mqtt_connected(),
        }
    }
}

/// Log the ingest counters every `every` for the life of the process
#[instrument(skip(stats))]
pub async fn report_stats(stats: Arc<IngestStats>, every: Duration) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);

    loop {
        ticker.tick().await;
        let IngestSnapshot {
            received,
            forwarded,
            rejected,
            bad_timestamps,
            forward_failures,
            limit_alarms_forwarded,
            mqtt_connected,
        } = stats.snapshot();

        if !mqtt_connected {
            warn!("MQTT broker currently unreachable");
        }
        info!(
            received,
            forwarded,
            rejected,
            bad_timestamps,
            forward_failures,
            limit_alarms_forwarded,
            "ingest stats"
        );
    }
}

/// Ties decoder, forwarder, tracker and limit monitor together
///
/// Cloning is cheap; all clones share the same tracker, sink and counters.
#[derive(Clone)]
pub struct Ingestor {
    tracker: ActivityTracker,
    sink: Arc<dyn MetricSink>,
    limits: LimitMonitor,
    stats: Arc<IngestStats>,
}

impl Ingestor {
    pub fn new(tracker: ActivityTracker, sink: Arc<dyn MetricSink>, limits: LimitMonitor) -> Self {
        Self {
            tracker,
            sink,
            limits,
            stats: Arc::default(),
        }
    }

    pub fn tracker(&self) -> &ActivityTracker {
        &self.tracker
    }

    pub fn stats(&self) -> Arc<IngestStats> {
        self.stats.clone()
    }

    /// Process one inbound message
    #[instrument(skip(self, payload), fields(bytes = payload.len()))]
    pub async fn handle_message(&self, topic: &str, payload: &[u8]) -> IngestOutcome {
        self.stats.received.fetch_add(1, Ordering::Relaxed);

        let reading = match decode(topic, payload) {
            Ok(reading) => reading,
            Err(e) => {
                warn!("dropping message: {e}");
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                return IngestOutcome::Rejected(e);
            }
        };

        let key = reading.key();

        let epoch = match to_epoch(&reading.timestamp) {
            Ok(epoch) => epoch,
            Err(e) => {
                warn!("{key}: not forwarding reading: {e}");
                self.stats.bad_timestamps.fetch_add(1, Ordering::Relaxed);
                self.tracker.touch(key, Instant::now()).await;
                return IngestOutcome::BadTimestamp(e);
            }
        };

        let metric = Metric::reading(&reading.machine_id, &reading.sensor_id, reading.value, epoch);
        let forwarded = self.sink.forward(&metric).await;

        self.tracker.touch(key, Instant::now()).await;

        if let Some(alarm) = self.limits.observe(&reading, epoch).await {
            match self.sink.forward(&alarm).await {
                Ok(()) => {
                    self.stats.limit_alarms_forwarded.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    warn!("failed to forward limit alarm {}: {e}", alarm.path);
                    self.stats.forward_failures.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        match forwarded {
            Ok(()) => {
                debug!("posted {} {} {}", metric.path, reading.value, reading.timestamp);
                self.stats.forwarded.fetch_add(1, Ordering::Relaxed);
                IngestOutcome::Forwarded
            }
            Err(e) => {
                warn!("failed to forward {}: {e}", metric.path);
                self.stats.forward_failures.fetch_add(1, Ordering::Relaxed);
                trace!("lost metric line: {}", metric.to_line().trim_end());
                IngestOutcome::ForwardFailed(e)
            }
        }
    }
}

/// Runs [`Ingestor::handle_message`] on background tasks, at most
/// `max_in_flight` at a time
///
/// [`IngestDispatcher::dispatch`] waits for a free slot, so a slow backend
/// holds up the caller instead of piling up tasks.
#[derive(Clone)]
pub struct IngestDispatcher {
    ingestor: Ingestor,
    permits: Arc<Semaphore>,
}

impl IngestDispatcher {
    pub fn new(ingestor: Ingestor, max_in_flight: usize) -> Self {
        Self {
            ingestor,
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
        }
    }

    pub async fn dispatch<P>(&self, topic: String, payload: P) -> Result<JoinHandle<IngestOutcome>>
    where
        P: AsRef<[u8]> + Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .context("ingest dispatcher closed")?;

        let ingestor = self.ingestor.clone();
        Ok(tokio::spawn(async move {
            let outcome = ingestor.handle_message(&topic, payload.as_ref()).await;
            drop(permit);
            outcome
        }))
    }
}
