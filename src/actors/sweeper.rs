//! InactivitySweeperActor - Raises alarms for sensors that stopped reporting
//!
//! ## Sweep
//!
//! Every tick runs two phases:
//!
//! 1. **Threshold estimation**: the time since the previous sweep is measured
//!    on the monotonic clock and scaled into a staleness threshold
//!    (`elapsed * 10` with the default settings). A fixed threshold can be
//!    configured instead.
//! 2. **Scan**: every record in the [`ActivityTracker`] that has been silent
//!    for at least the threshold (whole seconds) gets an
//!    `<machine>.alarms.inactive.<sensor> 1` metric.
//!
//! In the default level mode a silent sensor is alarmed again on every
//! sweep. Edge mode alarms once per silent period.
//!
//! Sweeps requested through [`SweeperHandle::sweep_now`] reuse the current
//! threshold and do not reset the cadence measured by the next tick.
//!
//! ## Message Flow
//!
//! ```text
//! Timer tick → estimate threshold → scan tracker snapshot → forward alarms
//!     ↑
//!     └─── Commands (SweepNow, Shutdown)
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use futures::future::join_all;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{MissedTickBehavior, interval_at};
use tracing::{debug, instrument, trace, warn};

use crate::{
    ActivityKey,
    config::{AlarmMode, SweepConfig, ThresholdConfig},
    forwarder::{Metric, MetricSink},
    tracker::ActivityTracker,
};

use super::messages::{SweepReport, SweeperCommand};

/// Derives the staleness threshold of each sweep
#[derive(Debug, Clone)]
pub struct ThresholdEstimator {
    policy: ThresholdConfig,
    last_sweep: Instant,
    last_threshold: f64,
}

impl ThresholdEstimator {
    pub fn new(policy: ThresholdConfig, start: Instant) -> Self {
        Self {
            policy,
            last_sweep: start,
            last_threshold: 0.0,
        }
    }

    fn threshold_for(&self, elapsed: Duration) -> f64 {
        match self.policy {
            ThresholdConfig::Adaptive {
                multiplier,
                report_interval_secs,
            } => elapsed.as_secs_f64() * multiplier * report_interval_secs,
            ThresholdConfig::Fixed { seconds } => seconds,
        }
    }

    /// Threshold in seconds for a scheduled sweep running at `now`.
    ///
    /// A `now` earlier than the previous sweep counts as zero elapsed time
    /// and leaves the reference point untouched.
    pub fn next(&mut self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_sweep);
        if now > self.last_sweep {
            self.last_sweep = now;
        }

        self.last_threshold = self.threshold_for(elapsed);
        self.last_threshold
    }

    /// Threshold for an unscheduled sweep at `now`; the cadence reference
    /// is left alone.
    ///
    /// Never lower than the threshold of the last scheduled sweep, so a
    /// manual sweep right after a tick does not alarm on fresh sensors.
    pub fn peek(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_sweep);
        self.threshold_for(elapsed).max(self.last_threshold)
    }
}

/// Sweep state, independent of any timer
pub struct InactivitySweeper {
    tracker: ActivityTracker,
    sink: Arc<dyn MetricSink>,
    estimator: ThresholdEstimator,
    mode: AlarmMode,

    /// Edge mode only: `last_seen` of each sensor at the time it was alarmed
    alarmed: HashMap<ActivityKey, Instant>,
}

impl InactivitySweeper {
    pub fn new(
        config: &SweepConfig,
        tracker: ActivityTracker,
        sink: Arc<dyn MetricSink>,
        start: Instant,
    ) -> Self {
        Self {
            tracker,
            sink,
            estimator: ThresholdEstimator::new(config.threshold, start),
            mode: config.alarm_mode,
            alarmed: HashMap::new(),
        }
    }

    /// Run one scheduled sweep at monotonic time `now`, stamping alarms
    /// with `epoch`
    #[instrument(skip(self, now))]
    pub async fn sweep(&mut self, now: Instant, epoch: i64) -> SweepReport {
        let threshold = self.estimator.next(now);
        self.scan(threshold, now, epoch).await
    }

    /// Sweep outside the regular cadence without disturbing the threshold
    /// of the next scheduled sweep
    #[instrument(skip(self, now))]
    pub async fn sweep_out_of_band(&mut self, now: Instant, epoch: i64) -> SweepReport {
        let threshold = self.estimator.peek(now);
        self.scan(threshold, now, epoch).await
    }

    async fn scan(&mut self, threshold: f64, now: Instant, epoch: i64) -> SweepReport {
        let snapshot = self.tracker.snapshot().await;

        let mut report = SweepReport {
            threshold_secs: threshold,
            scanned: snapshot.len(),
            ..SweepReport::default()
        };

        let mut stale = vec![];
        for (key, last_seen) in snapshot {
            let silent_secs = now.saturating_duration_since(last_seen).as_secs();

            if (silent_secs as f64) < threshold {
                self.alarmed.remove(&key);
                continue;
            }

            if self.mode == AlarmMode::Edge && self.alarmed.get(&key) == Some(&last_seen) {
                trace!("{key}: still silent, already alarmed");
                continue;
            }

            trace!("{key}: silent for {silent_secs}s (threshold {threshold:.2}s)");
            stale.push((key, last_seen));
        }

        let alarms: Vec<Metric> = stale
            .iter()
            .map(|(key, _)| Metric::inactivity_alarm(key, epoch))
            .collect();
        let results = join_all(alarms.iter().map(|metric| self.sink.forward(metric))).await;

        for ((key, last_seen), result) in stale.into_iter().zip(results) {
            match result {
                Ok(()) => {
                    if self.mode == AlarmMode::Edge {
                        self.alarmed.insert(key.clone(), last_seen);
                    }
                }
                Err(e) => {
                    warn!("failed to forward inactivity alarm for {key}: {e}");
                    report.failed += 1;
                }
            }
            report.alarmed.push(key);
        }

        if !report.alarmed.is_empty() {
            debug!(
                "{} of {} sensors inactive (threshold {threshold:.2}s)",
                report.alarmed.len(),
                report.scanned
            );
        }

        report
    }
}

/// Actor that runs the sweeper on a fixed cadence for the life of the process
pub struct InactivitySweeperActor {
    sweeper: InactivitySweeper,

    /// Command receiver for control messages
    command_rx: mpsc::Receiver<SweeperCommand>,

    /// Sweep cadence
    interval_duration: Duration,
}

impl InactivitySweeperActor {
    pub fn new(
        config: &SweepConfig,
        tracker: ActivityTracker,
        sink: Arc<dyn MetricSink>,
        command_rx: mpsc::Receiver<SweeperCommand>,
    ) -> Self {
        Self {
            sweeper: InactivitySweeper::new(config, tracker, sink, Instant::now()),
            command_rx,
            interval_duration: config.interval(),
        }
    }

    /// Run the actor's main loop
    ///
    /// Runs until a Shutdown command is received or every handle is dropped.
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!(
            "starting inactivity sweeper with cadence {:?}",
            self.interval_duration
        );

        // first sweep one full interval after start
        let mut ticker = interval_at(
            tokio::time::Instant::now() + self.interval_duration,
            self.interval_duration,
        );
        // a slow sweep postpones the next one instead of bunching ticks up
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweeper.sweep(Instant::now(), Utc::now().timestamp()).await;
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(SweeperCommand::SweepNow { respond_to }) => {
                            debug!("received SweepNow command");
                            let report = self
                                .sweeper
                                .sweep_out_of_band(Instant::now(), Utc::now().timestamp())
                                .await;
                            let _ = respond_to.send(report);
                        }

                        Some(SweeperCommand::Shutdown) => {
                            debug!("received shutdown command");
                            break;
                        }

                        None => {
                            warn!("all handles dropped, shutting down");
                            break;
                        }
                    }
                }
            }
        }

        debug!("inactivity sweeper stopped");
    }
}

/// Handle for controlling an InactivitySweeperActor
#[derive(Clone)]
pub struct SweeperHandle {
    sender: mpsc::Sender<SweeperCommand>,
}

impl SweeperHandle {
    /// Spawn the sweeper actor as a tokio task
    pub fn spawn(
        config: &SweepConfig,
        tracker: ActivityTracker,
        sink: Arc<dyn MetricSink>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = InactivitySweeperActor::new(config, tracker, sink, cmd_rx);
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Run a sweep right now and return its report
    pub async fn sweep_now(&self) -> Result<SweepReport> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SweeperCommand::SweepNow { respond_to: tx })
            .await
            .context("failed to send SweepNow command")?;

        rx.await.context("failed to receive sweep report")
    }

    /// Gracefully shut down the sweeper
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(SweeperCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}
