//! Usage limits on individual sensors
//!
//! Some sensors (memory usage, CPU usage) have an upper bound worth alarming
//! on. For every configured sensor id the monitor keeps a short window of
//! recent values per machine and runs the rolling mean through a grace
//! period state machine:
//!
//! ```text
//! mean < limit:
//!   grace_counter <= grace  → ResourceEvaluation::Ok
//!   grace_counter >  grace  → ResourceEvaluation::BackToOk       (alarm cleared)
//!
//! mean >= limit:
//!   grace_counter != grace  → ResourceEvaluation::Exceeding
//!   grace_counter == grace  → ResourceEvaluation::StartsToExceed (alarm raised)
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, instrument, trace};

use crate::{ActivityKey, SensorReading, config::LimitConfig, forwarder::Metric};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceEvaluation {
    Ok,
    Exceeding,
    StartsToExceed,
    BackToOk,
}

impl ResourceEvaluation {
    pub fn evaluate(
        resource: f64,
        limit: f64,
        grace: usize,
        current_grace: usize,
    ) -> ResourceEvaluation {
        if resource < limit {
            if current_grace > grace {
                return ResourceEvaluation::BackToOk;
            }
            return ResourceEvaluation::Ok;
        }

        if current_grace == grace {
            return ResourceEvaluation::StartsToExceed;
        }

        ResourceEvaluation::Exceeding
    }
}

#[derive(Debug, Default)]
struct SensorState {
    window: VecDeque<f64>,
    grace_counter: usize,
}

impl SensorState {
    fn push(&mut self, value: f64, capacity: usize) -> f64 {
        let capacity = capacity.max(1);
        while self.window.len() >= capacity {
            self.window.pop_front();
        }
        self.window.push_back(value);
        self.window.iter().sum::<f64>() / self.window.len() as f64
    }
}

/// Evaluates readings of limited sensors and produces limit alarms
///
/// Cloning shares the per-sensor state.
#[derive(Debug, Clone, Default)]
pub struct LimitMonitor {
    limits: Arc<HashMap<String, LimitConfig>>,
    states: Arc<Mutex<HashMap<ActivityKey, SensorState>>>,
}

impl LimitMonitor {
    pub fn new(limits: HashMap<String, LimitConfig>) -> Self {
        Self {
            limits: Arc::new(limits),
            states: Arc::default(),
        }
    }

    /// Feed one accepted reading.
    ///
    /// Returns an alarm metric when the limit starts to be exceeded or when
    /// it recovers, `None` otherwise (including for unlimited sensors).
    #[instrument(skip_all, fields(sensor = %reading.key()))]
    pub async fn observe(&self, reading: &SensorReading, epoch: i64) -> Option<Metric> {
        let limit = self.limits.get(&reading.sensor_id)?;
        let key = reading.key();

        let mut states = self.states.lock().await;
        let state = states.entry(key.clone()).or_default();
        let mean = state.push(reading.value, limit.window);

        let evaluation =
            ResourceEvaluation::evaluate(mean, limit.limit, limit.grace, state.grace_counter);

        let alarm = match evaluation {
            ResourceEvaluation::Ok => {
                state.grace_counter = 0;
                None
            }
            ResourceEvaluation::Exceeding => {
                state.grace_counter += 1;
                None
            }
            ResourceEvaluation::StartsToExceed => {
                state.grace_counter += 1;
                debug!("{key}: mean {mean:.2} exceeds limit {}", limit.limit);
                Some(Metric::limit_alarm(&key, true, epoch))
            }
            ResourceEvaluation::BackToOk => {
                state.grace_counter = 0;
                debug!("{key}: mean {mean:.2} back under limit {}", limit.limit);
                Some(Metric::limit_alarm(&key, false, epoch))
            }
        };

        trace!(
            "{key}: mean {mean:.2} (max: {}) -> {evaluation:?} ({}/{})",
            limit.limit, state.grace_counter, limit.grace
        );

        alarm
    }
}
