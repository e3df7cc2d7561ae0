//! Message types for actor communication

use tokio::sync::oneshot;

use crate::ActivityKey;

/// Commands that can be sent to the InactivitySweeperActor
#[derive(Debug)]
pub enum SweeperCommand {
    /// Run a sweep immediately, outside the regular cadence
    ///
    /// Used for testing and manual checks.
    SweepNow {
        respond_to: oneshot::Sender<SweepReport>,
    },

    /// Gracefully shut down the sweeper
    Shutdown,
}

/// Outcome of a single sweep
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    /// Staleness threshold applied in this sweep, in seconds
    pub threshold_secs: f64,

    /// Number of activity records looked at
    pub scanned: usize,

    /// Sensors an alarm was emitted for
    pub alarmed: Vec<ActivityKey>,

    /// Alarms that could not be delivered to the backend
    pub failed: usize,
}
