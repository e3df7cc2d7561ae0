//! Long-running background tasks
//!
//! Each actor runs as an independent tokio task and is controlled through a
//! cloneable handle that talks to it over an mpsc command channel.
//!
//! ```text
//!   MQTT publish ──► Ingestor ──► MetricSink (reading)
//!                       │
//!                       ▼
//!               ActivityTracker ◄── InactivitySweeperActor ──► MetricSink (alarm)
//!                                         ▲
//!                                         └── Commands (SweepNow, Shutdown)
//! ```

pub mod messages;
pub mod sweeper;
