//! Error types for the ingestion pipeline
//!
//! Every error here is recovered where it happens: the message or metric is
//! dropped, the event is logged and processing continues.

use std::time::Duration;

use thiserror::Error;

/// An inbound message that cannot become a [`crate::SensorReading`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Topic has too few segments or an empty machine/sensor id
    #[error("malformed topic '{topic}': expected /<prefix>/<machine>/<sensor>")]
    MalformedTopic { topic: String },

    /// Payload is not JSON or lacks a string `timestamp` / numeric `value`
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

/// A timestamp string that is not `YYYY-MM-DDTHH:MM:SS` local time
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot parse timestamp '{input}': {reason}")]
pub struct ParseError {
    pub input: String,
    pub reason: String,
}

/// Failure to deliver one metric line to the backend
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("failed to connect to metrics backend {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write metric to {endpoint}: {source}")]
    Write {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{stage} to {endpoint} timed out after {timeout:?}")]
    Timeout {
        endpoint: String,
        stage: &'static str,
        timeout: Duration,
    },
}
