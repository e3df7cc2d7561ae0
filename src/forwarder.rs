//! Metric forwarding to a Graphite-style plaintext backend
//!
//! Every metric is sent as a single line over its own TCP connection:
//!
//! ```text
//! <path> <value> <epoch>\n
//! ```
//!
//! Delivery is best effort. A failed forward is reported to the caller and
//! never retried, so one broken metric cannot hold up the next one.

use std::time::Duration;

use async_trait::async_trait;
use tokio::{io::AsyncWriteExt, net::TcpStream, time::timeout};
use tracing::{instrument, trace};

use crate::{ActivityKey, config::BackendConfig, error::ForwardError};

/// A single data point on its way to the backend
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub path: String,
    pub value: f64,
    pub epoch: i64,
}

impl Metric {
    pub fn new(path: impl Into<String>, value: f64, epoch: i64) -> Self {
        Self {
            path: path.into(),
            value,
            epoch,
        }
    }

    /// A real sensor value, `<machine>.<sensor>`
    pub fn reading(machine_id: &str, sensor_id: &str, value: f64, epoch: i64) -> Self {
        Self::new(format!("{machine_id}.{sensor_id}"), value, epoch)
    }

    /// Synthetic alarm for a sensor that stopped reporting
    pub fn inactivity_alarm(key: &ActivityKey, epoch: i64) -> Self {
        Self::new(
            format!("{}.alarms.inactive.{}", key.machine_id, key.sensor_id),
            1.0,
            epoch,
        )
    }

    /// Synthetic alarm for a sensor whose values crossed a configured limit.
    ///
    /// `1` while the limit is exceeded, `0` once it recovered.
    pub fn limit_alarm(key: &ActivityKey, active: bool, epoch: i64) -> Self {
        Self::new(
            format!("{}.alarms.limit.{}", key.machine_id, key.sensor_id),
            if active { 1.0 } else { 0.0 },
            epoch,
        )
    }

    /// Line protocol representation, newline included
    pub fn to_line(&self) -> String {
        format!("{} {:.6} {}\n", self.path, self.value, self.epoch)
    }
}

/// Destination for metrics
///
/// Implementations must be `Send + Sync`; the ingestion tasks and the
/// sweeper share one sink.
#[async_trait]
pub trait MetricSink: Send + Sync {
    /// Deliver one metric. No retries.
    async fn forward(&self, metric: &Metric) -> Result<(), ForwardError>;
}

/// Plaintext TCP forwarder, one connection per metric
#[derive(Debug, Clone)]
pub struct GraphiteForwarder {
    endpoint: String,
    connect_timeout: Duration,
    write_timeout: Duration,
}

impl GraphiteForwarder {
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            endpoint: format!("{}:{}", config.host, config.port),
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            write_timeout: Duration::from_millis(config.write_timeout_ms),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn connect(&self) -> Result<TcpStream, ForwardError> {
        timeout(self.connect_timeout, TcpStream::connect(&self.endpoint))
            .await
            .map_err(|_| ForwardError::Timeout {
                endpoint: self.endpoint.clone(),
                stage: "connect",
                timeout: self.connect_timeout,
            })?
            .map_err(|source| ForwardError::Connect {
                endpoint: self.endpoint.clone(),
                source,
            })
    }
}

#[async_trait]
impl MetricSink for GraphiteForwarder {
    #[instrument(skip(self, metric), fields(path = %metric.path))]
    async fn forward(&self, metric: &Metric) -> Result<(), ForwardError> {
        let line = metric.to_line();

        // dropped on every return path below, which closes the connection
        let mut stream = self.connect().await?;

        let write = async {
            stream.write_all(line.as_bytes()).await?;
            stream.shutdown().await?;
            Ok::<_, std::io::Error>(())
        };

        timeout(self.write_timeout, write)
            .await
            .map_err(|_| ForwardError::Timeout {
                endpoint: self.endpoint.clone(),
                stage: "write",
                timeout: self.write_timeout,
            })?
            .map_err(|source| ForwardError::Write {
                endpoint: self.endpoint.clone(),
                source,
            })?;

        trace!("forwarded {}", line.trim_end());
        Ok(())
    }
}
