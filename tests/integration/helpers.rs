//! Helper types for integration tests

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sensor_watch::{
    config::BackendConfig,
    error::ForwardError,
    forwarder::{Metric, MetricSink},
};
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::sync::Mutex;

/// Sink that keeps every metric in memory
#[derive(Default)]
pub struct RecordingSink {
    metrics: Mutex<Vec<Metric>>,
}

impl RecordingSink {
    pub async fn metrics(&self) -> Vec<Metric> {
        self.metrics.lock().await.clone()
    }
}

#[async_trait]
impl MetricSink for RecordingSink {
    async fn forward(&self, metric: &Metric) -> Result<(), ForwardError> {
        self.metrics.lock().await.push(metric.clone());
        Ok(())
    }
}

/// Plaintext Graphite stand-in listening on an ephemeral port
pub struct GraphiteCapture {
    port: u16,
    lines: Arc<Mutex<Vec<String>>>,
    connections: Arc<Mutex<usize>>,
}

impl GraphiteCapture {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let lines = Arc::new(Mutex::new(vec![]));
        let connections = Arc::new(Mutex::new(0));

        let accepted_lines = lines.clone();
        let accepted = connections.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                *accepted.lock().await += 1;

                let lines = accepted_lines.clone();
                tokio::spawn(async move {
                    let mut buf = String::new();
                    if socket.read_to_string(&mut buf).await.is_ok() {
                        lines
                            .lock()
                            .await
                            .extend(buf.lines().map(str::to_string));
                    }
                });
            }
        });

        Self {
            port,
            lines,
            connections,
        }
    }

    pub fn backend_config(&self) -> BackendConfig {
        BackendConfig {
            host: "127.0.0.1".to_string(),
            port: self.port,
            ..BackendConfig::default()
        }
    }

    pub async fn connections(&self) -> usize {
        *self.connections.lock().await
    }

    /// Wait until at least `count` lines arrived, then return all of them
    pub async fn wait_for_lines(&self, count: usize) -> Vec<String> {
        for _ in 0..100 {
            {
                let lines = self.lines.lock().await;
                if lines.len() >= count {
                    return lines.clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.lines.lock().await.clone()
    }
}

/// Backend config pointing at a port nothing listens on
pub async fn closed_backend_config() -> BackendConfig {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };

    BackendConfig {
        host: "127.0.0.1".to_string(),
        port,
        connect_timeout_ms: 500,
        write_timeout_ms: 500,
    }
}

pub fn payload(timestamp: &str, value: f64) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "timestamp": timestamp,
        "value": value,
    }))
    .unwrap()
}
