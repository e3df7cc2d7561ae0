use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail, ensure};
use tracing::trace;

/// Hub configuration
///
/// Every section has defaults matching a local single-host setup, so an
/// empty file (or no file at all) is a valid configuration.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub broker: BrokerConfig,

    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub sweep: SweepConfig,

    /// Usage limits keyed by sensor id (e.g. `MEM_USED`)
    #[serde(default = "default_limits")]
    pub limits: HashMap<String, LimitConfig>,

    /// Period of the ingest statistics log line
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            backend: BackendConfig::default(),
            sweep: SweepConfig::default(),
            limits: default_limits(),
            stats_interval_secs: default_stats_interval(),
        }
    }
}

impl Config {
    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs.max(1))
    }

    /// Reject values that would make every sensor look inactive or that
    /// can never be compared
    pub fn validate(&self) -> anyhow::Result<()> {
        self.sweep.threshold.validate()?;

        for (sensor_id, limit) in &self.limits {
            ensure!(
                limit.limit.is_finite(),
                "limit for {sensor_id} must be a finite number, got {}",
                limit.limit
            );
        }

        Ok(())
    }
}

/// MQTT broker connection and subscription
#[derive(Debug, Clone, serde::Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_host")]
    pub host: String,

    #[serde(default = "default_broker_port")]
    pub port: u16,

    #[serde(default = "default_client_id")]
    pub client_id: String,

    #[serde(default = "default_topic_filter")]
    pub topic_filter: String,

    #[serde(default)]
    pub qos: QosLevel,

    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,

    #[serde(default = "default_clean_session")]
    pub clean_session: bool,

    /// How long the initial connection may take before startup fails
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Pause between reconnect attempts after the connection dropped
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,

    /// Upper bound on messages handled concurrently
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_broker_host(),
            port: default_broker_port(),
            client_id: default_client_id(),
            topic_filter: default_topic_filter(),
            qos: QosLevel::default(),
            keep_alive_secs: default_keep_alive(),
            clean_session: default_clean_session(),
            connect_timeout_secs: default_connect_timeout(),
            reconnect_delay_secs: default_reconnect_delay(),
            max_in_flight: default_max_in_flight(),
            username: None,
            password: None,
        }
    }
}

impl BrokerConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QosLevel {
    AtMostOnce,
    #[default]
    AtLeastOnce,
    ExactlyOnce,
}

impl From<QosLevel> for rumqttc::QoS {
    fn from(level: QosLevel) -> Self {
        match level {
            QosLevel::AtMostOnce => rumqttc::QoS::AtMostOnce,
            QosLevel::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            QosLevel::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

/// Plaintext metrics backend
#[derive(Debug, Clone, serde::Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_backend_host")]
    pub host: String,

    #[serde(default = "default_backend_port")]
    pub port: u16,

    #[serde(default = "default_io_timeout")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_io_timeout")]
    pub write_timeout_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: default_backend_host(),
            port: default_backend_port(),
            connect_timeout_ms: default_io_timeout(),
            write_timeout_ms: default_io_timeout(),
        }
    }
}

/// Inactivity sweep
#[derive(Debug, Clone, serde::Deserialize)]
pub struct SweepConfig {
    #[serde(default = "default_sweep_interval")]
    pub interval_ms: u64,

    #[serde(default)]
    pub threshold: ThresholdConfig,

    #[serde(default)]
    pub alarm_mode: AlarmMode,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_sweep_interval(),
            threshold: ThresholdConfig::default(),
            alarm_mode: AlarmMode::default(),
        }
    }
}

impl SweepConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

/// How the staleness threshold of a sweep is derived
#[derive(Debug, Clone, Copy, PartialEq, serde::Deserialize)]
#[serde(tag = "policy", rename_all = "lowercase")]
pub enum ThresholdConfig {
    /// `seconds since previous sweep * multiplier * report_interval_secs`
    Adaptive {
        #[serde(default = "default_multiplier")]
        multiplier: f64,

        #[serde(default = "default_report_interval")]
        report_interval_secs: f64,
    },

    /// Constant threshold independent of sweep timing
    Fixed { seconds: f64 },
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        ThresholdConfig::Adaptive {
            multiplier: default_multiplier(),
            report_interval_secs: default_report_interval(),
        }
    }
}

impl ThresholdConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        match *self {
            ThresholdConfig::Adaptive {
                multiplier,
                report_interval_secs,
            } => {
                if !(multiplier.is_finite() && multiplier > 0.0) {
                    bail!("threshold multiplier must be positive, got {multiplier}");
                }
                if !(report_interval_secs.is_finite() && report_interval_secs > 0.0) {
                    bail!("report_interval_secs must be positive, got {report_interval_secs}");
                }
            }
            ThresholdConfig::Fixed { seconds } => {
                if !(seconds.is_finite() && seconds >= 0.0) {
                    bail!("fixed threshold must be zero or more seconds, got {seconds}");
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlarmMode {
    /// Re-alarm on every sweep while a sensor stays silent
    #[default]
    Level,

    /// Alarm once per silent period
    Edge,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct LimitConfig {
    pub limit: f64,

    /// Consecutive readings above the limit tolerated before alarming
    #[serde(default)]
    pub grace: usize,

    /// Number of recent readings averaged before comparing with the limit
    #[serde(default = "default_window")]
    pub window: usize,
}

fn default_broker_host() -> String {
    String::from("localhost")
}

fn default_broker_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    String::from("sensor-watch-hub")
}

fn default_topic_filter() -> String {
    format!("{}/#", crate::TOPIC_PREFIX)
}

fn default_keep_alive() -> u64 {
    20
}

fn default_clean_session() -> bool {
    true
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_reconnect_delay() -> u64 {
    1
}

fn default_max_in_flight() -> usize {
    64
}

fn default_stats_interval() -> u64 {
    60
}

fn default_backend_host() -> String {
    String::from("127.0.0.1")
}

fn default_backend_port() -> u16 {
    2003
}

fn default_io_timeout() -> u64 {
    2000
}

fn default_sweep_interval() -> u64 {
    1000
}

fn default_multiplier() -> f64 {
    10.0
}

fn default_report_interval() -> f64 {
    1.0
}

fn default_window() -> usize {
    5
}

fn default_limits() -> HashMap<String, LimitConfig> {
    HashMap::from([(
        String::from("MEM_USED"),
        LimitConfig {
            limit: 90.0,
            grace: 0,
            window: default_window(),
        },
    )])
}

/// Read a JSON or TOML (by `.toml` extension) configuration file
pub fn read_config_file(path: impl AsRef<Path>) -> anyhow::Result<Config> {
    let path = path.as_ref();
    let file_content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;

    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

    let config: Config = if is_toml {
        toml::from_str(&file_content)
            .with_context(|| format!("invalid TOML configuration in {}", path.display()))?
    } else {
        serde_json::from_str(&file_content)
            .with_context(|| format!("invalid JSON configuration in {}", path.display()))?
    };

    config
        .validate()
        .with_context(|| format!("invalid configuration in {}", path.display()))?;

    trace!("loaded config: {config:?}");
    Ok(config)
}
