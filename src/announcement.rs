//! Agent self-description on `/sensor_monitors`
//!
//! Besides its readings, every agent periodically announces which sensors it
//! publishes and how often, e.g.
//!
//! ```text
//! {"machine_id":"host1","sensors":[{"sensor_id":"MEM_USED","data_type":"double","data_interval":5}]}
//! ```

use serde::{Deserialize, Serialize};

/// Topic announcements are published on; outside the `/sensors/#` feed
pub const MONITOR_TOPIC: &str = "/sensor_monitors";

pub const DEFAULT_ANNOUNCE_INTERVAL_SECS: u64 = 10;

const NUMERIC_DATA_TYPE: &str = "double";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorDescriptor {
    pub sensor_id: String,
    pub data_type: String,

    /// Seconds between two readings of this sensor
    pub data_interval: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorAnnouncement {
    pub machine_id: String,
    pub sensors: Vec<SensorDescriptor>,
}

impl MonitorAnnouncement {
    pub fn new(machine_id: impl Into<String>) -> Self {
        Self {
            machine_id: machine_id.into(),
            sensors: vec![],
        }
    }

    /// Add a numeric sensor reporting every `data_interval` seconds
    pub fn with_sensor(mut self, sensor_id: impl Into<String>, data_interval: u64) -> Self {
        self.sensors.push(SensorDescriptor {
            sensor_id: sensor_id.into(),
            data_type: NUMERIC_DATA_TYPE.to_string(),
            data_interval,
        });
        self
    }

    pub fn to_payload(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}
