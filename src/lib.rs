pub mod actors;
pub mod announcement;
pub mod config;
pub mod decoder;
pub mod error;
pub mod forwarder;
pub mod ingest;
pub mod monitors;
pub mod mqtt;
pub mod timestamp;
pub mod tracker;
pub mod util;

use serde::{Deserialize, Serialize};

/// Topic prefix the field agents publish under.
pub const TOPIC_PREFIX: &str = "/sensors";

/// JSON body of a reading on `/sensors/<machine>/<sensor>`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingPayload {
    pub timestamp: String,
    pub value: f64,
}

/// One decoded sensor observation.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub machine_id: String,
    pub sensor_id: String,
    pub timestamp: String,
    pub value: f64,
}

impl SensorReading {
    pub fn key(&self) -> ActivityKey {
        ActivityKey::new(&self.machine_id, &self.sensor_id)
    }

    /// Topic this reading is published on (`/sensors/<machine>/<sensor>`).
    pub fn topic(&self) -> String {
        format!("{TOPIC_PREFIX}/{}/{}", self.machine_id, self.sensor_id)
    }

    /// JSON body as published by the agents.
    pub fn to_payload(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&ReadingPayload {
            timestamp: self.timestamp.clone(),
            value: self.value,
        })
    }
}

/// Identity of a single sensor across the fleet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActivityKey {
    pub machine_id: String,
    pub sensor_id: String,
}

impl ActivityKey {
    pub fn new(machine_id: impl Into<String>, sensor_id: impl Into<String>) -> Self {
        Self {
            machine_id: machine_id.into(),
            sensor_id: sensor_id.into(),
        }
    }
}

impl std::fmt::Display for ActivityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.machine_id, self.sensor_id)
    }
}
