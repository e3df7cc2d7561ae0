//! Turns an MQTT topic and JSON payload into a [`SensorReading`]

use crate::{ReadingPayload, SensorReading, error::DecodeError};

/// `/sensors/<machine>/<sensor>` splits into `["", "sensors", machine, sensor]`.
pub const MIN_TOPIC_SEGMENTS: usize = 4;

const MACHINE_SEGMENT: usize = 2;
const SENSOR_SEGMENT: usize = 3;

/// Decode one inbound message.
///
/// Extra topic segments after the sensor id are ignored. Extra payload fields
/// are ignored as well.
pub fn decode(topic: &str, payload: &[u8]) -> Result<SensorReading, DecodeError> {
    let segments: Vec<&str> = topic.split('/').collect();
    if segments.len() < MIN_TOPIC_SEGMENTS {
        return Err(malformed_topic(topic));
    }

    let (Some(machine_id), Some(sensor_id)) =
        (segments.get(MACHINE_SEGMENT), segments.get(SENSOR_SEGMENT))
    else {
        return Err(malformed_topic(topic));
    };

    if machine_id.is_empty() || sensor_id.is_empty() {
        return Err(malformed_topic(topic));
    }

    let wire: ReadingPayload = serde_json::from_slice(payload)
        .map_err(|e| DecodeError::MalformedPayload(e.to_string()))?;

    Ok(SensorReading {
        machine_id: machine_id.to_string(),
        sensor_id: sensor_id.to_string(),
        timestamp: wire.timestamp,
        value: wire.value,
    })
}

fn malformed_topic(topic: &str) -> DecodeError {
    DecodeError::MalformedTopic {
        topic: topic.to_string(),
    }
}
