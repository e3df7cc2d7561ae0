use sysinfo::System;

const MQTT_HOST: &str = "MQTT_HOST";

const DEFAULT_MQTT_HOST: &str = "localhost";

pub fn get_broker_host() -> String {
    std::env::var(MQTT_HOST).unwrap_or_else(|_| DEFAULT_MQTT_HOST.to_string())
}

const MQTT_PORT: &str = "MQTT_PORT";

const DEFAULT_MQTT_PORT: u16 = 1883;

pub fn get_broker_port() -> u16 {
    let port_from_env = std::env::var(MQTT_PORT);
    port_from_env.map_or(DEFAULT_MQTT_PORT, |res| res.parse().unwrap_or(DEFAULT_MQTT_PORT))
}

const MACHINE_ID: &str = "MACHINE_ID";

/// Machine id the agent publishes under: `MACHINE_ID`, else the host name
pub fn get_machine_id() -> String {
    std::env::var(MACHINE_ID)
        .ok()
        .filter(|id| !id.trim().is_empty())
        .or_else(System::host_name)
        .unwrap_or_else(|| String::from("unknown"))
}
