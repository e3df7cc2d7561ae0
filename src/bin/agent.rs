use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use sensor_watch::{
    SensorReading,
    announcement::{DEFAULT_ANNOUNCE_INTERVAL_SECS, MONITOR_TOPIC, MonitorAnnouncement},
    monitors::host::{CPU_SENSOR, HostSampler, MEM_SENSOR, MINIMUM_CPU_UPDATE_INTERVAL},
    timestamp,
    util::{get_broker_host, get_broker_port, get_machine_id},
};
use tracing::{debug, error, instrument, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Seconds between CPU samples
    #[arg(long, default_value_t = 1)]
    cpu_interval: u64,

    /// Seconds between memory samples
    #[arg(long, default_value_t = 1)]
    mem_interval: u64,

    /// Seconds between sensor announcements on /sensor_monitors
    #[arg(long, default_value_t = DEFAULT_ANNOUNCE_INTERVAL_SECS)]
    announce_interval: u64,

    /// Machine id to publish under (defaults to MACHINE_ID or the host name)
    #[arg(long)]
    machine_id: Option<String>,

    /// Broker host (defaults to MQTT_HOST or localhost)
    #[arg(long)]
    host: Option<String>,

    /// Broker port (defaults to MQTT_PORT or 1883)
    #[arg(long)]
    port: Option<u16>,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("sensor_watch", LevelFilter::DEBUG),
        ("sensor_watch_agent", LevelFilter::DEBUG),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();

    let args = Args::parse();
    trace!("started with args: {args:?}");

    let machine_id = args.machine_id.clone().unwrap_or_else(get_machine_id);
    let host = args.host.clone().unwrap_or_else(get_broker_host);
    let port = args.port.unwrap_or_else(get_broker_port);

    let mut options = MqttOptions::new(format!("sensor-watch-agent-{machine_id}"), host, port);
    options.set_keep_alive(Duration::from_secs(20));

    let (client, mut eventloop) = AsyncClient::new(options, 32);

    tokio::spawn(async move {
        loop {
            if let Err(e) = eventloop.poll().await {
                warn!("MQTT connection error: {e}; retrying");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    });

    let cpu_interval = args.cpu_interval.max(1);
    let mem_interval = args.mem_interval.max(1);

    let announcement = MonitorAnnouncement::new(machine_id.clone())
        .with_sensor(MEM_SENSOR, mem_interval)
        .with_sensor(CPU_SENSOR, cpu_interval);
    let announce = tokio::spawn(announce_loop(
        client.clone(),
        announcement,
        Duration::from_secs(args.announce_interval.max(1)),
    ));

    let cpu = tokio::spawn(publish_loop(
        client.clone(),
        machine_id.clone(),
        CPU_SENSOR,
        Duration::from_secs(cpu_interval),
        HostSampler::cpu_percent,
    ));
    let mem = tokio::spawn(publish_loop(
        client,
        machine_id,
        MEM_SENSOR,
        Duration::from_secs(mem_interval),
        HostSampler::memory_percent,
    ));

    let (announce, cpu, mem) = tokio::join!(announce, cpu, mem);
    announce?;
    cpu?;
    mem?;

    Ok(())
}

#[instrument(skip(client, interval, sample))]
async fn publish_loop(
    client: AsyncClient,
    machine_id: String,
    sensor_id: &'static str,
    interval: Duration,
    sample: fn(&mut HostSampler) -> f64,
) {
    let mut sampler = HostSampler::new();
    tokio::time::sleep(MINIMUM_CPU_UPDATE_INTERVAL).await;

    let mut ticker = tokio::time::interval(interval);

    loop {
        ticker.tick().await;

        let reading = SensorReading {
            machine_id: machine_id.clone(),
            sensor_id: sensor_id.to_string(),
            timestamp: timestamp::from_epoch(Utc::now().timestamp()),
            value: sample(&mut sampler),
        };

        let payload = match reading.to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                error!("failed to encode reading: {e}");
                continue;
            }
        };

        match client
            .publish(reading.topic(), QoS::AtLeastOnce, false, payload)
            .await
        {
            Ok(()) => debug!(
                "published {} {:.2} at {}",
                reading.topic(),
                reading.value,
                reading.timestamp
            ),
            Err(e) => error!("failed to publish {}: {e}", reading.topic()),
        }
    }
}

#[instrument(skip_all, fields(machine_id = %announcement.machine_id))]
async fn announce_loop(client: AsyncClient, announcement: MonitorAnnouncement, interval: Duration) {
    let payload = match announcement.to_payload() {
        Ok(payload) => payload,
        Err(e) => {
            error!("failed to encode announcement: {e}");
            return;
        }
    };

    let mut ticker = tokio::time::interval(interval);

    loop {
        ticker.tick().await;

        match client
            .publish(MONITOR_TOPIC, QoS::AtLeastOnce, false, payload.clone())
            .await
        {
            Ok(()) => debug!(
                "announced {} sensors on {MONITOR_TOPIC}",
                announcement.sensors.len()
            ),
            Err(e) => error!("failed to publish announcement: {e}"),
        }
    }
}
