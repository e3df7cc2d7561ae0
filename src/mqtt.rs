//! MQTT subscriber feeding the [`Ingestor`]
//!
//! The first connection is part of startup: if the broker refuses it, or
//! does not answer within the configured timeout, the error is returned and
//! the hub exits. Once running, dropped connections are retried forever and
//! the subscription is renewed on every reconnect.

use anyhow::{Context, Result, bail};
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, Incoming, MqttOptions, QoS,
    SubscribeReasonCode,
};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, instrument, trace, warn};

use crate::{
    config::BrokerConfig,
    ingest::{IngestDispatcher, Ingestor},
};

/// An established, subscribed broker connection
pub struct MqttListener {
    client: AsyncClient,
    eventloop: EventLoop,
    config: BrokerConfig,
}

impl MqttListener {
    /// Connect to the broker and subscribe to the configured topic filter
    #[instrument(skip_all, fields(broker = %format!("{}:{}", config.host, config.port)))]
    pub async fn connect(config: BrokerConfig) -> Result<Self> {
        let mut options =
            MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
        options.set_keep_alive(config.keep_alive());
        options.set_clean_session(config.clean_session);
        if let Some(username) = &config.username {
            options.set_credentials(username.clone(), config.password.clone().unwrap_or_default());
        }

        let (client, mut eventloop) = AsyncClient::new(options, 32);

        client
            .subscribe(config.topic_filter.clone(), config.qos.into())
            .await
            .context("failed to queue MQTT subscription")?;

        timeout(config.connect_timeout(), wait_for_subscription(&mut eventloop))
            .await
            .with_context(|| {
                format!(
                    "timed out after {:?} connecting to MQTT broker {}:{}",
                    config.connect_timeout(),
                    config.host,
                    config.port
                )
            })??;

        info!(topic = %config.topic_filter, "subscribed to sensor feed");

        Ok(Self {
            client,
            eventloop,
            config,
        })
    }

    fn qos(&self) -> QoS {
        self.config.qos.into()
    }

    /// Drive the connection for the life of the process.
    ///
    /// Every publish is handled on its own task. Once `max_in_flight`
    /// messages are being handled the event loop waits for one of them to
    /// finish, which holds back acknowledgements to the broker.
    #[instrument(skip_all)]
    pub async fn run(mut self, ingestor: Ingestor) {
        let stats = ingestor.stats();
        stats.set_mqtt_connected(true);
        let dispatcher = IngestDispatcher::new(ingestor, self.config.max_in_flight);

        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    trace!(topic = %publish.topic, "message arrived");
                    if let Err(e) = dispatcher.dispatch(publish.topic, publish.payload).await {
                        warn!("dropping message: {e:#}");
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                    if ack.code != ConnectReturnCode::Success {
                        warn!("broker refused reconnect: {:?}", ack.code);
                        continue;
                    }
                    info!("reconnected to MQTT broker");
                    stats.set_mqtt_connected(true);
                    if let Err(e) = self
                        .client
                        .try_subscribe(self.config.topic_filter.clone(), self.qos())
                    {
                        warn!("failed to renew subscription: {e}");
                    }
                }
                Ok(Event::Incoming(Incoming::SubAck(ack))) => {
                    if ack
                        .return_codes
                        .iter()
                        .any(|code| matches!(code, SubscribeReasonCode::Failure))
                    {
                        warn!(topic = %self.config.topic_filter, "broker rejected subscription");
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    stats.set_mqtt_connected(false);
                    warn!("MQTT connection dropped: {e}; reconnecting");
                    sleep(self.config.reconnect_delay()).await;
                }
            }
        }
    }
}

/// Poll until the broker acknowledged both the connection and the
/// subscription queued before the first poll.
async fn wait_for_subscription(eventloop: &mut EventLoop) -> Result<()> {
    let mut connected = false;

    loop {
        let event = eventloop
            .poll()
            .await
            .context("failed to connect to MQTT broker")?;

        match event {
            Event::Incoming(Incoming::ConnAck(ack)) => {
                if ack.code != ConnectReturnCode::Success {
                    bail!("MQTT broker refused connection: {:?}", ack.code);
                }
                debug!("connected to MQTT broker");
                connected = true;
            }
            Event::Incoming(Incoming::SubAck(ack)) => {
                if ack
                    .return_codes
                    .iter()
                    .any(|code| matches!(code, SubscribeReasonCode::Failure))
                {
                    bail!("MQTT broker rejected subscription");
                }
                if connected {
                    return Ok(());
                }
            }
            other => trace!("ignoring {other:?} during connect"),
        }
    }
}
