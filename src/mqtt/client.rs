use std::sync::Arc;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet,
};
use tracing::{debug, info};

use crate::error::TransportError;
use crate::mqtt::message::QosLevel;
use crate::mqtt::transport::{Connector, Link, LinkEvent, LinkEvents, LinkOptions, LinkRequests};

/// Request channel capacity between an `AsyncClient` and its event loop
const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// [`Connector`] backed by the `rumqttc` MQTT 3.1.1 client over plain TCP
#[derive(Debug, Clone)]
pub struct RumqttConnector {
    channel_capacity: usize,
}

impl Default for RumqttConnector {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl RumqttConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn build_options(options: &LinkOptions) -> MqttOptions {
        let mut mqttoptions = MqttOptions::new(&options.client_id, &options.host, options.port);
        mqttoptions.set_credentials(&options.username, &options.password);
        mqttoptions.set_keep_alive(options.keep_alive);
        mqttoptions.set_clean_session(options.clean_session);
        mqttoptions
    }
}

#[async_trait]
impl Connector for RumqttConnector {
    async fn connect(&self, options: &LinkOptions) -> Result<Link, TransportError> {
        debug!(
            "Opening rumqttc link to {}:{} as {}",
            options.host, options.port, options.client_id
        );
        let (client, mut eventloop) =
            AsyncClient::new(Self::build_options(options), self.channel_capacity);

        // rumqttc connects lazily on the first poll; drive it until CONNACK
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                    if connack.code != ConnectReturnCode::Success {
                        return Err(TransportError::Refused(format!("{:?}", connack.code)));
                    }
                    info!("Connected to MQTT broker: {:?}", connack);
                    break;
                }
                Ok(other) => {
                    debug!("MQTT event before CONNACK: {:?}", other);
                }
                Err(e) => return Err(map_connection_error(e)),
            }
        }

        Ok(Link {
            requests: Arc::new(RumqttRequests { client }),
            events: Box::new(RumqttEvents { eventloop }),
        })
    }
}

struct RumqttRequests {
    client: AsyncClient,
}

#[async_trait]
impl LinkRequests for RumqttRequests {
    async fn subscribe(&self, topic_filter: &str, qos: QosLevel) -> Result<(), TransportError> {
        self.client
            .subscribe(topic_filter, qos.into())
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn publish(
        &self,
        topic: &str,
        qos: QosLevel,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        self.client
            .publish(topic, qos.into(), retain, payload)
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.client
            .disconnect()
            .await
            .map_err(|_| TransportError::Closed)
    }
}

struct RumqttEvents {
    eventloop: EventLoop,
}

#[async_trait]
impl LinkEvents for RumqttEvents {
    async fn next_event(&mut self) -> Result<LinkEvent, TransportError> {
        // Polling again after an error would make rumqttc reconnect on its own,
        // so callers must stop at the first Err.
        match self.eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => Ok(LinkEvent::Message {
                topic: publish.topic.to_string(),
                payload: publish.payload.to_vec(),
            }),
            Ok(Event::Incoming(Packet::SubAck(suback))) => {
                debug!("Subscription acknowledged: {:?}", suback);
                Ok(LinkEvent::SubscribeAcked)
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                Err(TransportError::Io("broker closed the connection".to_string()))
            }
            Ok(Event::Outgoing(Outgoing::Publish(_))) => Ok(LinkEvent::PublishSent),
            Ok(Event::Outgoing(Outgoing::Disconnect)) => Ok(LinkEvent::Closed),
            Ok(_) => Ok(LinkEvent::Other),
            Err(e) => Err(map_connection_error(e)),
        }
    }
}

fn map_connection_error(err: ConnectionError) -> TransportError {
    match err {
        ConnectionError::ConnectionRefused(code) => TransportError::Refused(format!("{:?}", code)),
        ConnectionError::Io(e) => TransportError::Io(e.to_string()),
        ConnectionError::NetworkTimeout => TransportError::Io("network timeout".to_string()),
        ConnectionError::RequestsDone => TransportError::Closed,
        other => TransportError::Protocol(other.to_string()),
    }
}
