//! Broker link abstraction.
//!
//! A [`Connector`] opens a [`Link`], which is split in two halves: the
//! request side can be shared and used from any task, while the event side is
//! polled by exactly one owner. Dropping the event side releases the
//! underlying connection.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::ConnectionConfig;
use crate::error::TransportError;
use crate::mqtt::identity::generate_client_id;
use crate::mqtt::message::QosLevel;

/// Everything needed to open one connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkOptions {
    pub client_id: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub keep_alive: Duration,
    pub clean_session: bool,
}

impl LinkOptions {
    /// Options for a fresh clean-session connection with a newly generated client id
    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self {
            client_id: generate_client_id(&config.client_id_prefix),
            host: config.server_host.clone(),
            port: config.server_port,
            username: config.username.clone(),
            password: config.password.clone(),
            keep_alive: config.keep_alive(),
            clean_session: true,
        }
    }
}

/// Events surfaced by the polling half of a link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// An application message arrived from the broker
    Message { topic: String, payload: Vec<u8> },
    /// An outgoing PUBLISH was written to the network
    PublishSent,
    SubscribeAcked,
    /// Our DISCONNECT was written; nothing more will arrive
    Closed,
    /// Keep-alive traffic and other packets of no interest
    Other,
}

#[async_trait]
pub trait LinkRequests: Send + Sync {
    async fn subscribe(&self, topic_filter: &str, qos: QosLevel) -> Result<(), TransportError>;

    async fn publish(
        &self,
        topic: &str,
        qos: QosLevel,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;
}

#[async_trait]
pub trait LinkEvents: Send {
    /// Wait for the next event. An error means the connection is gone.
    async fn next_event(&mut self) -> Result<LinkEvent, TransportError>;
}

/// An established connection, after CONNACK
pub struct Link {
    pub requests: Arc<dyn LinkRequests>,
    pub events: Box<dyn LinkEvents>,
}

#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection and wait until the broker accepts it
    async fn connect(&self, options: &LinkOptions) -> Result<Link, TransportError>;
}
