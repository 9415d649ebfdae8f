pub mod client;
pub mod identity;
pub mod message;
pub mod publisher;
pub mod resilience;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use client::RumqttConnector;
pub use identity::generate_client_id;
pub use message::{
    default_subscriptions, InboundMessage, OutboundMessage, QosLevel, Subscription,
    HUMIDITY_TOPIC, TEMPERATURE_TOPIC,
};
pub use publisher::Publisher;
pub use session::{MqttSession, SessionState};
pub use transport::{Connector, Link, LinkEvent, LinkEvents, LinkOptions, LinkRequests};
