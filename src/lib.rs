//! MQTT session core for the IoTv sensor demo.
//!
//! A long-lived [`MqttSession`] subscribes to the two sensor topics and
//! reports lifecycle events and decoded [`Observation`]s to an
//! [`EventSink`]. Outbound readings go through [`Publisher`], which uses a
//! throwaway connection per message.
//!
//! ```ignore
//! use iotv_link::{default_subscriptions, ChannelSink, ConnectionConfig, MqttSession};
//!
//! let (sink, mut events) = ChannelSink::channel();
//! let session = MqttSession::with_rumqtt(sink);
//! session.connect(&ConnectionConfig::default()).await?;
//! session.subscribe_all(&default_subscriptions()).await?;
//! while let Some(event) = events.recv().await {
//!     // update the UI
//! }
//! ```

pub mod config;
pub mod error;
pub mod mqtt;
pub mod router;
pub mod simulator;
pub mod sink;
pub mod state;

pub use config::{AppConfig, ConnectionConfig, ReconnectConfig, SimulatorConfig};
pub use error::{ConnectError, PublishError, SessionError, TransportError};
pub use mqtt::{
    default_subscriptions, InboundMessage, MqttSession, OutboundMessage, Publisher, QosLevel,
    SessionState, Subscription,
};
pub use router::{MessageRouter, Observation, SensorHandler, SensorKind, TopicHandler};
pub use sink::{ChannelSink, EventSink, SinkEvent};
pub use state::ObservationLog;
