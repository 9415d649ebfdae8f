//! Consumer-side event interface of the subscriber session.

use tokio::sync::mpsc;

#[cfg(test)]
use mockall::automock;

use crate::mqtt::message::InboundMessage;
use crate::router::Observation;

/// Receives lifecycle and data events from an [`MqttSession`](crate::MqttSession).
///
/// Implementations need not be thread-safe internally: the session never
/// calls into a sink from two places at once.
#[cfg_attr(test, automock)]
pub trait EventSink: Send {
    fn on_connected(&mut self);

    fn on_disconnected(&mut self);

    /// Every inbound message, routed or not
    fn on_message(&mut self, _msg: &InboundMessage) {}

    fn on_observation(&mut self, observation: &Observation);

    fn on_error(&mut self, message: &str);
}

/// Event forwarded by a [`ChannelSink`]
#[derive(Debug, Clone)]
pub enum SinkEvent {
    Connected,
    Disconnected,
    Message(InboundMessage),
    Observation(Observation),
    Error(String),
}

/// Sink that marshals every callback onto a channel drained by the owning
/// thread (e.g. a UI loop).
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SinkEvent>,
    forward_messages: bool,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<SinkEvent>) -> Self {
        Self {
            tx,
            forward_messages: false,
        }
    }

    /// Also forward raw inbound messages, not only decoded observations
    pub fn with_raw_messages(mut self) -> Self {
        self.forward_messages = true;
        self
    }

    /// A sink together with the receiving end of its channel
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    fn send(&self, event: SinkEvent) {
        // A dropped receiver means the owner is shutting down
        let _ = self.tx.send(event);
    }
}

impl EventSink for ChannelSink {
    fn on_connected(&mut self) {
        self.send(SinkEvent::Connected);
    }

    fn on_disconnected(&mut self) {
        self.send(SinkEvent::Disconnected);
    }

    fn on_message(&mut self, msg: &InboundMessage) {
        if self.forward_messages {
            self.send(SinkEvent::Message(msg.clone()));
        }
    }

    fn on_observation(&mut self, observation: &Observation) {
        self.send(SinkEvent::Observation(observation.clone()));
    }

    fn on_error(&mut self, message: &str) {
        self.send(SinkEvent::Error(message.to_string()));
    }
}
