//! Topic-to-decoder routing for inbound sensor messages.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::mqtt::message::{InboundMessage, HUMIDITY_TOPIC, TEMPERATURE_TOPIC};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    Temperature,
    Humidity,
}

impl SensorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::Temperature => "temperature",
            SensorKind::Humidity => "humidity",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            SensorKind::Temperature => "℃",
            SensorKind::Humidity => "%",
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded sensor reading
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Observation {
    pub timestamp: DateTime<Utc>,
    pub kind: SensorKind,
    pub value: i32,
    pub unit: &'static str,
}

/// Decodes the payload of one topic
pub trait TopicHandler: Send + Sync {
    fn handle(&self, msg: &InboundMessage) -> Observation;
}

/// Integer sensor decoder with a lenient policy: anything that does not parse
/// as an `i32` after trimming reads as 0.
#[derive(Debug, Clone, Copy)]
pub struct SensorHandler {
    kind: SensorKind,
}

impl SensorHandler {
    pub fn new(kind: SensorKind) -> Self {
        Self { kind }
    }

    pub fn decode_value(payload: &[u8]) -> i32 {
        String::from_utf8_lossy(payload)
            .trim()
            .parse::<i32>()
            .unwrap_or(0)
    }
}

impl TopicHandler for SensorHandler {
    fn handle(&self, msg: &InboundMessage) -> Observation {
        Observation {
            timestamp: msg.received_at,
            kind: self.kind,
            value: Self::decode_value(&msg.payload),
            unit: self.kind.unit(),
        }
    }
}

/// Exact-match topic router
pub struct MessageRouter {
    handlers: HashMap<String, Box<dyn TopicHandler>>,
}

impl Default for MessageRouter {
    /// Router for the two demo sensor topics
    fn default() -> Self {
        Self::new()
            .with_handler(
                TEMPERATURE_TOPIC,
                SensorHandler::new(SensorKind::Temperature),
            )
            .with_handler(HUMIDITY_TOPIC, SensorHandler::new(SensorKind::Humidity))
    }
}

impl MessageRouter {
    /// An empty router that drops every message
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn with_handler(mut self, topic: impl Into<String>, handler: impl TopicHandler + 'static) -> Self {
        self.register(topic, handler);
        self
    }

    /// Register a handler, replacing any previous one for the topic
    pub fn register(&mut self, topic: impl Into<String>, handler: impl TopicHandler + 'static) {
        self.handlers.insert(topic.into(), Box::new(handler));
    }

    /// Decode `msg` with the handler registered for its topic.
    /// Unknown topics yield `None`.
    pub fn route(&self, msg: &InboundMessage) -> Option<Observation> {
        self.handlers.get(&msg.topic).map(|h| h.handle(msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(topic: &str, payload: &str) -> InboundMessage {
        InboundMessage::new(topic.to_string(), payload.as_bytes().to_vec())
    }

    #[test]
    fn test_temperature_route() {
        let router = MessageRouter::default();
        let message = msg("IoTv/TopicTest1", "23");
        let obs = router.route(&message).unwrap();

        assert_eq!(obs.kind, SensorKind::Temperature);
        assert_eq!(obs.kind.as_str(), "temperature");
        assert_eq!(obs.value, 23);
        assert_eq!(obs.unit, "℃");
        assert_eq!(obs.timestamp, message.received_at);
    }

    #[test]
    fn test_humidity_route() {
        let router = MessageRouter::default();
        let obs = router.route(&msg("IoTv/TopicTest2", "64")).unwrap();

        assert_eq!(obs.kind, SensorKind::Humidity);
        assert_eq!(obs.value, 64);
        assert_eq!(obs.unit, "%");
    }

    #[test]
    fn test_unparseable_payload_reads_zero() {
        let router = MessageRouter::default();
        let obs = router.route(&msg("IoTv/TopicTest1", "abc")).unwrap();
        assert_eq!(obs.value, 0);
        assert_eq!(obs.kind, SensorKind::Temperature);
    }

    #[test]
    fn test_lenient_decode_edge_cases() {
        assert_eq!(SensorHandler::decode_value(b" 42 \r\n"), 42);
        assert_eq!(SensorHandler::decode_value(b"-7"), -7);
        assert_eq!(SensorHandler::decode_value(b"+5"), 5);
        assert_eq!(SensorHandler::decode_value(b"23.5"), 0);
        assert_eq!(SensorHandler::decode_value(b""), 0);
        assert_eq!(SensorHandler::decode_value(b"99999999999"), 0);
        assert_eq!(SensorHandler::decode_value(&[0xff, 0x31]), 0);
    }

    #[test]
    fn test_unknown_topic_is_dropped() {
        let router = MessageRouter::default();
        assert!(router.route(&msg("Unrelated/Topic", "23")).is_none());
        // Matching is exact, not wildcard or case-insensitive
        assert!(router.route(&msg("iotv/topictest1", "23")).is_none());
        assert!(router.route(&msg("IoTv/TopicTest1/sub", "23")).is_none());
    }

    #[test]
    fn test_custom_handler() {
        struct Fixed;
        impl TopicHandler for Fixed {
            fn handle(&self, msg: &InboundMessage) -> Observation {
                Observation {
                    timestamp: msg.received_at,
                    kind: SensorKind::Humidity,
                    value: 1,
                    unit: "%",
                }
            }
        }

        let router = MessageRouter::new().with_handler("lab/rh", Fixed);
        assert_eq!(router.route(&msg("lab/rh", "anything")).unwrap().value, 1);
        assert!(router.route(&msg("IoTv/TopicTest1", "23")).is_none());
    }
}
