use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Topic carrying temperature readings
pub const TEMPERATURE_TOPIC: &str = "IoTv/TopicTest1";
/// Topic carrying humidity readings
pub const HUMIDITY_TOPIC: &str = "IoTv/TopicTest2";

/// MQTT delivery guarantee
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QosLevel {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl From<QosLevel> for rumqttc::QoS {
    fn from(qos: QosLevel) -> Self {
        match qos {
            QosLevel::AtMostOnce => rumqttc::QoS::AtMostOnce,
            QosLevel::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            QosLevel::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub topic_filter: String,
    pub qos: QosLevel,
}

impl Subscription {
    pub fn new(topic_filter: impl Into<String>, qos: QosLevel) -> Self {
        Self {
            topic_filter: topic_filter.into(),
            qos,
        }
    }
}

/// The two sensor topics, both at QoS 1
pub fn default_subscriptions() -> Vec<Subscription> {
    vec![
        Subscription::new(TEMPERATURE_TOPIC, QosLevel::AtLeastOnce),
        Subscription::new(HUMIDITY_TOPIC, QosLevel::AtLeastOnce),
    ]
}

/// A message delivered by the broker to the subscriber session
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            payload,
            received_at: Utc::now(),
        }
    }

    /// Try to parse payload as UTF-8 string
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// A message to be sent through a one-shot publish connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl OutboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}
