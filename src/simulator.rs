use rand::Rng;

use crate::config::SimulatorConfig;
use crate::mqtt::message::{OutboundMessage, HUMIDITY_TOPIC, TEMPERATURE_TOPIC};

/// Produces random temperature and humidity readings for the demo timer
#[derive(Debug, Clone)]
pub struct SensorSimulator {
    temperature_range: (i32, i32),
    humidity_range: (i32, i32),
}

impl Default for SensorSimulator {
    fn default() -> Self {
        Self::from_config(&SimulatorConfig::default())
    }
}

impl SensorSimulator {
    pub fn from_config(config: &SimulatorConfig) -> Self {
        Self {
            temperature_range: config.temperature_range,
            humidity_range: config.humidity_range,
        }
    }

    /// One reading per sensor, as messages ready for the publisher
    pub fn next_messages<R: Rng + ?Sized>(&self, rng: &mut R) -> [OutboundMessage; 2] {
        let temperature = sample(rng, self.temperature_range);
        let humidity = sample(rng, self.humidity_range);
        [
            OutboundMessage::new(TEMPERATURE_TOPIC, temperature.to_string()),
            OutboundMessage::new(HUMIDITY_TOPIC, humidity.to_string()),
        ]
    }
}

fn sample<R: Rng + ?Sized>(rng: &mut R, (min, max): (i32, i32)) -> i32 {
    if min >= max {
        return min;
    }
    rng.gen_range(min..max)
}
