use log::{debug, warn};

use crate::{
    config::TopicConfig,
    router::InboundEvent,
    types::{LampId, RenderCommand, SensorText},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LampEntity {
    pub id: LampId,
    pub believed_on: bool,
    pub command_topic: String,
    pub state_topic: String,
}

impl LampEntity {
    fn new(id: LampId, topics: &TopicConfig) -> Self {
        Self {
            id,
            believed_on: false,
            command_topic: topics.command_topic(id).to_string(),
            state_topic: topics.state_topic(id).to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorReading {
    pub topic: String,
    pub text: Option<SensorText>,
    pub last_update_ms: Option<u64>,
}

/// Believed state of both lamps and the temperature feed.
///
/// Only authoritative inbound messages mutate it. Lamp updates are idempotent; temperature
/// updates always re-render so the display reflects every fresh reading.
#[derive(Debug, Clone)]
pub struct ReconciliationEngine {
    left: LampEntity,
    right: LampEntity,
    sensor: SensorReading,
    unit: String,
}

impl ReconciliationEngine {
    pub fn new(topics: &TopicConfig, unit: &str) -> Self {
        Self {
            left: LampEntity::new(LampId::Left, topics),
            right: LampEntity::new(LampId::Right, topics),
            sensor: SensorReading {
                topic: topics.temperature.clone(),
                text: None,
                last_update_ms: None,
            },
            unit: unit.to_string(),
        }
    }

    pub fn apply(&mut self, event: &InboundEvent, now_ms: u64) -> Option<RenderCommand> {
        match event {
            InboundEvent::LampState { lamp, on } => {
                let entity = self.lamp_mut(*lamp);
                if entity.believed_on == *on {
                    debug!("{} lamp already {}", lamp.as_str(), on_label(*on));
                    return None;
                }
                entity.believed_on = *on;
                Some(RenderCommand::SetLampVisual {
                    lamp: *lamp,
                    on: *on,
                })
            }
            InboundEvent::Temperature(Some(text)) => {
                self.sensor.text = Some(text.clone());
                self.sensor.last_update_ms = Some(now_ms);
                Some(RenderCommand::SetTemperatureText(
                    self.temperature_label(text.as_str()),
                ))
            }
            InboundEvent::Temperature(None) => {
                warn!(
                    "ignoring empty or non-text payload on {}",
                    self.sensor.topic
                );
                None
            }
            InboundEvent::Unknown => None,
        }
    }

    pub fn lamp(&self, lamp: LampId) -> &LampEntity {
        match lamp {
            LampId::Left => &self.left,
            LampId::Right => &self.right,
        }
    }

    pub fn believed_on(&self, lamp: LampId) -> bool {
        self.lamp(lamp).believed_on
    }

    pub fn sensor(&self) -> &SensorReading {
        &self.sensor
    }

    pub fn temperature_label(&self, text: &str) -> String {
        format!("{text} {}", self.unit)
    }

    /// Shown until the first reading arrives.
    pub fn placeholder_temperature(&self) -> String {
        self.temperature_label("--.-")
    }

    fn lamp_mut(&mut self, lamp: LampId) -> &mut LampEntity {
        match lamp {
            LampId::Left => &mut self.left,
            LampId::Right => &mut self.right,
        }
    }
}

fn on_label(on: bool) -> &'static str {
    if on {
        "on"
    } else {
        "off"
    }
}
