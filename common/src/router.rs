use crate::{
    engine::ReconciliationEngine,
    types::{LampId, SensorText},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    LampState { lamp: LampId, on: bool },
    /// `None` when the payload was empty or not text.
    Temperature(Option<SensorText>),
    Unknown,
}

/// `true` iff the payload starts with the exact bytes `ON`.
pub fn derive_on(payload: &[u8]) -> bool {
    payload.len() >= 2 && &payload[..2] == b"ON"
}

#[derive(Debug, Clone)]
pub struct TopicRouter {
    left_state: String,
    right_state: String,
    temperature: String,
}

impl TopicRouter {
    /// Routes each entity's state topic and the sensor topic back to it.
    pub fn new(engine: &ReconciliationEngine) -> Self {
        Self {
            left_state: engine.lamp(LampId::Left).state_topic.clone(),
            right_state: engine.lamp(LampId::Right).state_topic.clone(),
            temperature: engine.sensor().topic.clone(),
        }
    }

    pub fn classify(&self, topic: &str, payload: &[u8]) -> InboundEvent {
        if topic == self.left_state {
            InboundEvent::LampState {
                lamp: LampId::Left,
                on: derive_on(payload),
            }
        } else if topic == self.right_state {
            InboundEvent::LampState {
                lamp: LampId::Right,
                on: derive_on(payload),
            }
        } else if topic == self.temperature {
            InboundEvent::Temperature(SensorText::from_payload(payload))
        } else {
            InboundEvent::Unknown
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TopicConfig;

    fn router() -> TopicRouter {
        TopicRouter::new(&ReconciliationEngine::new(
            &TopicConfig::with_base("test"),
            "°C",
        ))
    }

    #[test]
    fn derive_on_requires_exact_prefix() {
        assert!(derive_on(b"ON"));
        assert!(derive_on(b"ONLINE"));
        assert!(!derive_on(b"OFF"));
        assert!(!derive_on(b""));
        assert!(!derive_on(b"O"));
        assert!(!derive_on(b"on"));
        assert!(!derive_on(b" ON"));
    }

    #[test]
    fn classifies_lamp_topics() {
        let router = router();
        assert_eq!(
            router.classify("test/lamp_left/state", b"ON"),
            InboundEvent::LampState {
                lamp: LampId::Left,
                on: true
            }
        );
        assert_eq!(
            router.classify("test/lamp_right/state", b"OFF"),
            InboundEvent::LampState {
                lamp: LampId::Right,
                on: false
            }
        );
    }

    #[test]
    fn classifies_temperature_with_truncation() {
        let router = router();
        let InboundEvent::Temperature(Some(text)) =
            router.classify("test/temperature", b"21.123456789012345678")
        else {
            panic!("expected temperature event");
        };
        assert_eq!(text.as_str(), "21.123456789012");

        assert_eq!(
            router.classify("test/temperature", b""),
            InboundEvent::Temperature(None)
        );
    }

    #[test]
    fn unknown_and_wildcard_like_topics_are_unknown() {
        let router = router();
        assert_eq!(router.classify("test/lamp_left/cmd", b"ON"), InboundEvent::Unknown);
        assert_eq!(router.classify("test/+/state", b"ON"), InboundEvent::Unknown);
        assert_eq!(router.classify("TEST/temperature", b"20"), InboundEvent::Unknown);
    }
}
