use panel_common::{
    LampId, OutboundMessage, Qos, TopicConfig, PAYLOAD_OFF, PAYLOAD_ON, PAYLOAD_TOGGLE,
};

/// Remote end of the panel's lamp topics: flips on TOGGLE and reports retained state.
#[derive(Debug, Clone)]
pub struct LampBank {
    topics: TopicConfig,
    left_on: bool,
    right_on: bool,
}

impl LampBank {
    pub fn new(topics: TopicConfig) -> Self {
        Self {
            topics,
            left_on: false,
            right_on: false,
        }
    }

    pub fn command_topics(&self) -> [&str; 2] {
        [
            self.topics.command_topic(LampId::Left),
            self.topics.command_topic(LampId::Right),
        ]
    }

    pub fn is_on(&self, lamp: LampId) -> bool {
        match lamp {
            LampId::Left => self.left_on,
            LampId::Right => self.right_on,
        }
    }

    /// Retained state for both lamps, published on every (re)connect.
    pub fn snapshot(&self) -> Vec<OutboundMessage> {
        LampId::ALL
            .iter()
            .map(|lamp| self.state_message(*lamp))
            .collect()
    }

    /// Anything other than an exact TOGGLE on a command topic is ignored.
    pub fn handle_command(&mut self, topic: &str, payload: &[u8]) -> Option<OutboundMessage> {
        let lamp = LampId::ALL
            .into_iter()
            .find(|lamp| self.topics.command_topic(*lamp) == topic)?;
        if payload != PAYLOAD_TOGGLE.as_bytes() {
            return None;
        }

        let on = match lamp {
            LampId::Left => &mut self.left_on,
            LampId::Right => &mut self.right_on,
        };
        *on = !*on;
        Some(self.state_message(lamp))
    }

    fn state_message(&self, lamp: LampId) -> OutboundMessage {
        let payload = if self.is_on(lamp) {
            PAYLOAD_ON
        } else {
            PAYLOAD_OFF
        };
        OutboundMessage {
            topic: self.topics.state_topic(lamp).to_string(),
            payload: payload.as_bytes().to_vec(),
            qos: Qos::AtLeastOnce,
            retain: true,
        }
    }
}

/// Slow drift between 20.0 and 22.3 degrees.
pub fn simulated_temperature(tick: u64) -> String {
    let celsius = 20.0 + ((tick % 24) as f32 * 0.1);
    format!("{celsius:.1}")
}

#[cfg(test)]
mod tests {
    use panel_common::{TOPIC_LAMP_LEFT_CMD, TOPIC_LAMP_RIGHT_STATE};
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn toggle_flips_and_reports_retained_state() {
        let mut bank = LampBank::new(TopicConfig::default());

        let first = bank.handle_command(TOPIC_LAMP_LEFT_CMD, b"TOGGLE").unwrap();
        assert_eq!(first.payload, b"ON".to_vec());
        assert!(first.retain);
        assert!(bank.is_on(LampId::Left));
        assert!(!bank.is_on(LampId::Right));

        let second = bank.handle_command(TOPIC_LAMP_LEFT_CMD, b"TOGGLE").unwrap();
        assert_eq!(second.payload, b"OFF".to_vec());
    }

    #[test]
    fn ignores_other_payloads_and_topics() {
        let mut bank = LampBank::new(TopicConfig::default());

        assert_eq!(bank.handle_command(TOPIC_LAMP_LEFT_CMD, b"toggle"), None);
        assert_eq!(bank.handle_command(TOPIC_LAMP_RIGHT_STATE, b"TOGGLE"), None);
        assert!(!bank.is_on(LampId::Left));
    }

    #[test]
    fn snapshot_covers_both_lamps() {
        let bank = LampBank::new(TopicConfig::with_base("home/den"));
        let topics: Vec<_> = bank.snapshot().into_iter().map(|m| m.topic).collect();

        assert_eq!(
            topics,
            vec![
                "home/den/lamp_left/state".to_string(),
                "home/den/lamp_right/state".to_string()
            ]
        );
    }

    #[test]
    fn temperature_fits_the_display_buffer() {
        for tick in 0..48 {
            let text = simulated_temperature(tick);
            assert!(text.len() <= 15, "{text}");
        }
        assert_eq!(simulated_temperature(0), "20.0");
        assert_eq!(simulated_temperature(5), "20.5");
    }
}
