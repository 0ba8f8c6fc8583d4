use crate::{
    config::TopicConfig,
    topics::{PAYLOAD_OFFLINE, PAYLOAD_ONLINE},
    types::{LastWill, OutboundMessage, Qos},
};

/// Work to perform on every transition to connected, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectPlan {
    pub subscriptions: Vec<(String, Qos)>,
    pub announce: OutboundMessage,
}

#[derive(Debug, Clone)]
pub struct PresencePublisher {
    status_topic: String,
    subscriptions: Vec<String>,
}

impl PresencePublisher {
    pub fn new(topics: &TopicConfig) -> Self {
        Self {
            status_topic: topics.status.clone(),
            subscriptions: vec![
                topics.left_state.clone(),
                topics.right_state.clone(),
                topics.temperature.clone(),
            ],
        }
    }

    /// Registered with the transport once, before the first connect.
    pub fn last_will(&self) -> LastWill {
        LastWill {
            topic: self.status_topic.clone(),
            payload: PAYLOAD_OFFLINE.as_bytes().to_vec(),
            qos: Qos::AtLeastOnce,
            retain: true,
        }
    }

    pub fn on_connected(&self) -> ConnectPlan {
        ConnectPlan {
            subscriptions: self
                .subscriptions
                .iter()
                .map(|topic| (topic.clone(), Qos::AtLeastOnce))
                .collect(),
            announce: OutboundMessage {
                topic: self.status_topic.clone(),
                payload: PAYLOAD_ONLINE.as_bytes().to_vec(),
                qos: Qos::AtLeastOnce,
                retain: true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn last_will_is_retained_offline() {
        let presence = PresencePublisher::new(&TopicConfig::default());
        assert_eq!(
            presence.last_will(),
            LastWill {
                topic: "home/roo1panel/status".to_string(),
                payload: b"offline".to_vec(),
                qos: Qos::AtLeastOnce,
                retain: true,
            }
        );
    }

    #[test]
    fn connect_plan_subscribes_all_feeds_then_announces() {
        let presence = PresencePublisher::new(&TopicConfig::with_base("den"));
        let plan = presence.on_connected();

        assert_eq!(
            plan.subscriptions,
            vec![
                ("den/lamp_left/state".to_string(), Qos::AtLeastOnce),
                ("den/lamp_right/state".to_string(), Qos::AtLeastOnce),
                ("den/temperature".to_string(), Qos::AtLeastOnce),
            ]
        );
        assert_eq!(plan.announce.topic, "den/status");
        assert_eq!(plan.announce.payload, b"online".to_vec());
        assert!(plan.announce.retain);
    }
}
