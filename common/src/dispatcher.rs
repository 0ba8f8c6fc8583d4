use crate::{
    engine::LampEntity,
    power::{DisplayPower, IdleArm},
    topics::PAYLOAD_TOGGLE,
    types::{OutboundMessage, Qos, RenderCommand},
};

/// Outcome of a button activation: wake/redraw commands, the rearmed idle timer and the
/// toggle request to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activation {
    pub commands: Vec<RenderCommand>,
    pub arm: IdleArm,
    pub message: OutboundMessage,
}

/// Counts as display activity and requests a toggle. Believed lamp state is left alone;
/// the visible change waits for the device to echo its new state.
pub fn on_user_activate(lamp: &LampEntity, power: &mut DisplayPower, now_ms: u64) -> Activation {
    let (commands, arm) = power.reset_activity(now_ms);
    Activation {
        commands,
        arm,
        message: toggle_command(lamp),
    }
}

pub fn toggle_command(lamp: &LampEntity) -> OutboundMessage {
    OutboundMessage {
        topic: lamp.command_topic.clone(),
        payload: PAYLOAD_TOGGLE.as_bytes().to_vec(),
        qos: Qos::AtLeastOnce,
        retain: false,
    }
}
