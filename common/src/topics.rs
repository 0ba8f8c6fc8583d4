pub const DEFAULT_TOPIC_BASE: &str = "home/roo1panel";

pub const TOPIC_LAMP_LEFT_CMD: &str = "home/roo1panel/lamp_left/cmd";
pub const TOPIC_LAMP_LEFT_STATE: &str = "home/roo1panel/lamp_left/state";
pub const TOPIC_LAMP_RIGHT_CMD: &str = "home/roo1panel/lamp_right/cmd";
pub const TOPIC_LAMP_RIGHT_STATE: &str = "home/roo1panel/lamp_right/state";
pub const TOPIC_TEMPERATURE: &str = "home/roo1panel/temperature";
pub const TOPIC_STATUS: &str = "home/roo1panel/status";

pub const PAYLOAD_TOGGLE: &str = "TOGGLE";
pub const PAYLOAD_ON: &str = "ON";
pub const PAYLOAD_OFF: &str = "OFF";
pub const PAYLOAD_ONLINE: &str = "online";
pub const PAYLOAD_OFFLINE: &str = "offline";
