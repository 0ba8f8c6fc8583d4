use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LampId {
    Left,
    Right,
}

impl LampId {
    pub const ALL: [LampId; 2] = [LampId::Left, LampId::Right];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        if value.eq_ignore_ascii_case("left") {
            Some(Self::Left)
        } else if value.eq_ignore_ascii_case("right") {
            Some(Self::Right)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectivityState {
    #[default]
    Disconnected,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PowerState {
    Awake,
    Dimmed,
}

/// Delivery guarantee requested from the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qos {
    AtMostOnce,
    AtLeastOnce,
}

#[cfg(feature = "rumqttc")]
impl From<Qos> for rumqttc::QoS {
    fn from(qos: Qos) -> Self {
        match qos {
            Qos::AtMostOnce => rumqttc::QoS::AtMostOnce,
            Qos::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        }
    }
}

#[cfg(feature = "embedded-svc")]
impl From<Qos> for embedded_svc::mqtt::client::QoS {
    fn from(qos: Qos) -> Self {
        match qos {
            Qos::AtMostOnce => embedded_svc::mqtt::client::QoS::AtMostOnce,
            Qos::AtLeastOnce => embedded_svc::mqtt::client::QoS::AtLeastOnce,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: Qos,
    pub retain: bool,
}

/// Message the broker publishes on our behalf after an unclean disconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: Qos,
    pub retain: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderCommand {
    SetLampVisual { lamp: LampId, on: bool },
    SetTemperatureText(String),
    SetClockText(String),
    SetBacklight(bool),
    RequestRedraw,
}

/// Size of the temperature display buffer, terminator slot included.
pub const SENSOR_TEXT_CAPACITY: usize = 16;

/// Bounded, NUL-free sensor text holding at most `SENSOR_TEXT_CAPACITY - 1` bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorText(String);

impl SensorText {
    pub const MAX_LEN: usize = SENSOR_TEXT_CAPACITY - 1;

    /// Returns `None` for empty or non UTF-8 payloads.
    pub fn from_payload(payload: &[u8]) -> Option<Self> {
        let end = payload
            .iter()
            .position(|byte| *byte == 0)
            .unwrap_or(payload.len());
        let bounded = &payload[..end.min(Self::MAX_LEN)];

        let text = match std::str::from_utf8(bounded) {
            Ok(text) => text,
            // A multi-byte character split by the cut; keep the complete prefix.
            Err(err) if err.error_len().is_none() => {
                std::str::from_utf8(&bounded[..err.valid_up_to()]).ok()?
            }
            Err(_) => return None,
        };

        if text.is_empty() {
            return None;
        }
        Some(Self(text.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
