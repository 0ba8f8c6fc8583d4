use serde::{Deserialize, Serialize};

use crate::{
    error::PanelError,
    topics::{
        DEFAULT_TOPIC_BASE, TOPIC_LAMP_LEFT_CMD, TOPIC_LAMP_LEFT_STATE, TOPIC_LAMP_RIGHT_CMD,
        TOPIC_LAMP_RIGHT_STATE, TOPIC_STATUS, TOPIC_TEMPERATURE,
    },
    types::LampId,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub client_id: String,
    pub keep_alive_s: u64,
    pub network_timeout_ms: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "192.168.1.100".to_string(),
            port: 1883,
            user: String::new(),
            pass: String::new(),
            client_id: "room-panel".to_string(),
            keep_alive_s: 30,
            network_timeout_ms: 4_000,
        }
    }
}

impl MqttConfig {
    pub fn broker_uri(&self) -> String {
        format!("mqtt://{}:{}", self.host, self.port)
    }

    /// Credentials are only sent when a user name is configured.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        if self.user.is_empty() {
            None
        } else {
            Some((self.user.as_str(), self.pass.as_str()))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TopicConfig {
    pub left_cmd: String,
    pub left_state: String,
    pub right_cmd: String,
    pub right_state: String,
    pub temperature: String,
    pub status: String,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            left_cmd: TOPIC_LAMP_LEFT_CMD.to_string(),
            left_state: TOPIC_LAMP_LEFT_STATE.to_string(),
            right_cmd: TOPIC_LAMP_RIGHT_CMD.to_string(),
            right_state: TOPIC_LAMP_RIGHT_STATE.to_string(),
            temperature: TOPIC_TEMPERATURE.to_string(),
            status: TOPIC_STATUS.to_string(),
        }
    }
}

impl TopicConfig {
    pub fn with_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            left_cmd: format!("{base}/lamp_left/cmd"),
            left_state: format!("{base}/lamp_left/state"),
            right_cmd: format!("{base}/lamp_right/cmd"),
            right_state: format!("{base}/lamp_right/state"),
            temperature: format!("{base}/temperature"),
            status: format!("{base}/status"),
        }
    }

    pub fn command_topic(&self, lamp: LampId) -> &str {
        match lamp {
            LampId::Left => &self.left_cmd,
            LampId::Right => &self.right_cmd,
        }
    }

    pub fn state_topic(&self, lamp: LampId) -> &str {
        match lamp {
            LampId::Left => &self.left_state,
            LampId::Right => &self.right_state,
        }
    }

    pub fn sanitize(&mut self) {
        let defaults = Self::with_base(DEFAULT_TOPIC_BASE);
        for (value, fallback) in [
            (&mut self.left_cmd, defaults.left_cmd),
            (&mut self.left_state, defaults.left_state),
            (&mut self.right_cmd, defaults.right_cmd),
            (&mut self.right_state, defaults.right_state),
            (&mut self.temperature, defaults.temperature),
            (&mut self.status, defaults.status),
        ] {
            if value.trim().is_empty() {
                *value = fallback;
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LampLabels {
    pub left: String,
    pub right: String,
}

impl Default for LampLabels {
    fn default() -> Self {
        Self {
            left: "Left lamp".to_string(),
            right: "Right lamp".to_string(),
        }
    }
}

impl LampLabels {
    pub fn label(&self, lamp: LampId) -> &str {
        match lamp {
            LampId::Left => &self.left,
            LampId::Right => &self.right,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DisplayConfig {
    pub idle_timeout_ms: u64,
    pub clock_refresh_ms: u64,
    pub timezone: String,
    pub temperature_unit: String,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: 120_000,
            clock_refresh_ms: 10_000,
            timezone: "Europe/Paris".to_string(),
            temperature_unit: "°C".to_string(),
        }
    }
}

impl DisplayConfig {
    pub fn sanitize(&mut self) {
        self.idle_timeout_ms = self.idle_timeout_ms.clamp(10_000, 3_600_000);
        self.clock_refresh_ms = self.clock_refresh_ms.clamp(1_000, 60_000);
        if self.timezone.trim().is_empty() {
            self.timezone = Self::default().timezone;
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
    pub use_static_ip: bool,
    pub static_ip: Option<[u8; 4]>,
    pub gateway: Option<[u8; 4]>,
    pub subnet: Option<[u8; 4]>,
    pub dns1: Option<[u8; 4]>,
    pub dns2: Option<[u8; 4]>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PanelConfig {
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub topics: TopicConfig,
    #[serde(default)]
    pub labels: LampLabels,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub network: NetworkConfig,
}

impl PanelConfig {
    pub fn from_json(raw: &[u8]) -> Result<Self, PanelError> {
        serde_json::from_slice(raw).map_err(|err| PanelError::Config(err.to_string()))
    }

    pub fn sanitize(&mut self) {
        self.topics.sanitize();
        self.display.sanitize();
        if self.mqtt.client_id.trim().is_empty() {
            self.mqtt.client_id = MqttConfig::default().client_id;
        }
    }

    pub fn validate(&self) -> Result<(), PanelError> {
        if self.mqtt.host.trim().is_empty() {
            return Err(PanelError::Config("mqtt host is empty".to_string()));
        }
        if self.mqtt.port == 0 {
            return Err(PanelError::Config("mqtt port must be non-zero".to_string()));
        }

        let topics = &self.topics;
        let subscribed = [&topics.left_state, &topics.right_state, &topics.temperature];
        for (index, topic) in subscribed.iter().enumerate() {
            if subscribed[index + 1..].contains(topic) {
                return Err(PanelError::Config(format!(
                    "topic `{topic}` is subscribed for more than one role"
                )));
            }
        }

        for lamp in LampId::ALL {
            let command = topics.command_topic(lamp);
            if subscribed.iter().any(|topic| topic.as_str() == command) {
                return Err(PanelError::Config(format!(
                    "{} command topic `{command}` is also a subscribed topic",
                    lamp.as_str()
                )));
            }
        }

        if self.network.use_static_ip
            && (self.network.static_ip.is_none()
                || self.network.gateway.is_none()
                || self.network.subnet.is_none())
        {
            return Err(PanelError::Config(
                "static ip, gateway and subnet are required when useStaticIp is set".to_string(),
            ));
        }

        Ok(())
    }
}
