use crate::{
    error::PanelError,
    types::{LampId, OutboundMessage, Qos},
};

/// Display side of the panel. Callers hold the panel lock for the whole batch of calls.
pub trait RenderSurface {
    fn set_lamp_label(&mut self, lamp: LampId, label: &str);
    fn set_lamp_visual(&mut self, lamp: LampId, on: bool);
    fn set_temperature_text(&mut self, text: &str);
    fn set_clock_text(&mut self, text: &str);
    fn set_backlight(&mut self, on: bool) -> Result<(), PanelError>;
    fn request_redraw(&mut self);
}

/// Non-blocking MQTT client handle. Delivery guarantees belong to the implementation.
pub trait Transport {
    fn subscribe(&mut self, topic: &str, qos: Qos) -> Result<(), PanelError>;
    fn publish(&mut self, message: OutboundMessage) -> Result<(), PanelError>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum SurfaceCall {
        Label(LampId, String),
        Lamp(LampId, bool),
        Temperature(String),
        Clock(String),
        Backlight(bool),
        Redraw,
    }

    #[derive(Debug, Default)]
    pub struct RecordingSurface {
        pub calls: Vec<SurfaceCall>,
        pub fail_backlight: bool,
    }

    impl RecordingSurface {
        pub fn take(&mut self) -> Vec<SurfaceCall> {
            std::mem::take(&mut self.calls)
        }
    }

    impl RenderSurface for RecordingSurface {
        fn set_lamp_label(&mut self, lamp: LampId, label: &str) {
            self.calls.push(SurfaceCall::Label(lamp, label.to_string()));
        }

        fn set_lamp_visual(&mut self, lamp: LampId, on: bool) {
            self.calls.push(SurfaceCall::Lamp(lamp, on));
        }

        fn set_temperature_text(&mut self, text: &str) {
            self.calls.push(SurfaceCall::Temperature(text.to_string()));
        }

        fn set_clock_text(&mut self, text: &str) {
            self.calls.push(SurfaceCall::Clock(text.to_string()));
        }

        fn set_backlight(&mut self, on: bool) -> Result<(), PanelError> {
            if self.fail_backlight {
                return Err(PanelError::Backlight("pwm channel unavailable".to_string()));
            }
            self.calls.push(SurfaceCall::Backlight(on));
            Ok(())
        }

        fn request_redraw(&mut self) {
            self.calls.push(SurfaceCall::Redraw);
        }
    }

    #[derive(Debug, Default)]
    pub struct RecordingTransport {
        pub subscriptions: Vec<(String, Qos)>,
        pub published: Vec<OutboundMessage>,
        pub offline: bool,
    }

    impl Transport for RecordingTransport {
        fn subscribe(&mut self, topic: &str, qos: Qos) -> Result<(), PanelError> {
            if self.offline {
                return Err(PanelError::Transport("request queue closed".to_string()));
            }
            self.subscriptions.push((topic.to_string(), qos));
            Ok(())
        }

        fn publish(&mut self, message: OutboundMessage) -> Result<(), PanelError> {
            if self.offline {
                return Err(PanelError::Transport("request queue closed".to_string()));
            }
            self.published.push(message);
            Ok(())
        }
    }
}
