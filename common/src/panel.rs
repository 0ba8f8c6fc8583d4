use chrono::{DateTime, FixedOffset};
use log::{debug, info, warn};
use serde::Serialize;

use crate::{
    clock::{ClockLabel, CLOCK_PLACEHOLDER},
    config::{LampLabels, PanelConfig},
    dispatcher,
    engine::ReconciliationEngine,
    power::{DisplayPower, IdleArm},
    presence::PresencePublisher,
    router::{InboundEvent, TopicRouter},
    surface::{RenderSurface, Transport},
    types::{ConnectivityState, LampId, LastWill, PowerState, RenderCommand},
};

#[derive(Debug, Clone, Serialize)]
pub struct LampView {
    pub id: LampId,
    pub label: String,
    pub on: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PanelView {
    pub connectivity: ConnectivityState,
    pub power: PowerState,
    #[serde(rename = "idleDeadlineMs")]
    pub idle_deadline_ms: u64,
    pub lamps: Vec<LampView>,
    pub temperature: Option<String>,
    #[serde(rename = "temperatureUpdatedMs")]
    pub temperature_updated_ms: Option<u64>,
    pub clock: String,
}

/// The whole panel: believed remote state, display power and the surface it renders to.
///
/// Every entry point mutates state and renders in one call, so wrapping a `Panel` in a
/// single mutex serializes the message, touch, timer and clock paths.
pub struct Panel<S> {
    surface: S,
    router: TopicRouter,
    engine: ReconciliationEngine,
    presence: PresencePublisher,
    power: DisplayPower,
    clock: ClockLabel,
    labels: LampLabels,
    connectivity: ConnectivityState,
}

impl<S: RenderSurface> Panel<S> {
    /// Draws the boot screen (both lamps off, placeholders, backlight on) and starts the
    /// idle countdown.
    pub fn new(config: &PanelConfig, surface: S, now_ms: u64) -> Self {
        let engine = ReconciliationEngine::new(&config.topics, &config.display.temperature_unit);
        let mut panel = Self {
            surface,
            router: TopicRouter::new(&engine),
            engine,
            presence: PresencePublisher::new(&config.topics),
            power: DisplayPower::new(config.display.idle_timeout_ms, now_ms),
            clock: ClockLabel::new(),
            labels: config.labels.clone(),
            connectivity: ConnectivityState::Disconnected,
        };

        for lamp in LampId::ALL {
            panel.surface.set_lamp_label(lamp, panel.labels.label(lamp));
            panel.surface.set_lamp_visual(lamp, panel.engine.believed_on(lamp));
        }
        let placeholder = panel.engine.placeholder_temperature();
        panel.surface.set_temperature_text(&placeholder);
        panel.surface.set_clock_text(CLOCK_PLACEHOLDER);
        if let Err(err) = panel.surface.set_backlight(true) {
            warn!("failed to enable backlight at boot: {err}");
        }

        panel
    }

    pub fn last_will(&self) -> LastWill {
        self.presence.last_will()
    }

    /// Arm to schedule right after construction.
    pub fn initial_arm(&self, now_ms: u64) -> IdleArm {
        self.power.current_arm(now_ms)
    }

    pub fn connectivity(&self) -> ConnectivityState {
        self.connectivity
    }

    pub fn power_state(&self) -> PowerState {
        self.power.state()
    }

    pub fn believed_on(&self, lamp: LampId) -> bool {
        self.engine.believed_on(lamp)
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    /// Subscribes every feed and announces presence. Believed state is kept as is; retained
    /// messages refresh it once they arrive.
    pub fn handle_connected<T: Transport>(&mut self, transport: &mut T) {
        info!("mqtt connected; subscribing and announcing presence");
        self.connectivity = ConnectivityState::Connected;

        let plan = self.presence.on_connected();
        for (topic, qos) in &plan.subscriptions {
            if let Err(err) = transport.subscribe(topic, *qos) {
                warn!("subscribe to {topic} failed: {err}");
            }
        }
        let status_topic = plan.announce.topic.clone();
        if let Err(err) = transport.publish(plan.announce) {
            warn!("presence announce on {status_topic} failed: {err}");
        }
    }

    pub fn handle_disconnected(&mut self) {
        if self.connectivity == ConnectivityState::Connected {
            warn!("mqtt disconnected; keeping last known lamp and temperature state");
        }
        self.connectivity = ConnectivityState::Disconnected;
    }

    /// Payload length is never checked here: routing only reads a bounded prefix.
    pub fn handle_message(&mut self, topic: &str, payload: &[u8], now_ms: u64) {
        let event = self.router.classify(topic, payload);
        if event == InboundEvent::Unknown {
            debug!("ignoring message on unrouted topic {topic}");
            return;
        }
        if let Some(command) = self.engine.apply(&event, now_ms) {
            self.render(vec![command]);
        }
    }

    /// Button press on a lamp tile. Returns the idle arm the caller must (re)schedule.
    pub fn user_activate<T: Transport>(
        &mut self,
        lamp: LampId,
        transport: &mut T,
        now_ms: u64,
    ) -> IdleArm {
        info!("{} lamp activated", lamp.as_str());
        let activation =
            dispatcher::on_user_activate(self.engine.lamp(lamp), &mut self.power, now_ms);
        self.render(activation.commands);

        let topic = activation.message.topic.clone();
        if let Err(err) = transport.publish(activation.message) {
            warn!("toggle command on {topic} failed: {err}");
        }
        activation.arm
    }

    /// Touch anywhere on the screen.
    pub fn touch(&mut self, now_ms: u64) -> IdleArm {
        let (commands, arm) = self.power.reset_activity(now_ms);
        self.render(commands);
        arm
    }

    pub fn idle_timer_fired(&mut self, arm: IdleArm, now_ms: u64) {
        let commands = self.power.timer_fired(arm, now_ms);
        self.render(commands);
    }

    /// Polling alternative to the idle timer.
    pub fn tick(&mut self, now_ms: u64) {
        let commands = self.power.tick(now_ms);
        self.render(commands);
    }

    pub fn refresh_clock(&mut self, now: DateTime<FixedOffset>) {
        if let Some(command) = self.clock.refresh(now) {
            self.render(vec![command]);
        }
    }

    pub fn view(&self) -> PanelView {
        let sensor = self.engine.sensor();
        PanelView {
            connectivity: self.connectivity,
            power: self.power.state(),
            idle_deadline_ms: self.power.deadline_ms(),
            lamps: LampId::ALL
                .iter()
                .map(|lamp| LampView {
                    id: *lamp,
                    label: self.labels.label(*lamp).to_string(),
                    on: self.engine.believed_on(*lamp),
                })
                .collect(),
            temperature: sensor
                .text
                .as_ref()
                .map(|text| self.engine.temperature_label(text.as_str())),
            temperature_updated_ms: sensor.last_update_ms,
            clock: self.clock.text().to_string(),
        }
    }

    fn render(&mut self, commands: Vec<RenderCommand>) {
        for command in commands {
            match command {
                RenderCommand::SetLampVisual { lamp, on } => {
                    self.surface.set_lamp_visual(lamp, on);
                }
                RenderCommand::SetTemperatureText(text) => {
                    self.surface.set_temperature_text(&text);
                }
                RenderCommand::SetClockText(text) => self.surface.set_clock_text(&text),
                RenderCommand::SetBacklight(on) => {
                    // Logical power state stays authoritative even if the driver fails.
                    if let Err(err) = self.surface.set_backlight(on) {
                        warn!("backlight {} failed: {err}", if on { "on" } else { "off" });
                    }
                }
                RenderCommand::RequestRedraw => self.surface.request_redraw(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        config::TopicConfig,
        surface::testing::{RecordingSurface, RecordingTransport, SurfaceCall},
        types::Qos,
    };

    const TIMEOUT: u64 = 120_000;

    fn config() -> PanelConfig {
        let mut config = PanelConfig::default();
        config.topics = TopicConfig {
            left_cmd: "cmd/left".to_string(),
            left_state: "state/left".to_string(),
            right_cmd: "cmd/right".to_string(),
            right_state: "state/right".to_string(),
            temperature: "temp".to_string(),
            status: "status".to_string(),
        };
        config
    }

    fn panel() -> Panel<RecordingSurface> {
        let mut panel = Panel::new(&config(), RecordingSurface::default(), 0);
        panel.surface_mut().take();
        panel
    }

    #[test]
    fn boot_screen_is_drawn_once() {
        let mut panel = Panel::new(&config(), RecordingSurface::default(), 0);
        assert_eq!(
            panel.surface_mut().take(),
            vec![
                SurfaceCall::Label(LampId::Left, "Left lamp".to_string()),
                SurfaceCall::Lamp(LampId::Left, false),
                SurfaceCall::Label(LampId::Right, "Right lamp".to_string()),
                SurfaceCall::Lamp(LampId::Right, false),
                SurfaceCall::Temperature("--.- °C".to_string()),
                SurfaceCall::Clock("--:--".to_string()),
                SurfaceCall::Backlight(true),
            ]
        );
        assert_eq!(panel.initial_arm(0).deadline_ms, TIMEOUT);
    }

    #[test]
    fn inbound_sequence_renders_changes_only() {
        let mut panel = panel();

        panel.handle_message("state/left", b"ON", 10);
        panel.handle_message("state/right", b"OFF", 20);
        panel.handle_message("temp", b"21.4", 30);

        assert_eq!(
            panel.surface_mut().take(),
            vec![
                SurfaceCall::Lamp(LampId::Left, true),
                SurfaceCall::Temperature("21.4 °C".to_string()),
            ]
        );
    }

    #[test]
    fn duplicate_lamp_state_renders_once() {
        let mut panel = panel();
        panel.handle_message("state/right", b"ON", 10);
        panel.handle_message("state/right", b"ON", 20);

        assert_eq!(
            panel.surface_mut().take(),
            vec![SurfaceCall::Lamp(LampId::Right, true)]
        );
    }

    #[test]
    fn unknown_and_empty_messages_are_dropped() {
        let mut panel = panel();
        panel.handle_message("somewhere/else", b"ON", 20);
        panel.handle_message("temp", b"", 30);

        assert!(panel.surface_mut().take().is_empty());
        assert!(!panel.believed_on(LampId::Left));
    }

    #[test]
    fn large_temperature_payload_is_truncated_not_dropped() {
        let mut panel = panel();
        panel.handle_message("temp", &[b'2'; 600], 10);

        assert_eq!(
            panel.surface_mut().take(),
            vec![SurfaceCall::Temperature("222222222222222 °C".to_string())]
        );
    }

    #[test]
    fn large_lamp_payload_uses_its_prefix() {
        let mut panel = panel();
        let mut payload = b"ON".to_vec();
        payload.extend_from_slice(&[b' '; 600]);

        panel.handle_message("state/left", &payload, 10);

        assert!(panel.believed_on(LampId::Left));
        assert_eq!(
            panel.surface_mut().take(),
            vec![SurfaceCall::Lamp(LampId::Left, true)]
        );
    }

    #[test]
    fn long_temperature_is_truncated() {
        let mut panel = panel();
        panel.handle_message("temp", b"21.4000000000000001", 10);

        assert_eq!(
            panel.surface_mut().take(),
            vec![SurfaceCall::Temperature("21.400000000000 °C".to_string())]
        );
    }

    #[test]
    fn activation_publishes_without_touching_believed_state() {
        let mut panel = panel();
        let mut transport = RecordingTransport::default();

        let arm = panel.user_activate(LampId::Left, &mut transport, 5_000);

        assert!(!panel.believed_on(LampId::Left));
        assert!(panel.surface_mut().take().is_empty());
        assert_eq!(arm.deadline_ms, 5_000 + TIMEOUT);
        assert_eq!(transport.published.len(), 1);
        assert_eq!(transport.published[0].topic, "cmd/left");
        assert_eq!(transport.published[0].payload, b"TOGGLE".to_vec());
    }

    #[test]
    fn activation_survives_transport_failure() {
        let mut panel = panel();
        let mut transport = RecordingTransport {
            offline: true,
            ..Default::default()
        };

        let arm = panel.user_activate(LampId::Right, &mut transport, 1_000);

        assert_eq!(arm.deadline_ms, 1_000 + TIMEOUT);
        assert_eq!(panel.power_state(), PowerState::Awake);
    }

    #[test]
    fn reconnect_resubscribes_and_keeps_state() {
        let mut panel = panel();
        let mut transport = RecordingTransport::default();

        panel.handle_connected(&mut transport);
        panel.handle_message("state/left", b"ON", 10);
        panel.handle_disconnected();
        assert_eq!(panel.connectivity(), ConnectivityState::Disconnected);
        panel.handle_connected(&mut transport);

        assert_eq!(panel.connectivity(), ConnectivityState::Connected);
        assert!(panel.believed_on(LampId::Left));
        assert_eq!(transport.subscriptions.len(), 6);
        assert_eq!(
            transport.subscriptions[3..].to_vec(),
            vec![
                ("state/left".to_string(), Qos::AtLeastOnce),
                ("state/right".to_string(), Qos::AtLeastOnce),
                ("temp".to_string(), Qos::AtLeastOnce),
            ]
        );
        let announcements: Vec<_> = transport
            .published
            .iter()
            .filter(|message| message.topic == "status" && message.retain)
            .collect();
        assert_eq!(announcements.len(), 2);

        // Retained echo after reconnect matches; nothing to redraw.
        panel.surface_mut().take();
        panel.handle_message("state/left", b"ON", 20);
        assert!(panel.surface_mut().take().is_empty());
    }

    #[test]
    fn idle_then_touch_wakes_with_single_redraw() {
        let mut panel = panel();
        let arm = panel.initial_arm(0);

        panel.idle_timer_fired(arm, TIMEOUT);
        assert_eq!(panel.power_state(), PowerState::Dimmed);
        assert_eq!(
            panel.surface_mut().take(),
            vec![SurfaceCall::Backlight(false)]
        );

        let _ = panel.touch(TIMEOUT + 1);
        let _ = panel.touch(TIMEOUT + 2);
        assert_eq!(
            panel.surface_mut().take(),
            vec![SurfaceCall::Backlight(true), SurfaceCall::Redraw]
        );
    }

    #[test]
    fn stale_idle_timer_after_touch_is_ignored() {
        let mut panel = panel();
        let first = panel.initial_arm(0);
        let second = panel.touch(60_000);

        panel.idle_timer_fired(first, TIMEOUT);
        assert_eq!(panel.power_state(), PowerState::Awake);

        panel.idle_timer_fired(second, 60_000 + TIMEOUT);
        assert_eq!(panel.power_state(), PowerState::Dimmed);
    }

    #[test]
    fn backlight_failure_keeps_logical_state() {
        let mut panel = panel();
        panel.surface_mut().fail_backlight = true;

        panel.tick(TIMEOUT);

        assert_eq!(panel.power_state(), PowerState::Dimmed);
        assert!(panel.surface_mut().take().is_empty());
    }

    #[test]
    fn clock_refresh_waits_for_sync() {
        let mut panel = panel();
        let utc = FixedOffset::east_opt(0).unwrap();

        panel.refresh_clock(utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 10).unwrap());
        panel.refresh_clock(utc.with_ymd_and_hms(2025, 1, 1, 9, 41, 0).unwrap());

        assert_eq!(
            panel.surface_mut().take(),
            vec![SurfaceCall::Clock("09:41".to_string())]
        );
        assert_eq!(panel.view().clock, "09:41");
    }

    #[test]
    fn view_reflects_believed_state() {
        let mut panel = panel();
        panel.handle_message("state/right", b"ON", 10);
        panel.handle_message("temp", b"18.9", 42);

        let view = panel.view();
        assert_eq!(view.connectivity, ConnectivityState::Disconnected);
        assert!(!view.lamps[0].on);
        assert!(view.lamps[1].on);
        assert_eq!(view.temperature.as_deref(), Some("18.9 °C"));
        assert_eq!(view.temperature_updated_ms, Some(42));
    }
}
