use std::{
    io::ErrorKind,
    net::SocketAddr,
    path::PathBuf,
    sync::{Arc, OnceLock},
    time::{Duration, Instant},
};

use anyhow::Context;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{Offset, Utc};
use chrono_tz::Tz;
use rumqttc::{AsyncClient, Event, Incoming, LastWill, MqttOptions, QoS};
use serde::Serialize;
use tokio::{net::TcpListener, sync::Mutex, task::AbortHandle};
use tower_http::services::ServeDir;
use tracing::{info, warn};

use panel_common::{
    IdleArm, LampId, OutboundMessage, Panel, PanelConfig, PanelError, PowerState, Qos,
    RenderSurface, Transport,
};

type SharedPanel = Arc<Mutex<Panel<HostSurface>>>;

#[derive(Clone)]
struct AppState {
    panel: SharedPanel,
    mqtt: MqttTransport,
    idle: IdleTimer,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// What is currently drawn, as opposed to what the panel believes.
#[derive(Debug, Clone, Serialize)]
struct ScreenSnapshot {
    #[serde(rename = "leftLabel")]
    left_label: String,
    #[serde(rename = "rightLabel")]
    right_label: String,
    #[serde(rename = "leftOn")]
    left_on: bool,
    #[serde(rename = "rightOn")]
    right_on: bool,
    temperature: String,
    clock: String,
    backlight: bool,
    redraws: u64,
}

/// Headless render surface: logs every widget update and optionally drives a sysfs
/// backlight switch.
struct HostSurface {
    screen: ScreenSnapshot,
    backlight_path: Option<PathBuf>,
}

impl HostSurface {
    fn new(backlight_path: Option<PathBuf>) -> Self {
        Self {
            screen: ScreenSnapshot {
                left_label: String::new(),
                right_label: String::new(),
                left_on: false,
                right_on: false,
                temperature: String::new(),
                clock: String::new(),
                backlight: false,
                redraws: 0,
            },
            backlight_path,
        }
    }
}

impl RenderSurface for HostSurface {
    fn set_lamp_label(&mut self, lamp: LampId, label: &str) {
        match lamp {
            LampId::Left => self.screen.left_label = label.to_string(),
            LampId::Right => self.screen.right_label = label.to_string(),
        }
    }

    fn set_lamp_visual(&mut self, lamp: LampId, on: bool) {
        info!(
            "render: {} lamp tile -> {}",
            lamp.as_str(),
            if on { "on style" } else { "off style" }
        );
        match lamp {
            LampId::Left => self.screen.left_on = on,
            LampId::Right => self.screen.right_on = on,
        }
    }

    fn set_temperature_text(&mut self, text: &str) {
        info!("render: temperature badge -> {text}");
        self.screen.temperature = text.to_string();
    }

    fn set_clock_text(&mut self, text: &str) {
        self.screen.clock = text.to_string();
    }

    fn set_backlight(&mut self, on: bool) -> Result<(), PanelError> {
        info!("render: backlight -> {}", if on { "on" } else { "off" });
        if let Some(path) = &self.backlight_path {
            std::fs::write(path, if on { "1" } else { "0" }).map_err(|err| {
                PanelError::Backlight(format!("write {} failed: {err}", path.display()))
            })?;
        }
        self.screen.backlight = on;
        Ok(())
    }

    fn request_redraw(&mut self) {
        self.screen.redraws = self.screen.redraws.saturating_add(1);
    }
}

#[derive(Clone)]
struct MqttTransport {
    client: AsyncClient,
}

impl Transport for MqttTransport {
    fn subscribe(&mut self, topic: &str, qos: Qos) -> Result<(), PanelError> {
        self.client
            .try_subscribe(topic, QoS::from(qos))
            .map_err(|err| PanelError::Transport(err.to_string()))
    }

    fn publish(&mut self, message: OutboundMessage) -> Result<(), PanelError> {
        self.client
            .try_publish(
                message.topic,
                QoS::from(message.qos),
                message.retain,
                message.payload,
            )
            .map_err(|err| PanelError::Transport(err.to_string()))
    }
}

/// Single-shot idle timer. Rescheduling aborts the pending firing; an older arm never
/// replaces a newer one.
#[derive(Clone)]
struct IdleTimer {
    panel: SharedPanel,
    pending: Arc<std::sync::Mutex<Option<(u64, AbortHandle)>>>,
}

impl IdleTimer {
    fn new(panel: SharedPanel) -> Self {
        Self {
            panel,
            pending: Arc::new(std::sync::Mutex::new(None)),
        }
    }

    fn reschedule(&self, arm: IdleArm) {
        let mut pending = self
            .pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if let Some((generation, _)) = pending.as_ref() {
            if *generation > arm.generation {
                return;
            }
        }

        let panel = self.panel.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(arm.delay_ms)).await;
            let mut panel = panel.lock().await;
            panel.idle_timer_fired(arm, monotonic_ms());
        });

        if let Some((_, previous)) = pending.replace((arm.generation, task.abort_handle())) {
            previous.abort();
        }
    }
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = ConfigStore::new();
    let mut config = store.load().await.unwrap_or_else(|err| {
        warn!("failed to load panel config from store: {err:#}");
        PanelConfig::default()
    });
    apply_env_overrides(&mut config);
    config.sanitize();
    config.validate().context("invalid panel configuration")?;

    if config.display.timezone.parse::<Tz>().is_err() {
        warn!(
            "unknown timezone `{}`; clock will stay at its placeholder",
            config.display.timezone
        );
    }

    let backlight_path = std::env::var("PANEL_BACKLIGHT_PATH").ok().map(PathBuf::from);
    let now_ms = monotonic_ms();
    let panel = Panel::new(&config, HostSurface::new(backlight_path), now_ms);
    let initial_arm = panel.initial_arm(now_ms);
    let will = panel.last_will();

    let mut mqtt_options = MqttOptions::new(
        config.mqtt.client_id.clone(),
        config.mqtt.host.clone(),
        config.mqtt.port,
    );
    mqtt_options.set_keep_alive(Duration::from_secs(config.mqtt.keep_alive_s.max(5)));
    if let Some((user, pass)) = config.mqtt.credentials() {
        mqtt_options.set_credentials(user, pass);
    }
    mqtt_options.set_last_will(LastWill::new(
        will.topic,
        will.payload,
        QoS::from(will.qos),
        will.retain,
    ));
    info!("mqtt broker {}", config.mqtt.broker_uri());

    let (client, eventloop) = AsyncClient::new(mqtt_options, 64);

    let panel = Arc::new(Mutex::new(panel));
    let idle = IdleTimer::new(panel.clone());
    idle.reschedule(initial_arm);

    let app_state = AppState {
        panel,
        mqtt: MqttTransport { client },
        idle,
    };

    spawn_mqtt_loop(app_state.clone(), eventloop);
    spawn_clock_loop(
        app_state.clone(),
        config.display.timezone.clone(),
        config.display.clock_refresh_ms,
    );

    let web_root = format!("{}/web", env!("CARGO_MANIFEST_DIR"));
    let app = Router::new()
        .route("/api/panel", get(handle_get_panel))
        .route("/api/screen", get(handle_get_screen))
        .route("/api/lamp/{lamp}", post(handle_lamp_activate))
        .route("/api/touch", post(handle_touch))
        .fallback_service(ServeDir::new(web_root))
        .with_state(app_state);

    let port = std::env::var("PANEL_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind panel server at {addr}"))?;

    info!("panel listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

fn spawn_mqtt_loop(app_state: AppState, mut eventloop: rumqttc::EventLoop) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    let now_ms = monotonic_ms();
                    let mut panel = app_state.panel.lock().await;
                    panel.handle_message(&message.topic, &message.payload, now_ms);
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    let mut transport = app_state.mqtt.clone();
                    let mut panel = app_state.panel.lock().await;
                    panel.handle_connected(&mut transport);
                }
                Ok(Event::Incoming(Incoming::Disconnect)) => {
                    app_state.panel.lock().await.handle_disconnected();
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    app_state.panel.lock().await.handle_disconnected();
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

fn spawn_clock_loop(app_state: AppState, timezone: String, period_ms: u64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(period_ms));
        loop {
            interval.tick().await;
            let Some(now) = now_in_timezone(&timezone) else {
                continue;
            };
            app_state.panel.lock().await.refresh_clock(now);
        }
    });
}

async fn handle_get_panel(State(state): State<AppState>) -> impl IntoResponse {
    let view = state.panel.lock().await.view();
    Json(view)
}

async fn handle_get_screen(State(state): State<AppState>) -> impl IntoResponse {
    let screen = state.panel.lock().await.surface().screen.clone();
    Json(screen)
}

async fn handle_lamp_activate(
    State(state): State<AppState>,
    Path(lamp): Path<String>,
) -> axum::response::Response {
    let Some(lamp) = LampId::parse(&lamp) else {
        return error_response(StatusCode::BAD_REQUEST, "Unknown lamp. Use 'left' or 'right'");
    };

    let mut transport = state.mqtt.clone();
    let (arm, view) = {
        let mut panel = state.panel.lock().await;
        let arm = panel.user_activate(lamp, &mut transport, monotonic_ms());
        (arm, panel.view())
    };
    state.idle.reschedule(arm);

    (StatusCode::ACCEPTED, Json(view)).into_response()
}

async fn handle_touch(State(state): State<AppState>) -> impl IntoResponse {
    let (arm, power) = {
        let mut panel = state.panel.lock().await;
        let arm = panel.touch(monotonic_ms());
        (arm, panel.power_state())
    };
    state.idle.reschedule(arm);

    #[derive(Serialize)]
    struct TouchResponse {
        power: PowerState,
        #[serde(rename = "idleDeadlineMs")]
        idle_deadline_ms: u64,
    }

    Json(TouchResponse {
        power,
        idle_deadline_ms: arm.deadline_ms,
    })
}

struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    fn new() -> Self {
        let data_dir = std::env::var("PANEL_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.panel"));

        Self {
            path: data_dir.join("panel.json"),
        }
    }

    async fn load(&self) -> anyhow::Result<PanelConfig> {
        match tokio::fs::read(&self.path).await {
            Ok(raw) => PanelConfig::from_json(&raw)
                .with_context(|| format!("failed to parse {}", self.path.display())),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(PanelConfig::default()),
            Err(err) => Err(err.into()),
        }
    }
}

fn apply_env_overrides(config: &mut PanelConfig) {
    if let Ok(host) = std::env::var("MQTT_HOST") {
        config.mqtt.host = host;
    }
    if let Some(port) = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
    {
        config.mqtt.port = port;
    }
    if let Ok(user) = std::env::var("MQTT_USER") {
        config.mqtt.user = user;
    }
    if let Ok(pass) = std::env::var("MQTT_PASS") {
        config.mqtt.pass = pass;
    }
}

fn now_in_timezone(timezone: &str) -> Option<chrono::DateTime<chrono::FixedOffset>> {
    let tz: Tz = timezone.parse().ok()?;
    let local = Utc::now().with_timezone(&tz);
    Some(local.with_timezone(&local.offset().fix()))
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qos_maps_onto_rumqttc_levels() {
        assert_eq!(QoS::from(Qos::AtLeastOnce), QoS::AtLeastOnce);
        assert_eq!(QoS::from(Qos::AtMostOnce), QoS::AtMostOnce);
    }

    #[test]
    fn host_surface_tracks_rendered_screen() {
        let mut surface = HostSurface::new(None);
        surface.set_lamp_label(LampId::Left, "Reading");
        surface.set_lamp_visual(LampId::Right, true);
        surface.set_temperature_text("20.5 °C");
        surface.set_backlight(true).unwrap();
        surface.request_redraw();

        assert_eq!(surface.screen.left_label, "Reading");
        assert!(surface.screen.right_on);
        assert!(!surface.screen.left_on);
        assert_eq!(surface.screen.temperature, "20.5 °C");
        assert!(surface.screen.backlight);
        assert_eq!(surface.screen.redraws, 1);
    }

    #[test]
    fn backlight_write_failure_is_reported() {
        let mut surface =
            HostSurface::new(Some(PathBuf::from("/nonexistent-panel-dir/backlight")));
        let result = surface.set_backlight(false);

        assert!(matches!(result, Err(PanelError::Backlight(_))));
        assert!(!surface.screen.backlight);
    }

    #[test]
    fn unknown_timezone_yields_no_time() {
        assert!(now_in_timezone("Mars/Olympus_Mons").is_none());
        assert!(now_in_timezone("Europe/Paris").is_some());
    }

    #[tokio::test]
    async fn idle_timer_ignores_older_arm() {
        let panel = Panel::new(&PanelConfig::default(), HostSurface::new(None), 0);
        let shared = Arc::new(Mutex::new(panel));
        let idle = IdleTimer::new(shared);

        let newer = IdleArm {
            generation: 3,
            deadline_ms: 60_000,
            delay_ms: 60_000,
        };
        let older = IdleArm {
            generation: 2,
            deadline_ms: 30_000,
            delay_ms: 30_000,
        };
        idle.reschedule(newer);
        idle.reschedule(older);

        let pending = idle.pending.lock().unwrap();
        assert_eq!(pending.as_ref().map(|(generation, _)| *generation), Some(3));
    }
}
