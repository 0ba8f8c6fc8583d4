use core::convert::TryInto;
use std::{
    net::Ipv4Addr,
    sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError},
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use chrono::{Offset, Utc};
use chrono_tz::Tz;
use embedded_svc::{
    mqtt::client::{Details, EventPayload, QoS},
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::gpio::{AnyIOPin, Input, Output, PinDriver, Pull};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{gpio::AnyOutputPin, modem::Modem, prelude::Peripherals},
    ipv4::{
        ClientConfiguration as IpClientConfiguration, ClientSettings as IpClientSettings,
        Configuration as IpConfiguration, Mask, Subnet,
    },
    log::EspLogger,
    mqtt::client::{EspMqttClient, EspMqttConnection, LwtConfiguration, MqttClientConfiguration},
    netif::{EspNetif, NetifConfiguration},
    nvs::{EspDefaultNvsPartition, EspNvs},
    sntp::EspSntp,
    timer::{EspTaskTimerService, EspTimer},
    wifi::{BlockingWifi, EspWifi},
};
use log::{debug, info, warn};

use panel_common::{
    IdleArm, LampId, NetworkConfig, OutboundMessage, Panel, PanelConfig, PanelError, Qos,
    RenderSurface, Transport,
};

const NVS_NAMESPACE: &str = "panel";
const NVS_CONFIG_KEY: &str = "config_json";
const WIFI_CONNECT_ATTEMPTS: u32 = 5;
const WIFI_RETRY_DELAY_MS: u64 = 3_000;
const BACKLIGHT_PIN: i32 = 45;
const BUTTON_LEFT_PIN: i32 = 4;
const BUTTON_RIGHT_PIN: i32 = 5;
const TOUCH_INT_PIN: i32 = 6;
const INPUT_POLL_MS: u64 = 20;

type SharedPanel = Arc<Mutex<Panel<EspSurface>>>;

/// Widget updates go to the display task through the log; the backlight is a plain GPIO.
struct EspSurface {
    backlight: Option<PinDriver<'static, AnyOutputPin, Output>>,
}

impl RenderSurface for EspSurface {
    fn set_lamp_label(&mut self, lamp: LampId, label: &str) {
        debug!("lv: {} label `{label}`", lamp.as_str());
    }

    fn set_lamp_visual(&mut self, lamp: LampId, on: bool) {
        info!("lv: {} lamp {}", lamp.as_str(), if on { "on" } else { "off" });
    }

    fn set_temperature_text(&mut self, text: &str) {
        info!("lv: temperature `{text}`");
    }

    fn set_clock_text(&mut self, text: &str) {
        debug!("lv: clock `{text}`");
    }

    fn set_backlight(&mut self, on: bool) -> Result<(), PanelError> {
        let Some(pin) = self.backlight.as_mut() else {
            return Err(PanelError::Backlight("backlight pin unavailable".to_string()));
        };
        let result = if on { pin.set_high() } else { pin.set_low() };
        result.map_err(|err| PanelError::Backlight(err.to_string()))
    }

    fn request_redraw(&mut self) {
        debug!("lv: invalidate screen");
    }
}

#[derive(Clone)]
struct EspTransport {
    client: Arc<Mutex<EspMqttClient<'static>>>,
}

impl Transport for EspTransport {
    fn subscribe(&mut self, topic: &str, qos: Qos) -> Result<(), PanelError> {
        lock(&self.client)
            .subscribe(topic, QoS::from(qos))
            .map(|_| ())
            .map_err(|err| PanelError::Transport(format!("{err:?}")))
    }

    fn publish(&mut self, message: OutboundMessage) -> Result<(), PanelError> {
        lock(&self.client)
            .enqueue(
                &message.topic,
                QoS::from(message.qos),
                message.retain,
                &message.payload,
            )
            .map(|_| ())
            .map_err(|err| PanelError::Transport(format!("{err:?}")))
    }
}

/// One-shot idle timer; `pending` holds the arm the timer will deliver.
#[derive(Clone)]
struct IdleTimer {
    timer: Arc<Mutex<EspTimer<'static>>>,
    pending: Arc<Mutex<Option<IdleArm>>>,
}

impl IdleTimer {
    fn new(service: &EspTaskTimerService, panel: SharedPanel) -> anyhow::Result<Self> {
        let pending: Arc<Mutex<Option<IdleArm>>> = Arc::new(Mutex::new(None));
        let fired = pending.clone();
        let timer = service.timer(move || {
            let Some(arm) = lock(&fired).take() else {
                return;
            };
            lock(&panel).idle_timer_fired(arm, monotonic_ms());
        })
        .map_err(|err| PanelError::Timer(format!("{err:?}")))?;

        Ok(Self {
            timer: Arc::new(Mutex::new(timer)),
            pending,
        })
    }

    fn reschedule(&self, arm: IdleArm) {
        let mut pending = lock(&self.pending);
        if let Some(current) = *pending {
            if current.generation > arm.generation {
                return;
            }
        }

        let timer = lock(&self.timer);
        let rearmed = timer
            .cancel()
            .and_then(|_| {
                *pending = Some(arm);
                timer.after(Duration::from_millis(arm.delay_ms))
            })
            .map_err(|err| PanelError::Timer(format!("{err:?}")));
        if let Err(err) = rearmed {
            warn!("{err}; display stays in its current power state");
        }
    }
}

#[derive(Clone)]
struct NvsStore {
    partition: EspDefaultNvsPartition,
    lock: Arc<Mutex<()>>,
}

impl NvsStore {
    fn load_config(&self) -> anyhow::Result<PanelConfig> {
        let _guard = lock(&self.lock);
        let nvs = EspNvs::new(self.partition.clone(), NVS_NAMESPACE, true)?;
        let mut buffer = vec![0_u8; 4096];

        match nvs.get_str(NVS_CONFIG_KEY, &mut buffer)? {
            Some(value) => Ok(PanelConfig::from_json(value.as_bytes())?),
            None => Ok(PanelConfig::default()),
        }
    }
}

struct Button {
    lamp: Option<LampId>,
    pin: PinDriver<'static, AnyIOPin, Input>,
    was_pressed: bool,
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let nvs_store = NvsStore {
        partition: nvs_partition.clone(),
        lock: Arc::new(Mutex::new(())),
    };

    let mut config = nvs_store.load_config().unwrap_or_else(|err| {
        warn!("failed to load panel config from NVS: {err:#}");
        PanelConfig::default()
    });
    ensure_wifi_defaults(&mut config);
    config.sanitize();
    config.validate().context("invalid panel configuration")?;

    info!(
        "NVS config loaded: ssid=`{}`, static_ip={}, mqtt=`{}`",
        config.network.wifi_ssid,
        config.network.use_static_ip,
        config.mqtt.broker_uri(),
    );

    let surface = EspSurface {
        backlight: init_backlight(BACKLIGHT_PIN),
    };
    let now_ms = monotonic_ms();
    let panel = Panel::new(&config, surface, now_ms);
    let initial_arm = panel.initial_arm(now_ms);
    let panel: SharedPanel = Arc::new(Mutex::new(panel));

    let timer_service = EspTaskTimerService::new()?;
    let idle = IdleTimer::new(&timer_service, panel.clone())?;
    idle.reschedule(initial_arm);

    let Peripherals { modem, .. } = Peripherals::take()?;
    let mut wifi = connect_wifi(modem, sys_loop, nvs_partition, &config.network)
        .context("wifi startup failed")?;
    disable_wifi_power_save();

    let _sntp = EspSntp::new_default().context("failed to start SNTP")?;
    info!("SNTP initialized");

    let (mqtt_client, mqtt_conn) = create_mqtt_client(&config, &lock(&panel).last_will())?;
    let transport = EspTransport {
        client: Arc::new(Mutex::new(mqtt_client)),
    };
    spawn_mqtt_receiver(panel.clone(), transport.clone(), mqtt_conn);
    spawn_input_loop(panel.clone(), transport, idle)?;

    let period = Duration::from_millis(config.display.clock_refresh_ms);
    let mut last_wifi_retry_ms = 0_u64;
    loop {
        let now_ms = monotonic_ms();
        if let Some(now) = now_in_timezone(&config.display.timezone) {
            lock(&panel).refresh_clock(now);
        }
        lock(&panel).tick(now_ms);

        if !is_wifi_station_connected()
            && now_ms.saturating_sub(last_wifi_retry_ms) >= WIFI_RETRY_DELAY_MS
        {
            last_wifi_retry_ms = now_ms;
            warn!("wifi station down; reconnecting");
            if let Err(err) = wifi.connect() {
                warn!("wifi reconnect failed: {err:?}");
            }
        }

        thread::sleep(period);
    }
}

fn ensure_wifi_defaults(config: &mut PanelConfig) {
    if config.network.wifi_ssid.is_empty() {
        if let Some(ssid) = option_env!("WIFI_SSID") {
            config.network.wifi_ssid = ssid.to_string();
        }
    }

    if config.network.wifi_pass.is_empty() {
        if let Some(pass) = option_env!("WIFI_PASS") {
            config.network.wifi_pass = pass.to_string();
        }
    }
}

fn ipv4_from_octets(ip: [u8; 4]) -> Ipv4Addr {
    Ipv4Addr::new(ip[0], ip[1], ip[2], ip[3])
}

fn build_sta_netif(network: &NetworkConfig) -> anyhow::Result<Option<EspNetif>> {
    if !network.use_static_ip {
        return Ok(None);
    }

    let static_ip = network
        .static_ip
        .ok_or_else(|| anyhow!("static_ip is required when use_static_ip is set"))?;
    let gateway = network
        .gateway
        .ok_or_else(|| anyhow!("gateway is required when use_static_ip is set"))?;
    let subnet = network
        .subnet
        .ok_or_else(|| anyhow!("subnet is required when use_static_ip is set"))?;

    let mask_ip = ipv4_from_octets(subnet);
    let mask = Mask::try_from(mask_ip).map_err(|_| anyhow!("invalid subnet mask: {}", mask_ip))?;

    let conf = NetifConfiguration {
        ip_configuration: Some(IpConfiguration::Client(IpClientConfiguration::Fixed(
            IpClientSettings {
                ip: ipv4_from_octets(static_ip),
                subnet: Subnet {
                    gateway: ipv4_from_octets(gateway),
                    mask,
                },
                dns: network.dns1.map(ipv4_from_octets),
                secondary_dns: network.dns2.map(ipv4_from_octets),
            },
        ))),
        ..NetifConfiguration::wifi_default_client()
    };

    Ok(Some(EspNetif::new_with_conf(&conf)?))
}

fn connect_wifi(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs_partition: EspDefaultNvsPartition,
    network: &NetworkConfig,
) -> anyhow::Result<EspWifi<'static>> {
    let mut esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?;

    if let Some(sta_netif) = build_sta_netif(network)? {
        esp_wifi
            .swap_netif_sta(sta_netif)
            .context("failed to apply static IP netif configuration")?;
    }

    let mut wifi = BlockingWifi::wrap(&mut esp_wifi, sys_loop)?;

    let auth_method = if network.wifi_pass.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPA2Personal
    };

    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: network
            .wifi_ssid
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi ssid too long"))?,
        password: network
            .wifi_pass
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi password too long"))?,
        auth_method,
        ..Default::default()
    }))?;

    wifi.start()?;
    info!("wifi started, connecting to `{}`", network.wifi_ssid);

    for attempt in 1..=WIFI_CONNECT_ATTEMPTS {
        info!("wifi connect attempt {attempt}/{WIFI_CONNECT_ATTEMPTS}");
        match wifi.connect().and_then(|()| wifi.wait_netif_up()) {
            Ok(()) => {
                info!("wifi connected and netif up on attempt {attempt}");
                break;
            }
            Err(err) => {
                warn!("wifi connect failed on attempt {attempt}: {err:#}");
                if attempt < WIFI_CONNECT_ATTEMPTS {
                    let _ = wifi.disconnect();
                    thread::sleep(Duration::from_millis(WIFI_RETRY_DELAY_MS));
                } else {
                    warn!("wifi still down; panel runs offline until the station reconnects");
                }
            }
        }
    }

    drop(wifi);
    Ok(esp_wifi)
}

fn create_mqtt_client(
    config: &PanelConfig,
    will: &panel_common::LastWill,
) -> anyhow::Result<(EspMqttClient<'static>, EspMqttConnection)> {
    let url = config.mqtt.broker_uri();
    let credentials = config.mqtt.credentials();

    let conf = MqttClientConfiguration {
        client_id: Some(config.mqtt.client_id.as_str()),
        username: credentials.map(|(user, _)| user),
        password: credentials.map(|(_, pass)| pass),
        keep_alive_interval: Some(Duration::from_secs(config.mqtt.keep_alive_s)),
        network_timeout: Duration::from_millis(config.mqtt.network_timeout_ms),
        lwt: Some(LwtConfiguration {
            topic: &will.topic,
            payload: &will.payload,
            qos: QoS::from(will.qos),
            retain: will.retain,
        }),
        ..Default::default()
    };

    Ok(EspMqttClient::new(url.as_str(), &conf)?)
}

fn spawn_mqtt_receiver(panel: SharedPanel, transport: EspTransport, mut conn: EspMqttConnection) {
    let spawned = thread::Builder::new()
        .name("mqtt-rx".into())
        .stack_size(12 * 1024)
        .spawn(move || loop {
            match conn.next() {
                Ok(event) => match event.payload() {
                    EventPayload::Connected(_) => {
                        let mut transport = transport.clone();
                        lock(&panel).handle_connected(&mut transport);
                    }
                    EventPayload::Disconnected => lock(&panel).handle_disconnected(),
                    EventPayload::Received {
                        topic: Some(topic),
                        data,
                        details,
                        ..
                    } => {
                        // Chunked deliveries are dropped.
                        if !matches!(details, Details::Complete) {
                            continue;
                        }
                        lock(&panel).handle_message(topic, data, monotonic_ms());
                    }
                    _ => {}
                },
                Err(err) => {
                    warn!("mqtt receive loop error: {err:?}");
                    lock(&panel).handle_disconnected();
                    thread::sleep(Duration::from_secs(2));
                }
            }
        });

    if let Err(err) = spawned {
        warn!("failed to spawn mqtt receiver thread: {err}");
    }
}

fn spawn_input_loop(
    panel: SharedPanel,
    mut transport: EspTransport,
    idle: IdleTimer,
) -> anyhow::Result<()> {
    let mut buttons = Vec::new();
    for (lamp, pin) in [
        (Some(LampId::Left), BUTTON_LEFT_PIN),
        (Some(LampId::Right), BUTTON_RIGHT_PIN),
        (None, TOUCH_INT_PIN),
    ] {
        match init_button(pin) {
            Ok(driver) => buttons.push(Button {
                lamp,
                pin: driver,
                was_pressed: false,
            }),
            Err(err) => warn!("input unavailable on GPIO{pin}: {err:#}"),
        }
    }

    thread::Builder::new()
        .name("input".into())
        .stack_size(8 * 1024)
        .spawn(move || loop {
            for button in &mut buttons {
                let pressed = button.pin.is_low();
                if pressed && !button.was_pressed {
                    let now_ms = monotonic_ms();
                    let arm = {
                        let mut panel = lock(&panel);
                        match button.lamp {
                            Some(lamp) => panel.user_activate(lamp, &mut transport, now_ms),
                            None => panel.touch(now_ms),
                        }
                    };
                    idle.reschedule(arm);
                }
                button.was_pressed = pressed;
            }
            thread::sleep(Duration::from_millis(INPUT_POLL_MS));
        })
        .context("failed to spawn input thread")?;

    Ok(())
}

fn init_button(pin: i32) -> anyhow::Result<PinDriver<'static, AnyIOPin, Input>> {
    let mut driver = unsafe { PinDriver::input(AnyIOPin::new(pin)) }?;
    driver.set_pull(Pull::Up)?;
    Ok(driver)
}

fn init_backlight(pin: i32) -> Option<PinDriver<'static, AnyOutputPin, Output>> {
    let driver = unsafe { PinDriver::output(AnyOutputPin::new(pin)) };
    match driver {
        Ok(mut pin) => {
            let _ = pin.set_high();
            Some(pin)
        }
        Err(err) => {
            warn!("backlight unavailable on GPIO{pin}: {err}");
            None
        }
    }
}

fn disable_wifi_power_save() {
    let rc = unsafe { esp_idf_svc::sys::esp_wifi_set_ps(0) };
    if rc == esp_idf_svc::sys::ESP_OK {
        info!("wifi power save disabled");
    } else {
        warn!("failed to disable wifi power save: esp_err_t={rc}");
    }
}

fn is_wifi_station_connected() -> bool {
    let mut ap_info = esp_idf_svc::sys::wifi_ap_record_t::default();
    let rc = unsafe { esp_idf_svc::sys::esp_wifi_sta_get_ap_info(&mut ap_info) };
    rc == esp_idf_svc::sys::ESP_OK
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn now_in_timezone(timezone: &str) -> Option<chrono::DateTime<chrono::FixedOffset>> {
    let tz: Tz = timezone.parse().ok()?;
    let local = Utc::now().with_timezone(&tz);
    Some(local.with_timezone(&local.offset().fix()))
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
