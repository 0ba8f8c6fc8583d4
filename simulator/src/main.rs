mod lamps;

use std::time::Duration;

use anyhow::Context;
use rumqttc::{AsyncClient, Event, Incoming, LastWill, MqttOptions, QoS};
use tracing::{info, warn};

use panel_common::{
    OutboundMessage, TopicConfig, DEFAULT_TOPIC_BASE, PAYLOAD_OFFLINE, PAYLOAD_ONLINE,
};

use crate::lamps::{simulated_temperature, LampBank};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(1883);
    let base = std::env::var("PANEL_TOPIC_BASE").unwrap_or_else(|_| DEFAULT_TOPIC_BASE.to_string());
    let topics = TopicConfig::with_base(&base);
    let status_topic = format!("{}/simulator/status", base.trim_end_matches('/'));

    let mut mqtt_options = MqttOptions::new("room-panel-simulator", mqtt_host, mqtt_port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    mqtt_options.set_last_will(LastWill::new(
        status_topic.clone(),
        PAYLOAD_OFFLINE.as_bytes().to_vec(),
        QoS::AtLeastOnce,
        true,
    ));

    if let Ok(user) = std::env::var("MQTT_USER") {
        let pass = std::env::var("MQTT_PASS").unwrap_or_default();
        mqtt_options.set_credentials(user, pass);
    }

    let (mqtt, mut eventloop) = AsyncClient::new(mqtt_options, 32);
    let temperature_topic = topics.temperature.clone();
    let mut bank = LampBank::new(topics);

    let publisher = mqtt.clone();
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("simulator connected; announcing lamps");
                    if let Err(err) = announce(&publisher, &bank, &status_topic).await {
                        warn!("simulator announce failed: {err:#}");
                    }
                }
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    if let Some(state) = bank.handle_command(&message.topic, &message.payload) {
                        info!(
                            "lamp {} -> {}",
                            state.topic,
                            String::from_utf8_lossy(&state.payload)
                        );
                        if let Err(err) = publish(&publisher, state).await {
                            warn!("lamp state publish failed: {err:#}");
                        }
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("simulator mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });

    info!("lamp simulator started");

    let mut tick: u64 = 0;
    let mut interval = tokio::time::interval(Duration::from_secs(30));

    loop {
        interval.tick().await;
        tick = tick.saturating_add(1);

        mqtt.publish(
            temperature_topic.as_str(),
            QoS::AtLeastOnce,
            true,
            simulated_temperature(tick),
        )
        .await
        .context("failed to publish simulated temperature")?;
    }
}

async fn announce(mqtt: &AsyncClient, bank: &LampBank, status_topic: &str) -> anyhow::Result<()> {
    for topic in bank.command_topics() {
        mqtt.subscribe(topic, QoS::AtLeastOnce)
            .await
            .with_context(|| format!("failed to subscribe to {topic}"))?;
    }
    for state in bank.snapshot() {
        publish(mqtt, state).await?;
    }
    mqtt.publish(status_topic, QoS::AtLeastOnce, true, PAYLOAD_ONLINE)
        .await
        .context("failed to publish simulator online status")?;
    Ok(())
}

async fn publish(mqtt: &AsyncClient, message: OutboundMessage) -> anyhow::Result<()> {
    mqtt.publish(
        message.topic,
        QoS::from(message.qos),
        message.retain,
        message.payload,
    )
        .await
        .context("failed to publish lamp state")
}
