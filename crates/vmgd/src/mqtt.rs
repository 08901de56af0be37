//! MQTT link to the OEM backend
//!
//! Thin wrapper over `rumqttc`: one background task drives the event loop
//! and forwards incoming publishes over a channel; the rest of the daemon
//! only sees `publish`/`subscribe` and a stream of `(topic, payload)` pairs.

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use vmg_core::{ProgressReport, ProgressSink, VmgConfig};

/// An incoming backend message
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: String,
}

/// Connected MQTT client handle
#[derive(Clone)]
pub struct MqttLink {
    client: AsyncClient,
}

impl MqttLink {
    /// Connect to the broker and start the event-loop task. Incoming
    /// publishes are delivered on the returned channel.
    pub fn connect(config: &VmgConfig) -> (Self, mpsc::UnboundedReceiver<InboundMessage>) {
        let client_id = format!("{}_mqtt", config.device.device_id);
        let mut options = MqttOptions::new(
            client_id,
            config.server.host.clone(),
            config.server.mqtt_port,
        );
        options.set_keep_alive(Duration::from_secs(30));
        options.set_clean_session(true);

        let (client, mut event_loop) = AsyncClient::new(options, 64);
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let message = InboundMessage {
                            topic: publish.topic.clone(),
                            payload: String::from_utf8_lossy(&publish.payload).into_owned(),
                        };
                        debug!(topic = %message.topic, "MQTT message received");
                        if tx.send(message).is_err() {
                            break; // daemon is gone
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "MQTT connection error, retrying");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        (Self { client }, rx)
    }

    pub async fn subscribe(&self, topic: &str) -> anyhow::Result<()> {
        self.client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| anyhow::anyhow!("subscribe {} failed: {}", topic, e))
    }

    pub async fn publish(&self, topic: &str, payload: String) -> anyhow::Result<()> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| anyhow::anyhow!("publish {} failed: {}", topic, e))
    }
}

/// Progress sink that serializes reports onto the OTA progress topic
pub struct MqttProgressSink {
    link: MqttLink,
    topic: String,
}

impl MqttProgressSink {
    pub fn new(link: MqttLink, topic: String) -> Self {
        Self { link, topic }
    }
}

#[async_trait]
impl ProgressSink for MqttProgressSink {
    async fn publish(&self, report: &ProgressReport) {
        match serde_json::to_string(report) {
            Ok(json) => {
                if let Err(e) = self.link.publish(&self.topic, json).await {
                    warn!(error = %e, "failed to publish OTA progress");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize OTA progress"),
        }
    }
}
