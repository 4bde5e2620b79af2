//! MQTT-over-TLS transport on top of the ESP-IDF MQTT client
//!
//! esp-mqtt runs its own task and reports events through a callback. The
//! callback only touches the shared [`Inbox`] and an atomic connected flag,
//! so no further locking is needed on this side.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use esp_idf_hal::delay::FreeRtos;
use esp_idf_svc::mqtt::client::{
    EspMqttClient, EventPayload, MqttClientConfiguration, MqttProtocolVersion, QoS,
};
use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::inbox::{Inbound, Inbox};
use crate::transport::{ConnectOptions, Transport};

/// How long `connect` waits for the broker's CONNACK
const CONNECT_TIMEOUT_MS: u32 = 10_000;

const KEEP_ALIVE: Duration = Duration::from_secs(60);

pub struct EspMqttTransport {
    client: Option<EspMqttClient<'static>>,
    inbox: Inbox,
    connected: Arc<AtomicBool>,
}

impl EspMqttTransport {
    pub fn new(inbox: Inbox) -> Self {
        Self {
            client: None,
            inbox,
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    fn client(&mut self, op: &'static str) -> Result<&mut EspMqttClient<'static>> {
        self.client
            .as_mut()
            .ok_or_else(|| Error::transport(op, "not connected"))
    }
}

impl Transport for EspMqttTransport {
    fn connect(&mut self, options: &ConnectOptions<'_>) -> Result<()> {
        self.disconnect();

        let url = format!("mqtts://{}:{}", options.host, options.port);
        let conf = MqttClientConfiguration {
            client_id: Some(options.client_id),
            username: Some(options.username),
            password: Some(options.password),
            protocol_version: Some(MqttProtocolVersion::V3_1_1),
            keep_alive_interval: Some(KEEP_ALIVE),
            crt_bundle_attach: Some(esp_idf_svc::sys::esp_crt_bundle_attach),
            ..Default::default()
        };

        let inbox = self.inbox.clone();
        let connected = self.connected.clone();
        let client = EspMqttClient::new_cb(&url, &conf, move |event| match event.payload() {
            EventPayload::Connected(_) => connected.store(true, Ordering::SeqCst),
            EventPayload::Disconnected => connected.store(false, Ordering::SeqCst),
            EventPayload::Received { topic, data, .. } => {
                inbox.push(Inbound::new(topic.unwrap_or_default(), data));
            }
            EventPayload::Error(e) => warn!("MQTT error: {:?}", e),
            _ => {}
        })
        .map_err(|e| Error::transport("connect", e))?;
        self.client = Some(client);

        debug!("Waiting for CONNACK from {}", options.host);
        let mut waited_ms = 0;
        while !self.connected.load(Ordering::SeqCst) {
            if waited_ms >= CONNECT_TIMEOUT_MS {
                self.disconnect();
                return Err(Error::transport("connect", "no CONNACK from broker"));
            }
            FreeRtos::delay_ms(50);
            waited_ms += 50;
        }

        info!("MQTT connected to {}", options.host);
        Ok(())
    }

    fn subscribe(&mut self, topic: &str) -> Result<()> {
        self.client("subscribe")?
            .subscribe(topic, QoS::AtLeastOnce)
            .map(|_| ())
            .map_err(|e| Error::transport("subscribe", e))
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<()> {
        self.client("publish")?
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .map(|_| ())
            .map_err(|e| Error::transport("publish", e))
    }

    fn service(&mut self) {
        // esp-mqtt pumps the socket from its own task; nothing to do here.
    }

    fn is_connected(&self) -> bool {
        self.client.is_some() && self.connected.load(Ordering::SeqCst)
    }

    fn disconnect(&mut self) {
        if self.client.take().is_some() {
            debug!("MQTT client dropped");
        }
        self.connected.store(false, Ordering::SeqCst);
    }
}
