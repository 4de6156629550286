pub mod ha_interface;

use lazy_static::lazy_static;
use tokio::sync::RwLock;
use crate::config::MqttConfig;
use crate::models::DeviceProtocol;
use crate::mqtt::ha_interface::HaDiscover;
use log::{debug, error, info};
use tokio::sync::mpsc::{Receiver, Sender};
use serde::{Serialize, Deserialize};
use serde_json;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::{Duration, Instant};

pub const TOPIC_BASE: &str = "kaco2mqtt";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum MqttConnectionStatus {
    Connected,
    Disconnected,
    Error(String),
}

#[derive(Clone)]
pub struct MqttHealthStatus {
    pub status: MqttConnectionStatus,
    pub last_connected: Option<Instant>,
    pub last_message_sent: Option<Instant>,
    pub connection_attempts: u64,
}

#[derive(Clone)]
pub struct AppStatus {
    pub start_time: Instant,
    pub mqtt_health: MqttHealthStatus,
}

impl MqttHealthStatus {
    pub fn new() -> Self {
        Self {
            status: MqttConnectionStatus::Disconnected,
            last_connected: None,
            last_message_sent: None,
            connection_attempts: 0,
        }
    }
}

impl AppStatus {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            mqtt_health: MqttHealthStatus::new(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[derive(Serialize, Deserialize)]
pub struct MeteringData {
    pub id: String,
    pub meter_name: String,
    pub protocol: DeviceProtocol,
    pub transmission_time: u64,
    pub metered_time: u64,
    pub metered_values: serde_json::Map<String, serde_json::Value>
}

impl MeteringData {
    pub fn new() -> Self {
        return MeteringData {
            id: "".to_string(),
            meter_name: "".to_string(),
            protocol: DeviceProtocol::Unknown,
            transmission_time: 0,
            metered_time: 0,
            metered_values: serde_json::Map::new()
        };
    }

    /// Topic carrying only the values of this meter.
    pub fn device_topic(&self) -> String {
        return format!("{}/devs/{:?}/{}", TOPIC_BASE, self.protocol, self.meter_name);
    }
}

pub struct PublishData {
    pub topic: String,
    pub payload: String,
    pub qos: u8,
    pub retain: bool,
}

pub enum Transmission {
    Metering(MeteringData),
    AutoDiscovery(HaDiscover),
    Publish(PublishData)
}

pub fn qos_from_u8(qos: u8) -> QoS {
    match qos {
        1 => QoS::AtLeastOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtMostOnce,
    }
}

pub struct MqttManager {
    rx: Receiver<Transmission>,
    exit_thread: bool,
    client: AsyncClient,
}

lazy_static! {
    pub static ref APP_STATUS: RwLock<AppStatus> = RwLock::new(AppStatus::new());
}

impl MqttManager {
    pub fn new(config: &MqttConfig) -> (Self, Sender<Transmission>) {
        let (mtx, mrx) = tokio::sync::mpsc::channel(100);

        info!("MQTT connection to {}:{} starting up", config.host, config.port);
        let mut mqttoptions = MqttOptions::new(config.client_name.clone(), config.host.clone(), config.port);
        mqttoptions.set_keep_alive(Duration::from_secs(5));
        if !config.user.is_empty() {
            mqttoptions.set_credentials(config.user.clone(), config.pass.clone());
        }

        let (client, mut eventloop) = AsyncClient::new(mqttoptions, 10);

        /* The eventloop has to be polled for anything to leave the client */
        tokio::spawn(async move {
            info!("MQTT Eventloop started");
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("Connected to MQTT broker");
                        let mut app_status = APP_STATUS.write().await;
                        app_status.mqtt_health.status = MqttConnectionStatus::Connected;
                        app_status.mqtt_health.last_connected = Some(Instant::now());
                        app_status.mqtt_health.connection_attempts += 1;
                    },
                    Ok(_) => {},
                    Err(e) => {
                        error!("Error in MQTT {:?}, reconnecting ", e);
                        APP_STATUS.write().await.mqtt_health.status = MqttConnectionStatus::Error(e.to_string());
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        return (MqttManager {
            client: client,
            rx: mrx,
            exit_thread: false,
        }, mtx);
    }

    pub async fn start_thread(&mut self) {

        while !self.exit_thread {
            let option = self.rx.recv().await;

            let transmission = match option {
                Some(t) => t,
                None => {
                    debug!("Reading returned none, we exit now");
                    self.exit_thread = true;
                    continue;
                }
            };

            match transmission {
                Transmission::Metering(data) => {
                    info!("Metering data received: {}", data.id);
                    let payload = match serde_json::to_string(&data) {
                        Ok(p) => p,
                        Err(e) => {
                            error!("Unable to serialize {}: {}", data.id, e);
                            continue;
                        }
                    };

                    match self.client.publish(format!("{}/raw", TOPIC_BASE), QoS::AtLeastOnce, false, payload).await {
                        Err(e) => { error!("Error sending: {}", e); },
                        Ok(_) => {
                            debug!("Send successfully");
                            APP_STATUS.write().await.mqtt_health.last_message_sent = Some(Instant::now());
                        }
                    }

                    let values = serde_json::Value::Object(data.metered_values.clone()).to_string();
                    let _ = self.client.publish(data.device_topic(), QoS::AtLeastOnce, false, values).await;
                },
                Transmission::AutoDiscovery(disc) => {
                    match serde_json::to_string(&disc) {
                        Ok(payload) => {
                            let _ = self.client.publish(disc.discover_topic.clone(), QoS::AtLeastOnce, true, payload).await;
                        },
                        Err(e) => { error!("Unable to serialize discovery for {}: {}", disc.get_dev_id(), e); }
                    }
                },
                Transmission::Publish(publish_data) => {
                    match self.client.publish(
                        publish_data.topic,
                        qos_from_u8(publish_data.qos),
                        publish_data.retain,
                        publish_data.payload
                    ).await {
                        Err(e) => { error!("Error publishing: {}", e); },
                        Ok(_) => { debug!("Published successfully"); }
                    }
                },
            };
        }

        info!("MQTT thread exit");
    }
}

pub async fn get_app_status() -> AppStatus {
    APP_STATUS.read().await.clone()
}

pub async fn publish_uptime(mqtt_sender: &Sender<Transmission>) {
    let app_status = get_app_status().await;

    let uptime_publish = PublishData {
        topic: format!("{}/mgt/uptime", TOPIC_BASE),
        payload: app_status.uptime_seconds().to_string(),
        qos: 1,
        retain: true,
    };
    let _ = mqtt_sender.send(Transmission::Publish(uptime_publish)).await;
}

pub async fn publish_protocol_count(mqtt_sender: &Sender<Transmission>, protocol: &str, count: u32) {
    let count_publish = PublishData {
        topic: format!("{}/mgt/{}/count", TOPIC_BASE, protocol),
        payload: count.to_string(),
        qos: 1,
        retain: true,
    };
    let _ = mqtt_sender.send(Transmission::Publish(count_publish)).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_topic() {
        let mut data = MeteringData::new();
        data.protocol = DeviceProtocol::Kaco;
        data.meter_name = "roof_1".to_string();
        assert_eq!(data.device_topic(), "kaco2mqtt/devs/Kaco/roof_1");
    }

    #[test]
    fn test_metering_data_json() {
        let mut data = MeteringData::new();
        data.protocol = DeviceProtocol::Kaco;
        data.metered_values.insert("p_ac".to_string(), 280.into());
        let v = serde_json::to_value(&data).unwrap();
        assert_eq!(v["protocol"], serde_json::json!("Kaco"));
        assert_eq!(v["metered_values"]["p_ac"], serde_json::json!(280));
    }

    #[test]
    fn test_qos_mapping() {
        assert_eq!(qos_from_u8(0), QoS::AtMostOnce);
        assert_eq!(qos_from_u8(1), QoS::AtLeastOnce);
        assert_eq!(qos_from_u8(2), QoS::ExactlyOnce);
        assert_eq!(qos_from_u8(9), QoS::AtMostOnce);
    }

    #[tokio::test]
    async fn test_publish_protocol_count() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(2);
        publish_protocol_count(&tx, "kaco", 3).await;
        publish_uptime(&tx).await;

        match rx.recv().await {
            Some(Transmission::Publish(p)) => {
                assert_eq!(p.topic, "kaco2mqtt/mgt/kaco/count");
                assert_eq!(p.payload, "3");
                assert!(p.retain);
            },
            _ => panic!("expected a publish"),
        }
        match rx.recv().await {
            Some(Transmission::Publish(p)) => assert_eq!(p.topic, "kaco2mqtt/mgt/uptime"),
            _ => panic!("expected a publish"),
        }
    }
}
