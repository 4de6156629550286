use lazy_static::lazy_static;
use log::info;
use serde::{Deserialize, Serialize};
use serde_yml;
use std::error::Error;
use std::fs::File;
use std::io::prelude::*;
use std::sync::RwLock;
use std::time::Duration;

fn mqtt_client_name_default() -> String { return "kaco2mqtt".to_string() }
fn mqtt_ha_enabled_default() -> bool { return true }

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub pass: String,
    #[serde(default="mqtt_ha_enabled_default")]
    pub ha_enabled: bool,
    #[serde(default="mqtt_client_name_default")]
    pub client_name: String,
}

fn tcp_port_default() -> u16 { return crate::metering_kaco::link::DEFAULT_TCP_PORT }
fn serial_baud_rate_default() -> u32 { return crate::metering_kaco::link::DEFAULT_BAUD_RATE }

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum KacoTransportConfig {
    /* serial-to-network converter */
    Tcp {
        host: String,
        #[serde(default="tcp_port_default")]
        port: u16,
    },
    /* `port: auto` picks the first /dev/ttyUSB* */
    Serial {
        port: String,
        #[serde(default="serial_baud_rate_default")]
        baud_rate: u32,
    },
}

fn kaco_enabled_default() -> bool { return true }
fn kaco_read_interval_default() -> u64 { return 60 }
fn kaco_idle_timeout_default() -> u64 { return 700 }

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct KacoLinkConfig {
    pub name: String,
    #[serde(default="kaco_enabled_default")]
    pub enabled: bool,
    pub transport: KacoTransportConfig,
    /* empty means scan the address range once on startup */
    #[serde(default)]
    pub inverters: Vec<u8>,
    #[serde(default="kaco_read_interval_default")]
    pub read_interval: u64,
    #[serde(default="kaco_idle_timeout_default")]
    pub idle_timeout_ms: u64,
    #[serde(default)]
    pub verify_checksum: bool,
}

impl KacoLinkConfig {
    pub fn idle_timeout(&self) -> Duration {
        return Duration::from_millis(self.idle_timeout_ms);
    }

    /* never spin faster than once per second */
    pub fn read_interval(&self) -> Duration {
        return Duration::from_secs(self.read_interval.max(1));
    }
}

fn kaco_default() -> Vec<KacoLinkConfig> { return Vec::new(); }

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct Config {
    pub mqtt: MqttConfig,
    #[serde(default="kaco_default")]
    pub kaco: Vec<KacoLinkConfig>,
}

impl Config {
    pub fn from_str(contents: &str) -> Result<Self, serde_yml::Error> {
        return serde_yml::from_str(contents);
    }
}

pub struct ConfigHolder {
    pub config: Config,
}

pub enum ConfigBases {
    Mqtt(MqttConfig),
    Kaco(Vec<KacoLinkConfig>),
}

impl ConfigHolder {
    pub fn load() -> Self {

        /* Check for the two paths of the config file */
        let (mut file, bpath) = match File::open("config/kaco2mqtt.yaml") {
            Ok(f) => (f, "config/".to_string()),
            Err(_) => (File::open("kaco2mqtt.yaml").expect("Unable to read the config on config/kaco2mqtt.yaml or kaco2mqtt.yaml"), "".to_string()),
        };

        let mut contents = String::new();
        file.read_to_string(&mut contents).expect("Unable to read config file");
        let c = Config::from_str(&contents).expect("Unable to parse config file");
        info!("Loaded config from {}kaco2mqtt.yaml with {} Kaco links", bpath, c.kaco.len());

        return ConfigHolder {
            config: c,
        }
    }

    pub fn get_copy(&self, base: &str) -> Result<ConfigBases, Box<dyn Error>> {
        match base {
            "mqtt" => { return Ok(ConfigBases::Mqtt(self.config.mqtt.clone())) },
            "kaco" => { return Ok(ConfigBases::Kaco(self.config.kaco.clone())) },
            _ => { Err("Type not known")? }
        }
    }
}

lazy_static! {
    pub static ref CONFIG: RwLock<ConfigHolder> = RwLock::new(ConfigHolder::load());
}

#[macro_export]
macro_rules! get_config_or_panic {
    ($base: expr, $pat: path) => {
        {
            let c = CONFIG.read().unwrap().get_copy($base).unwrap();
            if let $pat(a) = c {
                a
            } else {
                panic!(
                    "mismatch variant when cast to {}",
                    stringify!($pat));
            }
        }
    };
}
