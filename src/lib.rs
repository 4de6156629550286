//! Kaco Powador inverter bridge
//!
//! Polls Kaco Powador inverters over their RS485 ASCII protocol and
//! publishes the decoded readings to MQTT.

pub mod models;
pub mod mqtt;
pub mod config;
pub mod metering_kaco;

// Re-export common types for easier access
pub use mqtt::MeteringData;
pub use config::CONFIG;
pub use metering_kaco::{KacoError, KacoManager};

pub fn get_unix_ts() -> u64 {
    return std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
}

pub fn get_id(protocol: String, meter_name: &String) -> String {
    return format!("{}-{}-{:?}", protocol, meter_name, get_unix_ts());
}
