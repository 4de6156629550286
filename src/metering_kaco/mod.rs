use crate::config::{ConfigBases, KacoLinkConfig, KacoTransportConfig};
use crate::mqtt::ha_interface::{HaComponent, HaDiscover};
use crate::mqtt::{publish_protocol_count, Transmission};
use crate::{get_config_or_panic, get_id, get_unix_ts, models::DeviceProtocol, MeteringData, CONFIG};
use log::{debug, error, info, warn};
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;

pub mod command;
pub mod collector;
pub mod field_templates;
pub mod link;
pub mod parser;
pub mod structs;

use collector::ResponseCollector;
use command::{command_digit_from_request, encode_command, CommandCode};
use link::Link;
use structs::{MeasurementSet, RawResponse};

/// Addresses probed when a link has no inverters configured.
pub const DEFAULT_SCAN_RANGE: RangeInclusive<u8> = 0..=32;

#[derive(Error, Debug)]
pub enum KacoError {
    #[error("unknown command \"{command}\" to parse in {line:?}")]
    UnknownCommand { command: String, line: String },
    #[error("length of answer and template not the same: {line:?} has {tokens} fields, template has {expected}")]
    FieldCountMismatch { line: String, tokens: usize, expected: usize },
    #[error("field {field} can not be converted from {raw:?} in {line:?}")]
    InvalidValue { field: String, raw: String, line: String },
    #[error("could not get an answer from inverter number {inverter}; answer: {answers:?}")]
    NoResponse { inverter: u8, answers: Vec<RawResponse> },
    #[error("link error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no serial port found for {0}")]
    NoSerialPort(String),
    #[error("invalid serial port pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// Sends every known command to `inverter` and collects the raw replies.
pub fn read_inverter<L: Link + ?Sized>(
    link: &mut L,
    collector: &ResponseCollector,
    inverter: u8,
) -> Result<Vec<RawResponse>, KacoError> {
    let mut answers = Vec::new();

    for command in CommandCode::ALL {
        let request = encode_command(inverter, command);
        let lines = collector.send_cmd_and_read(link, &request)?;
        answers.push(RawResponse { request, lines });
    }

    return Ok(answers);
}

/// Decodes all replies of one poll into a fresh measurement set.
pub fn parse_answers(inverter: u8, answers: &[RawResponse], verify_checksum: bool) -> Result<MeasurementSet, KacoError> {
    let mut out = MeasurementSet::new();

    for answer in answers {
        let command = match command_digit_from_request(&answer.request) {
            Some(c) => c,
            None => {
                return Err(KacoError::UnknownCommand {
                    command: answer.request.clone(),
                    line: answer.lines.join("\n"),
                });
            }
        };

        for line in answer.lines.iter() {
            if parser::clean_line(line).trim().is_empty() {
                continue;
            }
            out.merge(parser::parse_line(line, command, verify_checksum)?);
        }
    }

    /* a silent inverter is an error, never an empty success */
    if out.is_empty() {
        return Err(KacoError::NoResponse {
            inverter,
            answers: answers.to_vec(),
        });
    }

    return Ok(out);
}

pub fn read_inverter_and_parse<L: Link + ?Sized>(
    link: &mut L,
    collector: &ResponseCollector,
    inverter: u8,
    verify_checksum: bool,
) -> Result<MeasurementSet, KacoError> {
    let answers = read_inverter(link, collector, inverter)?;
    return parse_answers(inverter, &answers, verify_checksum);
}

/// Probes each address with command 0 and returns the ones that answered.
pub fn scan_inverters<L: Link + ?Sized>(
    link: &mut L,
    collector: &ResponseCollector,
    addresses: RangeInclusive<u8>,
) -> Result<Vec<u8>, KacoError> {
    let mut found = Vec::new();

    for inverter in addresses {
        let request = encode_command(inverter, CommandCode::Readings);
        let lines = collector.send_cmd_and_read(link, &request)?;
        if lines.iter().any(|l| !parser::clean_line(l).trim().is_empty()) {
            info!("Found inverter number {}", inverter);
            found.push(inverter);
        }
    }

    return Ok(found);
}

pub fn open_link(transport: &KacoTransportConfig) -> Result<Box<dyn Link + Send>, KacoError> {
    match transport {
        KacoTransportConfig::Tcp { host, port } => {
            return Ok(Box::new(link::TcpLink::connect(host, *port)?));
        }
        #[cfg(feature = "serial")]
        KacoTransportConfig::Serial { port, baud_rate } => {
            let path = link::resolve_serial_port(port)?;
            return Ok(Box::new(link::SerialLink::open(&path, *baud_rate)?));
        }
        #[cfg(not(feature = "serial"))]
        KacoTransportConfig::Serial { port, .. } => {
            return Err(KacoError::NoSerialPort(format!("{} (built without serial support)", port)));
        }
    }
}

pub fn meter_name(link_name: &str, inverter: u8) -> String {
    return format!("{}_{}", link_name, inverter);
}

pub fn build_metering_data(link_name: &str, inverter: u8, set: &MeasurementSet) -> MeteringData {
    let name = meter_name(link_name, inverter);

    let mut mr = MeteringData::new();
    mr.protocol = DeviceProtocol::Kaco;
    mr.id = get_id("kaco".to_string(), &name);
    mr.meter_name = name;
    mr.transmission_time = get_unix_ts();
    mr.metered_time = mr.transmission_time;
    mr.metered_values = set.to_values();

    let mut protocol_map = serde_json::Map::new();
    protocol_map.insert("type".to_string(), "kaco".into());
    protocol_map.insert("inverter".to_string(), inverter.into());
    protocol_map.insert("link".to_string(), link_name.into());
    mr.metered_values.insert("proto".to_string(), protocol_map.into());

    return mr;
}

/// Home Assistant device with one sensor per numeric field.
pub fn build_discovery(meter: &str) -> HaDiscover {
    let proto = format!("{:?}", DeviceProtocol::Kaco);
    let mut discover = HaDiscover::new(meter.to_string(), "Kaco".to_string(), "Powador".to_string(), proto.clone());

    for spec in field_templates::all_fields() {
        if spec.converter.is_none() {
            continue;
        }

        let device_class = spec.device_class.unwrap_or("NONE");
        let state_class = if device_class == "energy" { "total_increasing" } else { "measurement" };

        let mut cmp = HaComponent::new(
            meter.to_string(),
            device_class.to_string(),
            spec.unit.unwrap_or("NONE").to_string(),
            proto.clone(),
            spec.name.to_string(),
            state_class.to_string(),
        );
        cmp.set_scale(spec.scale);
        discover.cmps.insert(spec.name.to_string(), serde_json::to_value(cmp).unwrap_or_default());
    }

    return discover;
}

struct PollOutcome {
    link: Option<Box<dyn Link + Send>>,
    inverters: Vec<u8>,
    results: Vec<(u8, Result<MeasurementSet, KacoError>)>,
}

/* Runs on a blocking thread, inverters are polled strictly one after another */
fn poll_link(conf: &KacoLinkConfig, link: Option<Box<dyn Link + Send>>, inverters: Vec<u8>) -> PollOutcome {
    let mut link = match link {
        Some(l) => l,
        None => match open_link(&conf.transport) {
            Ok(l) => {
                info!("[{}] Link opened", conf.name);
                l
            }
            Err(e) => {
                error!("[{}] Unable to open link: {}", conf.name, e);
                return PollOutcome { link: None, inverters, results: Vec::new() };
            }
        },
    };

    let collector = ResponseCollector::new(conf.idle_timeout());

    let inverters = if inverters.is_empty() {
        info!("[{}] No inverters configured, scanning {:?}", conf.name, DEFAULT_SCAN_RANGE);
        match scan_inverters(&mut link, &collector, DEFAULT_SCAN_RANGE) {
            Ok(found) => found,
            Err(e) => {
                error!("[{}] Scanning for inverters failed: {}", conf.name, e);
                return PollOutcome { link: None, inverters, results: Vec::new() };
            }
        }
    } else {
        inverters
    };

    let mut results = Vec::new();
    let mut link_ok = true;
    for inverter in inverters.iter() {
        debug!("[{}] Reading inverter {}", conf.name, inverter);
        let result = read_inverter_and_parse(&mut link, &collector, *inverter, conf.verify_checksum);
        if let Err(KacoError::Io(_)) = &result {
            link_ok = false;
        }
        results.push((*inverter, result));
        if !link_ok {
            /* reopen on the next tick */
            break;
        }
    }

    return PollOutcome {
        link: if link_ok { Some(link) } else { None },
        inverters,
        results,
    };
}

/// Adds inverters found on a link to the total and publishes the new count.
pub async fn add_inverter_count(sender: &Sender<Transmission>, total: &AtomicU32, found: u32) -> u32 {
    let count = total.fetch_add(found, Ordering::SeqCst) + found;
    publish_protocol_count(sender, "kaco", count).await;
    return count;
}

async fn run_link(conf: KacoLinkConfig, sender: Sender<Transmission>, ha_enabled: bool, total: Arc<AtomicU32>) {
    let delay = conf.read_interval();
    let mut link: Option<Box<dyn Link + Send>> = None;
    let mut inverters = conf.inverters.clone();
    let mut announced = false;
    /* scanned links are only counted once the scan found something */
    let mut counted = !conf.inverters.is_empty();

    loop {
        let c = conf.clone();
        let l = link.take();
        let inv = inverters.clone();

        match tokio::task::spawn_blocking(move || poll_link(&c, l, inv)).await {
            Ok(outcome) => {
                link = outcome.link;
                inverters = outcome.inverters;

                for (inverter, result) in outcome.results {
                    match result {
                        Ok(set) => {
                            debug!("[{}] Inverter {} delivered {} fields", conf.name, inverter, set.len());
                            let data = build_metering_data(&conf.name, inverter, &set);
                            let _ = sender.send(Transmission::Metering(data)).await;
                        }
                        Err(e) => {
                            error!("[{}] Reading inverter {} failed: {}", conf.name, inverter, e);
                        }
                    }
                }
            }
            Err(e) => {
                error!("[{}] Poll thread failed: {:?}", conf.name, e);
            }
        }

        if !counted && !inverters.is_empty() {
            info!("[{}] Scan found inverters {:?}", conf.name, inverters);
            add_inverter_count(&sender, &total, inverters.len() as u32).await;
            counted = true;
        }

        if ha_enabled && !announced && !inverters.is_empty() {
            for inverter in inverters.iter() {
                let discover = build_discovery(&meter_name(&conf.name, *inverter));
                let _ = sender.send(Transmission::AutoDiscovery(discover)).await;
            }
            announced = true;
        }

        tokio::time::sleep(delay).await;
    }
}

pub struct KacoManager {
    sender: Sender<Transmission>,
    config: Vec<KacoLinkConfig>,
    ha_enabled: bool,
    threads: Vec<JoinHandle<()>>,
}

impl KacoManager {
    pub fn new(sender: Sender<Transmission>) -> Self {
        let config: Vec<KacoLinkConfig> = get_config_or_panic!("kaco", ConfigBases::Kaco);
        let mqtt = get_config_or_panic!("mqtt", ConfigBases::Mqtt);
        return Self::with_config(sender, config, mqtt.ha_enabled);
    }

    pub fn with_config(sender: Sender<Transmission>, config: Vec<KacoLinkConfig>, ha_enabled: bool) -> Self {
        return KacoManager {
            sender,
            config,
            ha_enabled,
            threads: Vec::new(),
        };
    }

    pub async fn start_thread(&mut self) {
        info!("Starting Kaco thread");

        let total = Arc::new(AtomicU32::new(0));
        for conf in self.config.iter() {
            if !conf.enabled {
                info!("Kaco link {} is disabled", conf.name);
                continue;
            }

            total.fetch_add(conf.inverters.len() as u32, Ordering::SeqCst);
            let conf = conf.clone();
            let sender = self.sender.clone();
            let ha_enabled = self.ha_enabled;
            let total = total.clone();
            self.threads.push(tokio::spawn(async move {
                run_link(conf, sender, ha_enabled, total).await;
            }));
        }

        publish_protocol_count(&self.sender, "kaco", total.load(Ordering::SeqCst)).await;

        if self.threads.is_empty() {
            warn!("No enabled Kaco links configured");
            return;
        }

        info!("Kaco activated with {} links", self.threads.len());
        for thread in self.threads.drain(..) {
            if let Err(e) = thread.await {
                error!("Kaco link thread ended: {:?}", e);
            }
        }
    }
}
