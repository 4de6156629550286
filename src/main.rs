use kaco2mqtt::config::ConfigBases;
use kaco2mqtt::metering_kaco::collector::ResponseCollector;
use kaco2mqtt::metering_kaco::link::{TcpLink, DEFAULT_TCP_PORT};
use kaco2mqtt::metering_kaco::read_inverter_and_parse;
use kaco2mqtt::mqtt::{publish_uptime, MqttManager};
use kaco2mqtt::{get_config_or_panic, KacoError, KacoManager, CONFIG};
use tokio::task::JoinHandle;
use std::time::Duration;
use log::{error, info};

fn usage() -> ! {
    eprintln!("usage: kaco2mqtt [--once <host[:port]> <inverter>]");
    std::process::exit(2);
}

fn split_host_port(target: &str) -> Option<(String, u16)> {
    match target.rsplit_once(':') {
        Some((host, port)) => Some((host.to_string(), port.parse().ok()?)),
        None => Some((target.to_string(), DEFAULT_TCP_PORT)),
    }
}

/* Polls one inverter and prints what it answered */
fn run_once(host: &str, port: u16, inverter: u8) -> Result<String, KacoError> {
    let mut link = TcpLink::connect(host, port)?;
    let set = read_inverter_and_parse(&mut link, &ResponseCollector::default(), inverter, false)?;
    return Ok(serde_json::to_string_pretty(&set).unwrap_or_default());
}

#[tokio::main]
async fn main() {
    // Initialize logging
    let default_filter = std::env::var("KACO_LOG_LEVEL").unwrap_or("info".to_string());
    env_logger::init_from_env(env_logger::Env::new().default_filter_or(default_filter));

    let args: Vec<String> = std::env::args().skip(1).collect();
    if !args.is_empty() {
        if args.len() != 3 || args[0] != "--once" {
            usage();
        }
        let (host, port) = split_host_port(&args[1]).unwrap_or_else(|| usage());
        let inverter: u8 = args[2].parse().unwrap_or_else(|_| usage());

        let result = tokio::task::spawn_blocking(move || run_once(&host, port, inverter)).await;
        match result {
            Ok(Ok(json)) => {
                println!("{}", json);
                return;
            }
            Ok(Err(e)) => error!("{}", e),
            Err(e) => error!("Poll thread failed: {:?}", e),
        }
        std::process::exit(1);
    }

    let mqtt_config = get_config_or_panic!("mqtt", ConfigBases::Mqtt);

    // we need a channel for the subparts to send metering data to the handler
    let (mut mqtt, tx) = MqttManager::new(&mqtt_config);

    let mut threads: Vec<JoinHandle<()>> = Vec::new();

    threads.push(tokio::spawn(async move {
        mqtt.start_thread().await;
    }));

    let mut kaco = KacoManager::new(tx.clone());
    threads.push(tokio::spawn(async move {
        kaco.start_thread().await;
    }));

    /* Periodic uptime publishing */
    let uptime_sender = tx.clone();
    threads.push(tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(10));
        loop {
            interval.tick().await;
            publish_uptime(&uptime_sender).await;
        }
    }));

    info!("All modules started, now waiting for a signal to exit");
    loop {
        tokio::time::sleep(Duration::from_secs(10)).await;
        let mut kill_all_tasks = false;
        for task in threads.iter() {
            if task.is_finished() {
                kill_all_tasks = true;
            }
        }

        if kill_all_tasks == true {
            error!("A module stopped, shutting down");
            for task in threads.iter_mut() {
                task.abort();
            }
            break;
        }
    }
}
