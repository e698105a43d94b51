use std::env;
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use log::{error, info, warn};
use pcap::Device;
use tokio::sync::mpsc;

use wifi_ids::config::DEFAULT_CONFIG_PATH;
use wifi_ids::{Config, Engine};

#[cfg(unix)]
extern crate libc;

fn check_root_privileges() -> bool {
    #[cfg(unix)]
    {
        unsafe { libc::geteuid() == 0 }
    }

    #[cfg(not(unix))]
    {
        false
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if !check_root_privileges() {
        error!("This application requires root privileges. Please run with sudo or as root.");
        process::exit(1);
    }

    let config_path = env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    info!("Loading configuration from {}", config_path.display());

    let config = Config::load(&config_path)
        .with_context(|| format!("could not load configuration from {}", config_path.display()))?;

    if config.probes.is_empty() && config.sender_probes.is_empty() {
        warn!("No probes configured. Wi-Fi interfaces on this system:");
        for interface in find_wifi_interfaces() {
            warn!("  {}", interface);
        }
    }

    let engine = Engine::from_config(config).context("could not build engine")?;

    let (stop_tx, mut stop_rx) = mpsc::unbounded_channel();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })
    .context("could not set Ctrl+C handler")?;

    engine.start().context("could not start engine")?;
    info!("Running (press Ctrl+C to stop)");

    stop_rx.recv().await;
    info!("Received Ctrl+C, shutting down...");
    engine.shutdown().await;

    Ok(())
}

fn find_wifi_interfaces() -> Vec<String> {
    match Device::list() {
        Ok(devices) => devices
            .into_iter()
            .map(|d| d.name)
            .filter(|name| name.starts_with("wlan") || name.contains("wl"))
            .collect(),
        Err(e) => {
            warn!("Could not list capture devices: {}", e);
            Vec::new()
        }
    }
}
