//! Serial bridge: relays trains on serial devices to the interlocking.
//!
//! One relay runs per enabled device in the configuration. A relay that
//! ends (device unplugged, server restarted) is retried after
//! `reconnect_delay_ms`.
//!
//! # Usage
//!
//! ```sh
//! RUST_LOG=info cargo run --bin serial_bridge -- --config bridge.json
//! ```
//!
//! ```json
//! {
//!   "host": "192.168.1.20",
//!   "port": 8001,
//!   "serial": [{ "enabled": true, "device": "/dev/rfcomm0", "baud": 9600 }]
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use log::{info, warn};
use tokio::net::TcpStream;
use tokio::task::JoinSet;

use rs_signalbox::link::{open_device, run_bridge};
use rs_signalbox::{BridgeConfig, SerialConfig};

#[derive(Debug, Parser)]
#[command(name = "serial_bridge", about = "Relay serial train units to the interlocking")]
struct Args {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

async fn relay_forever(serial: SerialConfig, server: String, delay: Duration) {
    let device = &serial.device;
    loop {
        match relay_once(&serial, &server).await {
            Ok(()) => info!("{device}: relay closed"),
            Err(e) => warn!("{device}: {e:#}"),
        }
        tokio::time::sleep(delay).await;
    }
}

async fn relay_once(serial_config: &SerialConfig, server: &str) -> anyhow::Result<()> {
    let device = &serial_config.device;
    let serial = open_device(device, serial_config.baud)
        .with_context(|| format!("opening {device} at {} baud", serial_config.baud))?;
    let network = TcpStream::connect(server).await?;
    network.set_nodelay(true)?;
    info!("{device}: connected to {server}");
    run_bridge(serial, network).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => BridgeConfig::load(path)?,
        None => BridgeConfig::default(),
    };
    let server = config.server_addr();
    let delay = Duration::from_millis(config.reconnect_delay_ms);

    let mut relays = JoinSet::new();
    for serial in config.serial.iter().filter(|s| s.enabled) {
        info!("bridging {} at {} baud to {server}", serial.device, serial.baud);
        relays.spawn(relay_forever(serial.clone(), server.clone(), delay));
    }
    if relays.is_empty() {
        anyhow::bail!("no enabled serial devices configured");
    }

    while let Some(result) = relays.join_next().await {
        result?;
    }
    Ok(())
}
