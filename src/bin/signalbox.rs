//! Interlocking server.
//!
//! Runs the hardware link listener and the operator/administration web
//! server against one shared interlocking.
//!
//! # Usage
//!
//! ```sh
//! RUST_LOG=info cargo run --bin signalbox -- --config signalbox.config.json
//! ```
//!
//! Without `--config` the defaults apply: hardware link on port 8001,
//! operators on port 8080, state in `signalbox.json`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use log::{error, info};

use rs_signalbox::link::run_link_server;
use rs_signalbox::notify::Notifier;
use rs_signalbox::services::{run_server, WebServerConfig};
use rs_signalbox::store::JsonFileStore;
use rs_signalbox::{Config, Interlocking};

#[derive(Debug, Parser)]
#[command(name = "signalbox", about = "Signal-block interlocking controller")]
struct Args {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    let store = JsonFileStore::open(&config.store.path)
        .with_context(|| format!("opening store {}", config.store.path))?;
    let notifier = Notifier::new(config.server.notification_capacity);
    let interlocking = Arc::new(
        Interlocking::load(Arc::new(store), notifier, &config.server)
            .context("loading layout")?,
    );

    let link_addr = SocketAddr::from(([0, 0, 0, 0], config.server.controllers_port));
    let link = tokio::spawn(run_link_server(Arc::clone(&interlocking), link_addr));

    interlocking.record_startup();
    info!("signalbox started");

    let web = run_server(interlocking, WebServerConfig::from_config(&config.web));
    tokio::select! {
        result = web => result.context("operator server")?,
        result = link => match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("hardware link server stopped: {e}");
                return Err(e).context("hardware link server");
            }
            Err(e) => return Err(e).context("hardware link task"),
        },
    }
    Ok(())
}
