//! linecamd - line-scan capture daemon
//!
//! This daemon:
//! 1. Loads configuration (LINECAM_CONFIG file + environment)
//! 2. Owns a single capture session
//! 3. Serves the HTTP control surface until Ctrl-C

use anyhow::{anyhow, Result};
use clap::Parser;
use std::sync::mpsc;

use linecam::{
    api::{ApiConfig, ApiServer},
    config::LinecamConfig,
    Session,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Listen address (overrides config file and LINECAM_API_ADDR).
    #[arg(long)]
    addr: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = LinecamConfig::load()?;
    let mut api_config = ApiConfig::from(&config);
    if let Some(addr) = args.addr {
        api_config.addr = addr;
    }

    let session = Session::new().shared();
    let api_handle = ApiServer::new(api_config, session).spawn()?;
    log::info!("linecam control api listening on http://{}", api_handle.addr);
    log::info!(
        "preview clamp {}x{}, max frame payload {} bytes",
        config.preview.max_width,
        config.preview.max_height,
        config.max_body_bytes
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!("linecamd waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping control api...");
    api_handle.stop()?;

    Ok(())
}
