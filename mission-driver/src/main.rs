// src/main.rs

//! Host entry-point: drives a software UDEFX2 through the mission pipeline.
//!
//! 1. Parse arguments & configuration, set up structured logging
//! 2. Start the Prometheus exporter when `[metrics].listen` is set
//! 3. Attach the emulated device and bring the session to Active
//! 4. Submit every mission given on the command line, print responses
//! 5. Suspend, then surprise-remove the device and exit
//!
//! Usage: `udefx-host [--config <udefx.toml>] [mission ...]`

// ───── std / 3rd-party imports ──────────────────────────────────────────────
use anyhow::{Context, anyhow, bail};
use clap::Parser;
use futures::future::join_all;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::runtime::Runtime;

// ───── local imports ────────────────────────────────────────────────────────
use udefx::config::{self, Config};
use udefx::logging::setup_logging;
use udefx::sim::Udefx2Emulator;
use udefx::{DeviceSession, telemetry};

// ───── helpers ──────────────────────────────────────────────────────────────

/// Drive an emulated UDEFX2 through the mission pipeline.
#[derive(Parser, Debug)]
#[command(name = "udefx-host")]
#[command(about = "Submit missions to an emulated UDEFX2 and print the responses")]
struct Args {
    /// Configuration file (default: udefx.toml next to the executable)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Mission payloads, sent as UTF-8 bytes
    #[arg(default_value = "ping")]
    missions: Vec<String>,
}

/// Directory that contains the running executable.
fn exe_dir() -> anyhow::Result<PathBuf> {
    let exe = std::env::current_exe().context("cannot determine exe path")?;
    exe.parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| anyhow!("executable must live in some directory"))
}

/// Load `udefx.toml` if present, defaults otherwise.
fn load_config(path: &Path) -> anyhow::Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    config::load(path).with_context(|| format!("config {}", path.display()))
}

// ───── host logic ───────────────────────────────────────────────────────────

async fn run(cfg: Config, missions: Vec<String>) -> anyhow::Result<()> {
    // 2 ─ Metrics
    if let Some(listen) = cfg.metrics.listen {
        telemetry::install_exporter(listen).context("metrics exporter")?;
    }

    // 3 ─ Device arrival
    let device = Arc::new(Udefx2Emulator::spawn(cfg.emulator.clone()).context("emulator start")?);
    let session = DeviceSession::new(Arc::clone(&device), cfg.pipeline.clone(), cfg.capabilities);
    session.on_device_arrived()?;
    if cfg.capabilities.interface_property_data {
        log::info!("device interface restricted: {}", device.interface_restricted());
    }

    // 4 ─ Missions
    let handles = missions
        .into_iter()
        .map(|m| session.submit_mission(m.into_bytes()))
        .collect::<Result<Vec<_>, _>>()?;

    let mut failed = 0usize;
    for result in join_all(handles).await {
        match result {
            Ok(response) => println!("{}: {}", response.mission, String::from_utf8_lossy(&response.data)),
            Err(e) => {
                failed += 1;
                log::error!("mission failed: {e}");
            }
        }
    }

    // 5 ─ Teardown
    session.on_device_suspending().await?;
    log::info!("session after suspend: {:?}", session.snapshot());
    device.surprise_remove();
    session.on_device_removed();

    if failed > 0 {
        bail!("{failed} mission(s) failed");
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    // 1 ─ Context & logging
    let args = Args::parse();
    let base_dir = exe_dir()?;
    let config_path = args.config.clone().unwrap_or_else(|| base_dir.join("udefx.toml"));
    let cfg = load_config(&config_path)?;
    setup_logging(&base_dir, &cfg.logging).context("logging setup failed")?;
    log::info!("udefx host starting ({} mission(s))", args.missions.len());

    let rt = Runtime::new().context("tokio runtime creation failed")?;
    rt.block_on(run(cfg, args.missions))
}
