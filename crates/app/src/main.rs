//! Surveillance panel entrypoint: loads the camera config, builds the
//! per-camera pipelines and the alert aggregator, and serves the read-only
//! HTTP status surface until shutdown.

use std::{
    fs,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context as _, Result};
use clap::Parser;
use crossbeam_channel::unbounded;
use tracing::{info, warn};

use sentinel::{
    alerts::AlertLog, config, context::Context, events, manager::CameraManager,
    pipeline::SharedDetector, server, telemetry,
};

#[derive(Debug, Parser)]
#[command(name = "sentinel", version, about = "Multi-camera surveillance analytics panel")]
struct Cli {
    /// Camera configuration file (default: <data-dir>/cameras.json).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Working directory for snapshots and logs (default: current directory).
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Port for the read-only HTTP status surface.
    #[arg(long, default_value_t = 8080)]
    http_port: u16,

    /// Exit automatically after this many seconds (useful for smoke runs).
    #[arg(long)]
    headless_duration: Option<u64>,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    telemetry::init();
    let cli = Cli::parse();

    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => std::env::current_dir().context("cannot determine working directory")?,
    };
    fs::create_dir_all(data_dir.join("snapshots"))
        .with_context(|| format!("cannot create snapshot directory under {}", data_dir.display()))?;
    fs::create_dir_all(data_dir.join("logs"))
        .with_context(|| format!("cannot create log directory under {}", data_dir.display()))?;

    let ctx = Context::system(data_dir.clone());
    let config_path = cli.config.unwrap_or_else(|| data_dir.join("cameras.json"));
    info!(path = %config_path.display(), "loading camera configuration");
    let configs = config::load_or_default(&config_path);

    // No detection backend ships with the binary; pipelines run the motion
    // paths and pick up a detector whenever one is installed via
    // `CameraPipeline::set_detector`.
    let detector: Option<SharedDetector> = None;
    info!("no detection backend configured; pipelines run motion-only");

    let (event_tx, event_rx) = unbounded();
    let alert_log = Arc::new(Mutex::new(AlertLog::new(ctx.clock.clone())));
    let router = events::spawn_alert_router(event_rx, alert_log.clone());

    let manager = Arc::new(CameraManager::new(
        ctx,
        config_path,
        configs,
        event_tx,
        detector,
    ));

    let server = server::spawn_status_server(cli.http_port, manager.clone(), alert_log.clone())?;
    info!(
        "status API available at http://localhost:{}/ping, /alerts, /cameras",
        cli.http_port
    );

    manager.start_all();
    wait_for_shutdown(cli.headless_duration);

    info!("shutting down");
    manager.stop_all();
    server.stop();
    drop(manager);
    let _ = router.join();
    info!("shutdown complete");
    Ok(())
}

/// Block until Ctrl+C, or until the optional headless deadline passes.
fn wait_for_shutdown(headless_duration: Option<u64>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_shutdown = shutdown.clone();
    if let Err(err) = ctrlc::set_handler(move || {
        handler_shutdown.store(true, Ordering::SeqCst);
    }) {
        warn!("failed to install Ctrl+C handler: {err}");
    }

    let deadline = headless_duration.map(|secs| Instant::now() + Duration::from_secs(secs));
    info!("running; press Ctrl+C to stop");

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                break;
            }
        }
        thread::sleep(Duration::from_millis(200));
    }
}
