use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

use pixelwatch::config::Backend;
use pixelwatch::engine::block_on_with_grace;
use pixelwatch::{
    api, CommandProber, DisplayError, FrameBuffer, Monitor, MonitorConfig, NativeProber, Plan,
    Prober, Screen, Settings, TerminalScreen,
};

const NATIVE_PROBE_TIMEOUT: Duration = Duration::from_millis(3500);

#[derive(Debug, Parser)]
#[command(name = "pixelwatch", version, about = "Host health on an 8x8 pixel grid")]
struct Args {
    /// Host list: CSV rows, or a JSON document when the file ends in .json
    #[arg(short, long, default_value = "hosts.csv")]
    config: PathBuf,

    /// Probe in-process (ICMP + HTTP) instead of running ping/curl
    #[arg(long)]
    native: bool,

    /// Serve the status board as JSON on this port
    #[arg(long)]
    api_port: Option<u16>,

    /// Keep the grid in memory and only log it
    #[arg(long)]
    headless: bool,
}

/// Upper bound on how long shutdown waits for a message that is still scrolling.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

fn main() -> Result<()> {
    block_on_with_grace(run(), SHUTDOWN_GRACE).context("Failed to start async runtime")?
}

async fn run() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::INFO.into()))
        .with_writer(std::io::stderr)
        .init();

    info!(config = %args.config.display(), "Program started: loading host list");
    let mut config = MonitorConfig::load(&args.config)
        .with_context(|| format!("Invalid configuration in {}", args.config.display()))?;
    if args.native {
        config.settings.backend = Backend::Native;
    }
    if args.api_port.is_some() {
        config.settings.api_port = args.api_port;
    }

    let (plan, screen) = config
        .prepare(|settings| -> Result<Arc<dyn Screen>, DisplayError> {
            let (width, height) = (settings.grid_width, settings.grid_height);
            if args.headless {
                Ok(Arc::new(FrameBuffer::new(width, height)))
            } else {
                Ok(Arc::new(TerminalScreen::new(width, height)?))
            }
        })
        .with_context(|| format!("Failed to start with {}", args.config.display()))?;
    let settings = config.settings;

    info!(
        checks = plan.checks.len(),
        indicators = plan.indicators.len(),
        pixels = plan.pixels.len(),
        backend = ?settings.backend,
        "Configuration loaded"
    );

    match settings.backend {
        Backend::Command => launch(plan, &settings, CommandProber::new(), screen).await,
        Backend::Native => {
            let prober = NativeProber::new(NATIVE_PROBE_TIMEOUT)?;
            launch(plan, &settings, prober, screen).await
        }
    }
}

async fn launch<P: Prober>(
    plan: Plan,
    settings: &Settings,
    prober: P,
    screen: Arc<dyn Screen>,
) -> Result<()> {
    let monitor = Monitor::new(plan, settings, Arc::new(prober), screen);

    if let Some(port) = settings.api_port {
        let board = monitor.board();
        tokio::spawn(async move {
            if let Err(e) = api::start_server(port, board).await {
                error!("Status API stopped: {:#}", e);
            }
        });
    }

    tokio::select! {
        result = monitor.run() => {
            result.context("Monitor stopped")?;
            Ok(())
        }
        res = signal::ctrl_c() => {
            res.context("Failed to listen for shutdown signal")?;
            info!("Shutdown signal received. Stopping all loops...");
            Ok(())
        }
    }
}
