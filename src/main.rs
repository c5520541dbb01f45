// src/main.rs - Stream one G-code program to a serial printer
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use krusty_printjob::{config, CommandChannel, EventBroadcaster, JobEvent, JobState, Printer, SerialDevice};

#[derive(Parser, Debug)]
#[command(name = "printer-host", version, about = "Print a G-code file on a serial 3D printer")]
struct Cli {
    /// Printer configuration file
    #[arg(short, long, default_value = "printer.toml")]
    config: PathBuf,
    /// G-code program to print
    program: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    tracing::info!("Starting krusty print host v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Loading configuration from: {}", cli.config.display());

    let config = config::load_config(&cli.config).map_err(|e| {
        tracing::error!("Failed to load config from '{}': {}", cli.config.display(), e);
        Box::new(e) as Box<dyn std::error::Error + Send + Sync + 'static>
    })?;

    let device = SerialDevice::open(&config.printer.name, &config.serial.port, config.serial.baud)?;
    let channel: Arc<dyn CommandChannel> = device.clone();
    let printer = Printer::new(&config.printer.name, channel, config.job.clone());
    let (broadcaster, mut events) = EventBroadcaster::new(256);
    printer.subscribe(Arc::new(broadcaster));

    let job_name = cli
        .program
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| cli.program.display().to_string());
    let job = printer.submit_job(&job_name, &cli.program, true)?;

    let mut last_percent = None;
    let outcome: Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("Interrupted, stopping print job");
                printer.modify_job(JobState::Stopped)?;
                break Err("print job interrupted".into());
            }
            event = events.recv() => match event {
                Ok(JobEvent::Progress { position }) => {
                    let (_, total) = job.progress();
                    let percent = if total == 0 { 100 } else { position * 100 / total };
                    if last_percent != Some(percent) {
                        last_percent = Some(percent);
                        tracing::info!("Progress: {}% ({}/{} bytes, {}s)", percent, position, total, job.elapsed().as_secs());
                    }
                }
                Ok(JobEvent::StateChanged { state: JobState::Done, .. }) => {
                    tracing::info!("Print job '{}' done in {}s", job.name(), job.elapsed().as_secs());
                    break Ok(());
                }
                Ok(JobEvent::StateChanged { state: JobState::Error, error }) => {
                    break Err(error.into());
                }
                Ok(JobEvent::StateChanged { state, .. }) => tracing::info!("Print job state: {}", state),
                Err(RecvError::Lagged(skipped)) => tracing::warn!("Missed {} job events", skipped),
                Err(RecvError::Closed) => break Err("job event channel closed".into()),
            }
        }
    };

    if device.is_connected() {
        if let Err(e) = device.sync(Duration::from_secs(30)).await {
            tracing::warn!("Printer did not confirm final commands: {}", e);
        }
    }
    outcome
}
