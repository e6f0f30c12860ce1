use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use coordination::PrivacyLevel;
use tracing::{info, warn};

use tidywatch_agents::config::{CONFIG_PATH_ENV, DEFAULT_CONFIG_FILE};
use tidywatch_agents::runtime::USAGE_PERSIST_INTERVAL;
use tidywatch_agents::{
    telemetry, AnalysisJob, FileConfigProvider, JobPayload, JobPriority, JsonlMetricsSink,
    LoggingTaskSink, Runtime, RuntimeConfig,
};

#[derive(Debug, Parser)]
#[command(name = "tidywatch", version, about = "Privacy-aware multi-provider room analysis")]
struct Cli {
    /// Engine configuration (TOML).
    #[arg(long, env = CONFIG_PATH_ENV, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Probe every provider once and print the reports.
    Health,
    /// Print circuit-breaker, score and usage state for every provider.
    Status,
    /// Analyze one zone now.
    Analyze {
        #[arg(long)]
        zone: String,
        /// Image file; captured from the snapshot directory when omitted.
        #[arg(long)]
        image: Option<PathBuf>,
        /// Override the configured privacy tier.
        #[arg(long, value_enum)]
        privacy: Option<PrivacyArg>,
    },
    /// Analyze zones on a schedule until interrupted.
    Watch {
        #[arg(long, value_delimiter = ',', required = true)]
        zones: Vec<String>,
        /// Seconds between rounds.
        #[arg(long, default_value_t = 900)]
        interval: u64,
    },
    /// Print the effective configuration.
    Config,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PrivacyArg {
    Raw,
    Sanitized,
    MetadataOnly,
    Local,
}

impl From<PrivacyArg> for PrivacyLevel {
    fn from(arg: PrivacyArg) -> Self {
        match arg {
            PrivacyArg::Raw => PrivacyLevel::Raw,
            PrivacyArg::Sanitized => PrivacyLevel::Sanitized,
            PrivacyArg::MetadataOnly => PrivacyLevel::MetadataOnly,
            PrivacyArg::Local => PrivacyLevel::Local,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();
    let cli = Cli::parse();

    let config = RuntimeConfig::load(&FileConfigProvider::new(&cli.config))?;
    info!(config = %cli.config.display(), "tidywatch starting");

    match cli.command {
        Command::Config => print_config(&config)?,
        command => execute(command, &config).await?,
    }
    Ok(())
}

fn print_config(config: &RuntimeConfig) -> Result<()> {
    println!(
        "{}",
        toml::to_string_pretty(&config.engine).context("Failed to render configuration")?
    );
    Ok(())
}

async fn execute(command: Command, config: &RuntimeConfig) -> Result<()> {
    let runtime = Runtime::build(
        config,
        Arc::new(LoggingTaskSink),
        Arc::new(JsonlMetricsSink::new(&config.metrics_path)),
    )?;

    match command {
        Command::Config => print_config(config)?,
        Command::Health => {
            let reports = runtime.health.check_all().await;
            println!("{}", serde_json::to_string_pretty(&reports)?);
        }
        Command::Status => {
            println!("{}", serde_json::to_string_pretty(&runtime.registry.snapshot_all())?);
        }
        Command::Analyze { zone, image, privacy } => {
            let payload = match image {
                Some(path) => JobPayload::Inline(
                    tokio::fs::read(&path)
                        .await
                        .with_context(|| format!("Failed to read image {}", path.display()))?,
                ),
                None => JobPayload::CaptureAtExecution,
            };
            let mut job = AnalysisJob::new(zone, JobPriority::Manual, payload);
            if let Some(level) = privacy {
                job = job.with_privacy(level.into());
            }
            let result = runtime.orchestrator.run(&job).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            runtime.shutdown().await;
            if !result.success {
                anyhow::bail!(
                    "analysis failed: {}",
                    result.processing_summary.validation_issues.join("; ")
                );
            }
        }
        Command::Watch { zones, interval } => {
            watch(
                &runtime,
                zones,
                Duration::from_secs(interval),
                config.engine.health.interval(),
            )
            .await
        }
    }
    Ok(())
}

async fn watch(runtime: &Runtime, zones: Vec<String>, interval: Duration, health_interval: Duration) {
    let queue = runtime.queue.clone();
    let cancel = queue.cancellation_token();
    queue.start().await;

    let health = runtime.health.clone();
    let health_cancel = cancel.clone();
    let health_task = tokio::spawn(async move { health.run(health_interval, health_cancel).await });

    let persister = runtime.persister.clone();
    let persist_cancel = cancel.clone();
    let persist_task = tokio::spawn(async move { persister.run(USAGE_PERSIST_INTERVAL, persist_cancel).await });

    info!(zones = ?zones, interval_secs = interval.as_secs(), "Watching zones");
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received, shutting down");
                break;
            }
            _ = ticker.tick() => {
                for zone in &zones {
                    let job = AnalysisJob::new(zone.clone(), JobPriority::Scheduled, JobPayload::CaptureAtExecution);
                    if let Err(e) = queue.enqueue(job) {
                        warn!(zone = %zone, error = %e, "Failed to enqueue scheduled job");
                    }
                }
            }
        }
    }

    runtime.shutdown().await;
    for task in [health_task, persist_task] {
        if let Err(e) = task.await {
            warn!(error = %e, "Background task ended abnormally");
        }
    }
}
