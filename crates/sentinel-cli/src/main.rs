//! Sentinel
//!
//! Scores documents for AI-generated text with a local transformer
//! classifier, reporting a probability per paragraph and for the whole
//! document.

use anyhow::Result;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusHandle;
use sentinel_classifiers::{resolve_model_dir, CandleModelLoader, ModelRuntime, SystemDeviceProbe};
use sentinel_core::DevicePreference;
use sentinel_engine::{ScoringEngine, TaskHandle, TaskScheduler, TaskStatus};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

mod output;
mod settings;

use output::Outcome;

#[derive(Parser, Debug)]
#[command(name = "sentinel")]
#[command(about = "Estimate how likely each paragraph of a document is AI-generated", long_about = None)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "sentinel.yaml")]
    config: PathBuf,

    /// Model checkpoint directory
    #[arg(short, long, env = "SENTINEL_MODEL_DIR")]
    model_dir: Option<PathBuf>,

    /// Execution device: auto, cpu, cuda or metal
    #[arg(short, long, env = "SENTINEL_DEVICE")]
    device: Option<DevicePreference>,

    /// Maximum content tokens per window
    #[arg(long)]
    max_tokens: Option<usize>,

    /// Fraction of each window shared with the next one
    #[arg(long)]
    overlap: Option<f32>,

    /// Initial inference batch size
    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Cancel a document after this many seconds
    #[arg(long)]
    time_budget: Option<u64>,

    /// Logit temperature applied before softmax
    #[arg(long)]
    temperature: Option<f32>,

    /// Paragraphs shorter than this are left out of the document score
    #[arg(long)]
    min_paragraph_tokens: Option<usize>,

    /// Only blank lines separate paragraphs in plain text
    #[arg(long)]
    blank_line_paragraphs: bool,

    /// Print reports as JSON
    #[arg(long)]
    json: bool,

    /// Dump Prometheus metrics to stderr on exit
    #[arg(long)]
    metrics: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Documents to score (.txt, .md, .docx, .pdf)
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose);
    let metrics_handle = init_metrics()?;

    let config = settings::load(&cli)?;
    let model_dir = resolve_model_dir(config.model_dir.as_deref());
    info!(model_dir = %model_dir.display(), device = ?config.device, "Configuration loaded");

    let loader = CandleModelLoader::new(&model_dir)
        .with_max_tokens(config.max_tokens)
        .with_temperature(config.temperature);
    let runtime =
        ModelRuntime::new(Arc::new(loader), Arc::new(SystemDeviceProbe), &config).into_handle();
    let engine = ScoringEngine::new(runtime, config)?;
    let scheduler = TaskScheduler::new(engine);

    let tasks: Vec<(PathBuf, TaskHandle)> = cli
        .files
        .iter()
        .map(|path| (path.clone(), scheduler.submit_path(path)))
        .collect();
    info!(files = tasks.len(), "Submitted documents");

    let handles: Vec<TaskHandle> = tasks.iter().map(|(_, handle)| handle.clone()).collect();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupt received, cancelling remaining documents");
                handles.iter().for_each(TaskHandle::cancel);
            }
            Err(e) => warn!(error = %e, "Failed to install Ctrl+C handler"),
        }
    });

    let mut outcomes = Vec::with_capacity(tasks.len());
    for (path, handle) in &tasks {
        let status = wait_with_progress(path, handle).await;
        outcomes.push(Outcome::new(path, &status));
    }
    scheduler.shutdown().await;

    if cli.json {
        println!("{}", output::render_json(&outcomes)?);
    } else {
        print!("{}", output::render_text(&outcomes));
    }

    if cli.metrics {
        eprintln!("{}", metrics_handle.render());
    }

    let failed = outcomes.iter().filter(|o| !o.succeeded()).count();
    if failed > 0 {
        anyhow::bail!("{} of {} documents were not scored", failed, outcomes.len());
    }
    Ok(())
}

/// Wait for a task while logging its progress
async fn wait_with_progress(path: &Path, handle: &TaskHandle) -> TaskStatus {
    let done = handle.wait();
    tokio::pin!(done);

    let mut ticker = tokio::time::interval(Duration::from_secs(2));
    ticker.tick().await;

    loop {
        tokio::select! {
            status = &mut done => {
                debug!(file = %path.display(), status = status.label(), "Task finished");
                return status;
            }
            _ = ticker.tick() => {
                if let TaskStatus::Running(progress) = handle.poll() {
                    info!(
                        file = %path.display(),
                        windows = progress.windows_done,
                        total = progress.windows_total,
                        "Scoring {:.0}%",
                        progress.fraction() * 100.0
                    );
                }
            }
        }
    }
}

/// Initialize tracing/logging
fn init_tracing(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("sentinel=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sentinel=info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Install the Prometheus recorder and describe the scoring metrics
fn init_metrics() -> Result<PrometheusHandle> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install metrics: {}", e))?;

    metrics::describe_counter!("sentinel_runs_total", "Scoring runs by outcome");
    metrics::describe_histogram!(
        "sentinel_run_duration_seconds",
        metrics::Unit::Seconds,
        "Wall time of completed scoring runs"
    );
    metrics::describe_counter!("sentinel_windows_scored_total", "Windows sent to the model");
    metrics::describe_counter!("sentinel_batches_total", "Inference batches executed");
    metrics::describe_counter!(
        "sentinel_inference_retries_total",
        "Batches retried at a smaller size"
    );
    metrics::describe_counter!("sentinel_model_loads_total", "Model loads by device");

    Ok(handle)
}
