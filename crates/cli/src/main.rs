//! CLI entry point for the stream analyzer
//!
//! Parses command line arguments, sets up logging and runs the analyzer
//! until the stream ends, an executor aborts or Ctrl-C is pressed.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use stream_analyzer::{
    new_shared_metrics, run_metrics_server, run_startup_checks, AnalyzerError, Config,
    ExitReason, InferenceClient, KServeClient, LoggingProcessor, RawFrameReader, StreamAnalyzer,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Real-time stream analysis against a remote model server
#[derive(Parser, Debug)]
#[command(name = "stream-analyzer")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file; a missing file means defaults
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Stream source: `-` for stdin, a file/FIFO path, or tcp://host:port
    #[arg(long)]
    stream_url: Option<String>,

    /// Model server base URL
    #[arg(long)]
    endpoint: Option<String>,

    #[arg(long)]
    model_name: Option<String>,

    /// Model version, 0 for the latest
    #[arg(long)]
    model_version: Option<u64>,

    /// Number of inference executors
    #[arg(long)]
    executors: Option<u32>,

    /// Capacity of the input and output queues
    #[arg(long)]
    buffer_size: Option<u32>,

    /// Send frames JPEG-encoded instead of as FP32 tensors
    #[arg(long)]
    binary_input: bool,

    /// Log level when RUST_LOG is not set
    #[arg(long)]
    log_level: Option<String>,

    /// Skip the model readiness probe
    #[arg(long)]
    skip_checks: bool,
}

impl Args {
    fn apply(&self, cfg: &mut Config) {
        if let Some(url) = &self.stream_url {
            cfg.stream.url = url.clone();
        }
        if let Some(endpoint) = &self.endpoint {
            cfg.inference.endpoint = endpoint.clone();
        }
        if let Some(name) = &self.model_name {
            cfg.inference.model_name = name.clone();
        }
        if let Some(version) = self.model_version {
            cfg.inference.model_version = version;
        }
        if let Some(executors) = self.executors {
            cfg.pipeline.executors = executors;
        }
        if let Some(buffer_size) = self.buffer_size {
            cfg.pipeline.buffer_size = buffer_size;
        }
        if self.binary_input {
            cfg.inference.binary_input = true;
        }
        if let Some(level) = &self.log_level {
            cfg.logging.level = level.clone();
        }
    }
}

/// Load the config file (missing means defaults), then apply env and flags
fn load_config(args: &Args) -> Result<Config, AnalyzerError> {
    let mut config = Config::load_or_default(&args.config)?;
    args.apply(&mut config);
    Ok(config)
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(config: Config, skip_checks: bool) -> Result<ExitReason, AnalyzerError> {
    let client = Arc::new(KServeClient::from_config(&config.inference)?);
    if skip_checks {
        warn!("Skipping model readiness probe (--skip-checks enabled)");
    }
    run_startup_checks(&config, client.as_ref(), !skip_checks).await?;

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, shutting down");
                interrupt.cancel();
            }
            Err(e) => warn!(error = %e, "Cannot listen for Ctrl-C"),
        }
    });

    let metrics = new_shared_metrics();
    let server_stop = CancellationToken::new();
    let server = config.metrics.enabled.then(|| {
        let metrics = metrics.clone();
        let bind = config.metrics.bind.clone();
        let stop = server_stop.clone();
        tokio::spawn(async move {
            if let Err(e) = run_metrics_server(metrics, &bind, stop).await {
                error!(error = %e, "Metrics server error");
            }
        })
    });

    let client: Arc<dyn InferenceClient> = client;
    let mut analyzer = StreamAnalyzer::from_config(
        &config,
        RawFrameReader::from_config(&config.stream),
        LoggingProcessor::new(),
        client,
        metrics,
    );
    let outcome = analyzer.run(cancel).await;

    server_stop.cancel();
    if let Some(server) = server {
        let _ = server.await;
    }
    outcome
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&config.logging.level);

    info!(
        config = %args.config.display(),
        stream = %config.stream.url,
        endpoint = %config.inference.endpoint,
        model = %config.inference.model_name,
        "Stream analyzer starting"
    );

    match run(config, args.skip_checks).await {
        Ok(ExitReason::Cancelled) => ExitCode::SUCCESS,
        Ok(reason) => {
            error!(?reason, "Stream analyzer stopped");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!(error = %e, "Stream analyzer failed");
            ExitCode::FAILURE
        }
    }
}
