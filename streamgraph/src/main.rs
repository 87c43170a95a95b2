//! `streamgraph` command line.
//!
//! ```text
//! streamgraph run --config streamgraph.toml [--drain]
//! streamgraph transform --file events.jsonl
//! ```
//!
//! Exit codes: 0 on normal shutdown, 1 when the pipeline cannot start, 2 when
//! at least one partition halted.

use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use streamgraph::codec::JsonCodec;
use streamgraph::config::PipelineConfig;
use streamgraph::events::LoggingEventSink;
use streamgraph::model::Record;
use streamgraph::observability::init_tracing;
use streamgraph::pipeline::{Pipeline, PipelineReport};
use streamgraph::source::{CheckpointStore, FileCheckpointStore, FileLog, MemoryCheckpointStore};
use streamgraph::store::MemoryGraphStore;
use streamgraph::transform::Transformer;

const EXIT_STARTUP: u8 = 1;
const EXIT_HALTED: u8 = 2;

#[derive(Parser)]
#[command(name = "streamgraph", version, about = "Ingest partitioned event logs into named graphs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline until interrupted
    Run(RunArgs),
    /// Print the graph documents for a file of payloads, one per line
    Transform(TransformArgs),
}

#[derive(Args, Clone, Debug)]
struct RunArgs {
    /// Path to the TOML config file
    #[arg(long, default_value = "streamgraph.toml", env = "STREAMGRAPH_CONFIG")]
    config: PathBuf,

    /// Stop each partition once it has nothing left to read
    #[arg(long)]
    drain: bool,
}

#[derive(Args, Clone, Debug)]
struct TransformArgs {
    /// File with one payload per line
    #[arg(long)]
    file: PathBuf,

    /// Content type of the payloads
    #[arg(long, default_value = "application/json")]
    content_type: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Transform(args) => match transform(&args) {
            Ok(true) => ExitCode::SUCCESS,
            Ok(false) => ExitCode::from(EXIT_HALTED),
            Err(e) => {
                eprintln!("Error: {e:#}");
                ExitCode::from(EXIT_STARTUP)
            }
        },
    }
}

async fn run(args: RunArgs) -> ExitCode {
    let config = match PipelineConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::from(EXIT_STARTUP);
        }
    };
    if let Err(e) = init_tracing(&config.log) {
        eprintln!("Error: {e}");
        return ExitCode::from(EXIT_STARTUP);
    }
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        "streamgraph starting"
    );

    match serve(&config, args.drain).await {
        Ok(report) if report.has_halted() => {
            for halted in report.halted() {
                error!(partition = halted.partition, reason = %halted.reason, "Partition halted");
            }
            ExitCode::from(EXIT_HALTED)
        }
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Pipeline failed to start");
            ExitCode::from(EXIT_STARTUP)
        }
    }
}

async fn serve(config: &PipelineConfig, drain: bool) -> anyhow::Result<PipelineReport> {
    let checkpoints: Arc<dyn CheckpointStore> = match &config.checkpoint.path {
        Some(path) => Arc::new(
            FileCheckpointStore::open(path)
                .await
                .with_context(|| format!("opening checkpoint file '{}'", path.display()))?,
        ),
        None => {
            warn!("No checkpoint file configured, progress will not survive a restart");
            Arc::new(MemoryCheckpointStore::new())
        }
    };

    let store = match &config.store.snapshot {
        Some(path) => MemoryGraphStore::with_snapshot(path)
            .await
            .with_context(|| format!("opening graph store snapshot '{}'", path.display()))?,
        None => MemoryGraphStore::new(),
    };

    let log = FileLog::new(&config.source.broker, &config.source.topic)
        .with_group(&config.source.group)
        .with_checkpoints(checkpoints)
        .with_poll_interval(Duration::from_millis(config.source.poll_interval_ms));

    let transformer = Transformer::new(Arc::new(JsonCodec::new()))
        .with_vocabulary(&config.transform.vocabulary)
        .with_default_content_type(&config.transform.content_type);

    let mut settings = config.driver_settings();
    settings.exit_on_idle = drain;

    let mut pipeline = Pipeline::new(Arc::new(log), Arc::new(store))
        .with_transformer(transformer)
        .with_settings(settings)
        .with_start(config.source.start)
        .with_events(Arc::new(LoggingEventSink::default()));
    if let Some(consumers) = config.source.consumers {
        pipeline = pipeline.with_consumers(consumers);
    }
    if let Some(partitions) = &config.source.partitions {
        pipeline = pipeline.with_partitions(partitions.clone());
    }

    let shutdown = pipeline.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.cancel("interrupt signal");
        }
    });

    pipeline
        .run()
        .await
        .with_context(|| format!("opening topic '{}'", config.source.topic))
}

/// Writes each line's document as N-Triples followed by its digest.
/// Returns false if any line failed to transform.
fn transform(args: &TransformArgs) -> anyhow::Result<bool> {
    let content = std::fs::read_to_string(&args.file)
        .with_context(|| format!("reading '{}'", args.file.display()))?;
    let transformer = Transformer::default().with_default_content_type(&args.content_type);

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut all_ok = true;

    for (line, payload) in content.lines().enumerate() {
        if payload.trim().is_empty() {
            continue;
        }
        let record = Record::new(0, line as u64, payload, Utc::now());
        match transformer.transform(&record) {
            Ok(document) => {
                write!(out, "{}", document.to_ntriples())?;
                writeln!(out, "# line {} sha256 {}", line + 1, document.digest())?;
            }
            Err(e) => {
                all_ok = false;
                eprintln!("line {}: {e}", line + 1);
            }
        }
    }
    Ok(all_ok)
}
