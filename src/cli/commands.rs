//! CLI command definitions for fieldforge.
//!
//! Commands map one-to-one onto the roles of the queue: `status` reads a
//! snapshot, `produce` runs the queue-aware producer, `work` runs a
//! consumer batch, and `evolve` runs one learning round. `init` creates
//! the directory layout and a starter wrapper template.

use clap::Parser;
use tracing::info;

use crate::calibration::{Calibrator, HttpTransport};
use crate::config::{CalibrationConfig, EvolutionConfig, QueueConfig};
use crate::evolution::EvolutionLoop;
use crate::logs::{CostSummary, JsonlLog};
use crate::queue::{
    Consumer, Producer, QueueManager, QueueMonitor, RemotePromptGenerator, TopicPool,
};
use crate::store::JobStore;

/// Starter wrapper template written by `init` when none exists.
const DEFAULT_WRAPPER: &str = "\
You are a calibration analyst. Analyze the text below and answer in six
numbered sections, exactly in this order:

1. DRIFT:
2. BACKGROUND PATTERN:
3. PRESSURE FACTORS:
4. DEPTH:
5. IMPACT:
6. PLAIN TEXT:

Text to analyze:

";

/// Filesystem-backed calibration queue for LLM field extraction.
#[derive(Parser)]
#[command(name = "fieldforge")]
#[command(about = "Generate, calibrate and score structured field extractions")]
#[command(version)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Create the queue directory layout and a starter wrapper template.
    Init,

    /// Print a queue snapshot, the production directive, and system health.
    Status,

    /// Check the queue and produce prompts if it needs them.
    #[command(alias = "prod")]
    Produce(ProduceArgs),

    /// Run a worker batch: claim jobs and calibrate them.
    Work(WorkArgs),

    /// Run one learning round: learn from processed jobs, produce with
    /// the learned bias, archive the sample.
    Evolve,

    /// Summarize the append-only cost log.
    Costs,
}

/// Arguments for `fieldforge produce`.
#[derive(Parser, Debug)]
pub struct ProduceArgs {
    /// Produce the base batch regardless of queue state.
    #[arg(long)]
    pub force: bool,

    /// Override the base batch size.
    #[arg(short = 'n', long)]
    pub batch_size: Option<usize>,
}

/// Arguments for `fieldforge work`.
#[derive(Parser, Debug)]
pub struct WorkArgs {
    /// Maximum jobs to handle in this batch.
    #[arg(short = 'n', long, default_value = "20")]
    pub max_jobs: usize,

    /// Worker identifier for logging (default: pid-based).
    #[arg(long)]
    pub worker_id: Option<String>,

    /// Wrapper template name to calibrate with.
    #[arg(short, long)]
    pub wrapper: Option<String>,
}

/// Parses CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Runs the parsed CLI command.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let queue_config = QueueConfig::from_env()?;
    let store = JobStore::new(queue_config.root.clone());

    match cli.command {
        Commands::Init => {
            store.ensure_layout()?;
            let calibration_config = CalibrationConfig::from_env()?;
            std::fs::create_dir_all(&calibration_config.wrapper_dir)?;
            let wrapper_path = calibration_config
                .wrapper_dir
                .join(format!("wrapper_{}.txt", calibration_config.wrapper_name));
            if !wrapper_path.exists() {
                std::fs::write(&wrapper_path, DEFAULT_WRAPPER)?;
                info!(path = %wrapper_path.display(), "Wrote starter wrapper template");
            }
            println!("Initialized queue at {}", store.root().display());
        }

        Commands::Status => {
            let monitor = monitor_for(&store, &queue_config);
            let manager = manager_for(&queue_config);
            let snapshot = monitor.snapshot()?;
            let directive = manager.decide(&snapshot);
            let health = manager.health(&snapshot);

            let status = serde_json::json!({
                "timestamp": snapshot.taken_at.to_rfc3339(),
                "queue": {
                    "incoming": snapshot.incoming,
                    "processing": snapshot.processing,
                    "processed": snapshot.processed,
                    "error": snapshot.error,
                },
                "state": snapshot.health,
                "producer": {
                    "should_run": directive.should_produce,
                    "batch_size": directive.batch_size,
                },
                "health": health,
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
        }

        Commands::Produce(args) => {
            store.ensure_layout()?;
            let mut queue_config = queue_config;
            if let Some(batch) = args.batch_size {
                queue_config.base_batch_size = batch;
            }
            let calibration_config = CalibrationConfig::from_env()?;

            let producer = Producer::new(
                store.clone(),
                monitor_for(&store, &queue_config),
                manager_for(&queue_config),
            )
            .with_cost_log(JsonlLog::new(queue_config.cost_log.clone()));

            let generator = RemotePromptGenerator::new(
                calibration_config.clone(),
                HttpTransport::from_config(&calibration_config),
            );

            let report = producer
                .run(&generator, &TopicPool::default(), None, args.force)
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Work(args) => {
            store.ensure_layout()?;
            let mut calibration_config = CalibrationConfig::from_env()?;
            if let Some(wrapper) = args.wrapper {
                calibration_config.wrapper_name = wrapper;
            }

            let transport = HttpTransport::from_config(&calibration_config);
            let calibrator = Calibrator::new(calibration_config, transport)?;
            let mut consumer = Consumer::new(store.clone(), calibrator);
            if let Some(worker_id) = args.worker_id {
                consumer = consumer.with_worker_id(worker_id);
            }

            let report = consumer.run_batch(args.max_jobs).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Evolve => {
            store.ensure_layout()?;
            let calibration_config = CalibrationConfig::from_env()?;
            let evolution_config = EvolutionConfig::from_env()?;

            let producer = Producer::new(
                store.clone(),
                monitor_for(&store, &queue_config),
                manager_for(&queue_config),
            )
            .with_cost_log(JsonlLog::new(queue_config.cost_log.clone()));

            let generator = RemotePromptGenerator::new(
                calibration_config.clone(),
                HttpTransport::from_config(&calibration_config),
            );

            let evolution = EvolutionLoop::new(store.clone(), evolution_config);
            let report = evolution
                .run(&producer, &generator, &TopicPool::default())
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Costs => {
            let log = JsonlLog::new(queue_config.cost_log.clone());
            let summary = CostSummary::from_log(&log)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}

fn monitor_for(store: &JobStore, config: &QueueConfig) -> QueueMonitor {
    QueueMonitor::new(store.clone(), config.min_threshold, config.max_threshold)
}

fn manager_for(config: &QueueConfig) -> QueueManager {
    QueueManager::new(config.base_batch_size, config.error_warning_ceiling)
}
