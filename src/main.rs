// stagehand CLI: generate, execute, and inspect work-unit batches

use clap::{Parser, Subcommand};
use stagehand::batch::{state, BatchOrchestrator, BatchReport};
use stagehand::{BatchState, SchedulerConfig};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "stagehand", version, about = "Batch work-unit scheduler")]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, global = true, env = "STAGEHAND_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parse a manifest and plan a batch: build the dependency graph,
    /// assign stages, and persist the staged batch state
    Generate {
        /// Manifest file (YAML, JSON, or Markdown)
        #[arg(long)]
        manifest: PathBuf,

        /// Batch id shared by every unit of this batch
        #[arg(long)]
        batch: u32,

        /// Repository the batch will run against
        #[arg(long, default_value = ".")]
        repo: PathBuf,

        /// State file path (default: <repo>/.stagehand/batch-<id>.json)
        #[arg(long)]
        state: Option<PathBuf>,
    },

    /// Execute a previously generated batch stage by stage
    Execute {
        /// Batch id to execute
        #[arg(long)]
        batch: u32,

        /// Repository the batch runs against
        #[arg(long, default_value = ".")]
        repo: PathBuf,

        /// State file path (default: <repo>/.stagehand/batch-<id>.json)
        #[arg(long)]
        state: Option<PathBuf>,
    },

    /// Show the stage layout a manifest would produce, without writing state
    Plan {
        /// Manifest file (YAML, JSON, or Markdown)
        #[arg(long)]
        manifest: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let config = match SchedulerConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Command::Generate {
            manifest,
            batch,
            repo,
            state: state_path,
        } => run_generate(&config, &manifest, batch, &repo, state_path),
        Command::Execute {
            batch,
            repo,
            state: state_path,
        } => run_execute(&config, batch, &repo, state_path).await,
        Command::Plan { manifest } => run_plan(&config, &manifest),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_generate(
    config: &SchedulerConfig,
    manifest: &PathBuf,
    batch_id: u32,
    repo: &PathBuf,
    state_path: Option<PathBuf>,
) -> Result<ExitCode, stagehand::SchedulerError> {
    let orchestrator = BatchOrchestrator::new(repo, config.clone());
    let batch_state = orchestrator.generate(manifest, batch_id)?;

    let path = state_path.unwrap_or_else(|| state::state_path(repo, batch_id));
    state::save_state(&path, &batch_state)?;

    println!(
        "Batch {} planned: {} unit(s) in {} stage(s)",
        batch_id,
        batch_state.units.len(),
        batch_state.stages.len()
    );
    print_stages(&batch_state);
    println!("State written to {}", path.display());
    Ok(ExitCode::SUCCESS)
}

async fn run_execute(
    config: &SchedulerConfig,
    batch_id: u32,
    repo: &PathBuf,
    state_path: Option<PathBuf>,
) -> Result<ExitCode, stagehand::SchedulerError> {
    let path = state_path.unwrap_or_else(|| state::state_path(repo, batch_id));
    let mut batch_state = state::load_state(&path)?;

    let orchestrator = BatchOrchestrator::new(repo, config.clone());
    let result = orchestrator.execute(&mut batch_state).await;

    // Persist outcomes even when the batch halted mid-way
    state::save_state(&path, &batch_state)?;

    match result {
        Ok(report) => {
            print!("{}", report);
            if report.all_merged() {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
        Err(e) => {
            print!("{}", BatchReport::from_state(&batch_state));
            Err(e)
        }
    }
}

fn run_plan(
    config: &SchedulerConfig,
    manifest: &PathBuf,
) -> Result<ExitCode, stagehand::SchedulerError> {
    let orchestrator = BatchOrchestrator::new(".", config.clone());
    let batch_state = orchestrator.generate(manifest, 0)?;
    print_stages(&batch_state);
    Ok(ExitCode::SUCCESS)
}

fn print_stages(batch_state: &BatchState) {
    for stage in &batch_state.stages {
        println!("  stage {}: {}", stage.index, stage.unit_ids.join(", "));
    }
}
