use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use cursus::engine::RunOutcome;
use cursus::errors::{EXIT_CONFIG, EXIT_ESCALATED, EXIT_OK, EngineError};

mod cmd;

#[derive(Parser)]
#[command(name = "cursus")]
#[command(version, about = "Phase-graph workflow orchestrator with quality gates")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Path to the workflow definition. If not provided, looks in
    /// .cursus/workflow.json and then for *.workflow.json in the project root.
    #[arg(long, global = true)]
    pub workflow: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the .cursus directory with a default workflow
    Init,
    /// Start a new run from the workflow's initial phase
    Start {
        /// Free-form description of the work, stored with the run
        #[arg(long)]
        brief: Option<String>,
    },
    /// Resume the persisted run from its current phase
    Resume,
    /// Reposition the persisted run onto a specific phase and continue
    Goto { phase: String },
    /// Show the persisted run state
    Status,
    /// List the phases of the workflow
    List,
    /// Discard the persisted run state (artifacts are kept)
    Reset {
        #[arg(long)]
        force: bool,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default cursus.toml file
    Init,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        tracing::Level::INFO
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .init();

    std::process::exit(run(cli).await);
}

async fn run(cli: Cli) -> i32 {
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => match std::env::current_dir().context("Failed to get current directory") {
            Ok(dir) => dir,
            Err(err) => return fail(&err.into()),
        },
    };

    match &cli.command {
        Commands::Init => exit_plain(cmd::cmd_init(&project_dir)),
        Commands::Start { brief } => exit_run(cmd::cmd_start(&cli, &project_dir, brief.clone()).await),
        Commands::Resume => exit_run(cmd::cmd_resume(&cli, &project_dir).await),
        Commands::Goto { phase } => exit_run(cmd::cmd_goto(&cli, &project_dir, phase).await),
        Commands::Status => exit_plain(cmd::cmd_status(&cli, &project_dir)),
        Commands::List => exit_plain(cmd::cmd_list(&cli, &project_dir)),
        Commands::Reset { force } => exit_plain(cmd::cmd_reset(&cli, &project_dir, *force)),
        Commands::Config { command } => exit_plain(cmd::cmd_config(&project_dir, command.clone())),
    }
}

/// Map an orchestration run onto the process exit contract: 0 when the
/// terminal phase was reached, 1 when a gate escalated, and the error's
/// own code otherwise.
fn exit_run(result: Result<RunOutcome, EngineError>) -> i32 {
    match result {
        Ok(RunOutcome::Complete) => EXIT_OK,
        Ok(RunOutcome::Escalated { .. }) => EXIT_ESCALATED,
        Err(err) => fail(&err),
    }
}

/// Non-run commands only distinguish success from configuration failure.
fn exit_plain(result: anyhow::Result<()>) -> i32 {
    match result {
        Ok(()) => EXIT_OK,
        Err(err) => {
            eprintln!("error: {err:#}");
            EXIT_CONFIG
        }
    }
}

fn fail(err: &EngineError) -> i32 {
    eprintln!("error: {err:#}");
    err.exit_code()
}
