mod cmd;
mod output;
mod root;
mod signals;

use clap::{Parser, Subcommand};
use cmd::{
    diagnose::DiagnoseArgs, start::StartArgs, status::StatusArgs, update::UpdateArgs, Globals,
};
use stackup_core::StackError;
use std::path::PathBuf;

const EXIT_INTERRUPTED: i32 = 130;

#[derive(Parser)]
#[command(
    name = "stackup",
    about = "Idempotent build-and-launch orchestrator for a containerized stack",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from stackup.yaml or .git/)
    #[arg(long, global = true, env = "STACKUP_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// Container runtime binary (overrides runtime.binary)
    #[arg(long, global = true, value_name = "BIN", env = "STACKUP_DOCKER")]
    docker: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build stale images, start the stack and wait for the primary service
    Start(StartArgs),

    /// Rebuild every image, restart the stack and wait for the primary service
    Update(UpdateArgs),

    /// Collect a diagnostic report for the current stack
    Diagnose(DiagnoseArgs),

    /// Show per-service status and health
    Status(StatusArgs),

    /// Validate stackup.yaml and probe the container runtime
    Check,
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Start(_) | Commands::Update(_) => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let globals = Globals {
        root: root::resolve_root(cli.root.as_deref()),
        json: cli.json,
        docker: cli.docker,
    };

    let result = match cli.command {
        Commands::Start(args) => cmd::start::run(&globals, args, signals::listen()),
        Commands::Update(args) => cmd::update::run(&globals, args, signals::listen()),
        Commands::Diagnose(args) => cmd::diagnose::run(&globals, args),
        Commands::Status(args) => cmd::status::run(&globals, args),
        Commands::Check => cmd::check::run(&globals),
    };

    let code = match result {
        Ok(exit) => exit.code(),
        Err(e) => {
            // Print the full error chain (anyhow's alternate Display)
            eprintln!("error: {e:#}");
            match e.downcast_ref::<StackError>() {
                Some(StackError::Interrupted) => EXIT_INTERRUPTED,
                _ => 1,
            }
        }
    };
    std::process::exit(code);
}
