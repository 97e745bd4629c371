pub mod check;
pub mod diagnose;
pub mod start;
pub mod status;
pub mod update;

use crate::output::{print_failure_tail, print_json};
use anyhow::Context;
use stackup_core::config::Config;
use stackup_core::decision::DecisionSummary;
use stackup_core::orchestrator::{RunKind, RunOutcome};
use stackup_core::paths;
use stackup_core::runtime::{ContainerRuntime, DockerCli, UnavailableRuntime};
use stackup_core::StackError;
use std::path::{Path, PathBuf};

/// Flags shared by every subcommand.
pub struct Globals {
    pub root: PathBuf,
    pub json: bool,
    /// Runtime binary override (`--docker` / `STACKUP_DOCKER`).
    pub docker: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Success,
    Failure,
    TimedOut,
}

impl Exit {
    pub fn code(self) -> i32 {
        match self {
            Exit::Success => 0,
            Exit::Failure => 1,
            Exit::TimedOut => 3,
        }
    }
}

pub fn load_config(g: &Globals) -> anyhow::Result<Config> {
    let mut config = Config::load(&g.root).context("failed to load stackup.yaml")?;
    if let Some(bin) = &g.docker {
        config.runtime.binary = bin.clone();
    }
    Ok(config)
}

/// Read-only commands keep going without a runtime binary.
pub fn runtime_or_unavailable(config: &Config, root: &Path) -> Box<dyn ContainerRuntime> {
    match DockerCli::new(config, root) {
        Ok(docker) => Box::new(docker),
        Err(e) => {
            tracing::warn!(error = %e, "container runtime not available");
            Box::new(UnavailableRuntime::new(e.to_string()))
        }
    }
}

/// Print the outcome of a `start`/`update` run that reached the gate.
pub fn report_outcome(outcome: &RunOutcome, config: &Config, root: &Path, json: bool) -> anyhow::Result<Exit> {
    if json {
        print_json(outcome)?;
    } else {
        match outcome.summary {
            DecisionSummary::NoServices => println!("no services declared"),
            DecisionSummary::SkippingRebuild => println!("skipping rebuild: all images current"),
            DecisionSummary::Rebuild { count } => {
                let built = if outcome.built.is_empty() {
                    "none (pull-only)".to_string()
                } else {
                    outcome.built.join(", ")
                };
                println!("{count} service(s) marked for rebuild; built: {built}");
            }
        }
        println!("started: {}", outcome.started.join(", "));
    }

    let r = &outcome.readiness;
    if r.is_ready() {
        if !json {
            println!("{} is healthy after {:.1}s", r.service, r.elapsed_seconds);
        }
        return Ok(Exit::Success);
    }

    if !json {
        if let Some(report) = &outcome.diagnostics {
            println!("{report}");
        }
    }
    eprintln!(
        "error: {} did not become healthy after {:.0}s (last health: {})",
        r.service, r.elapsed_seconds, r.last_health
    );
    eprintln!(
        "diagnostics appended to {}",
        config.log_dir(root).join(paths::DIAGNOSTICS_LOG).display()
    );
    print_failure_tail(&outcome.log, config.diagnostics.tail_lines);
    Ok(Exit::TimedOut)
}

/// Print the relevant log tail for a failed run and wrap the error.
pub fn run_failed(err: StackError, config: &Config, root: &Path, kind: RunKind) -> anyhow::Error {
    let log = match &err {
        StackError::ConfigNotFound(_)
        | StackError::InvalidConfig(_)
        | StackError::UnknownDependency { .. }
        | StackError::DependencyCycle(_)
        | StackError::AlreadyRunning { .. } => None,
        StackError::Build { .. } => Some(config.log_dir(root).join(paths::BUILD_LOG)),
        _ => Some(config.log_dir(root).join(kind.log_name())),
    };
    if let Some(log) = log {
        print_failure_tail(&log, config.diagnostics.tail_lines);
    }
    anyhow::Error::new(err).context(format!("{} failed", kind.as_str()))
}
