use super::{load_config, report_outcome, run_failed, Exit, Globals};
use clap::Args;
use stackup_core::lock::RunLock;
use stackup_core::orchestrator::{Orchestrator, RunKind, UpdateOptions};
use stackup_core::readiness::{CancelToken, SystemClock};
use stackup_core::runtime::DockerCli;
use stackup_core::secret::SecretValue;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Seconds to wait for the primary service to report healthy
    #[arg(long, value_name = "SECS", env = "STACKUP_HEALTH_TIMEOUT")]
    pub timeout: Option<u64>,

    /// Cache directory handed to the staging step
    #[arg(long, value_name = "DIR", env = "STACKUP_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,
}

/// Rebuild every buildable image regardless of state, then relaunch.
pub fn run(g: &Globals, args: UpdateArgs, cancel: CancelToken) -> anyhow::Result<Exit> {
    let config = load_config(g)?;
    let _lock = RunLock::acquire(&g.root, RunKind::Update.as_str())?;

    let result = DockerCli::new(&config, &g.root).and_then(|runtime| {
        let clock = SystemClock::new();
        Orchestrator::new(&config, &g.root, &runtime, &clock, cancel)
            .with_secret(SecretValue::from_env(&config.secret.env))
            .with_cache_dir(args.cache_dir)
            .update(&UpdateOptions {
                timeout: args.timeout,
            })
    });

    match result {
        Ok(outcome) => report_outcome(&outcome, &config, &g.root, g.json),
        Err(e) => Err(run_failed(e, &config, &g.root, RunKind::Update)),
    }
}
