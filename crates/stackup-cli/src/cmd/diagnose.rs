use super::{load_config, runtime_or_unavailable, Exit, Globals};
use crate::output::print_json;
use clap::Args;
use stackup_core::orchestrator::Orchestrator;
use stackup_core::paths;
use stackup_core::readiness::{CancelToken, SystemClock};

#[derive(Args, Debug)]
pub struct DiagnoseArgs {
    /// Log lines to include per service and per log file
    #[arg(long, value_name = "N", env = "STACKUP_LOG_TAIL")]
    pub tail: Option<usize>,
}

/// Always writes the report. Exits non-zero when the primary service is not
/// healthy or any service has exited or is unhealthy.
pub fn run(g: &Globals, args: DiagnoseArgs) -> anyhow::Result<Exit> {
    let config = load_config(g)?;
    let runtime = runtime_or_unavailable(&config, &g.root);
    let clock = SystemClock::new();

    let report = Orchestrator::new(&config, &g.root, &*runtime, &clock, CancelToken::new())
        .with_tail(args.tail.unwrap_or(config.diagnostics.tail_lines))
        .diagnose();

    if g.json {
        print_json(&report)?;
    } else {
        print!("{report}");
    }

    let path = config.log_dir(&g.root).join(paths::DIAGNOSTICS_LOG);
    if report.has_problems() {
        let suspects = report.suspects();
        if !suspects.is_empty() {
            eprintln!("upstream services not ready: {}", suspects.join(", "));
        }
        eprintln!("problems found; report appended to {}", path.display());
        Ok(Exit::Failure)
    } else {
        eprintln!("report appended to {}", path.display());
        Ok(Exit::Success)
    }
}
