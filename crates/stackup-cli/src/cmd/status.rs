use super::{load_config, runtime_or_unavailable, Exit, Globals};
use crate::output::{print_json, print_table};
use clap::Args;
use stackup_core::orchestrator::{Orchestrator, StackStatus};
use stackup_core::readiness::{CancelToken, SystemClock};
use std::time::Duration;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Refresh every SECS seconds until interrupted
    #[arg(long, value_name = "SECS")]
    pub watch: Option<u64>,
}

pub fn run(g: &Globals, args: StatusArgs) -> anyhow::Result<Exit> {
    let config = load_config(g)?;
    let runtime = runtime_or_unavailable(&config, &g.root);
    let clock = SystemClock::new();
    let orch = Orchestrator::new(&config, &g.root, &*runtime, &clock, CancelToken::new());

    let Some(secs) = args.watch else {
        render(&orch.status(), g.json)?;
        return Ok(Exit::Success);
    };

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    rt.block_on(async {
        let mut ticker = tokio::time::interval(Duration::from_secs(secs.max(1)));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !g.json {
                        println!("\n-- {} --", chrono::Local::now().format("%H:%M:%S"));
                    }
                    render(&orch.status(), g.json)?;
                }
                _ = tokio::signal::ctrl_c() => break,
            }
        }
        Ok::<_, anyhow::Error>(())
    })?;
    Ok(Exit::Success)
}

fn render(status: &StackStatus, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(status);
    }
    let rows: Vec<Vec<String>> = status
        .services
        .iter()
        .map(|obs| {
            let name = if obs.service == status.primary {
                format!("{} *", obs.service)
            } else {
                obs.service.clone()
            };
            vec![
                name,
                obs.runtime_status.to_string(),
                obs.health.to_string(),
                obs.exit_code.map(|c| c.to_string()).unwrap_or_else(|| "-".into()),
                obs.restart_count.map(|c| c.to_string()).unwrap_or_else(|| "-".into()),
                if obs.image_present { "present" } else { "missing" }.to_string(),
            ]
        })
        .collect();
    print_table(&["SERVICE", "STATUS", "HEALTH", "EXIT", "RESTARTS", "IMAGE"], &rows);
    Ok(())
}
