use super::{load_config, Exit, Globals};
use crate::output::print_json;
use anyhow::Context;
use stackup_core::config::WarnLevel;
use stackup_core::decision::select_strategy;
use stackup_core::launch::launch_order;
use stackup_core::runtime::{ContainerRuntime, DockerCli};
use stackup_core::secret::SecretValue;

/// Validate `stackup.yaml`, the compose file and the container runtime
/// without building or starting anything.
pub fn run(g: &Globals) -> anyhow::Result<Exit> {
    let config = load_config(g)?;
    let mut warnings = config.validate().context("invalid stackup.yaml")?;
    warnings.extend(config.check_paths(&g.root));
    let order: Vec<String> = launch_order(&config.services)?
        .into_iter()
        .map(|s| s.name.clone())
        .collect();

    let compose = config.compose_path(&g.root);
    let compose_ok = compose.exists();

    let runtime: Result<DockerCli, String> = DockerCli::new(&config, &g.root)
        .map_err(|e| e.to_string())
        .and_then(|rt| rt.ping().map(|()| rt).map_err(|e| e.to_string()));
    let strategy = runtime.as_ref().ok().map(|rt| select_strategy(rt).as_str());
    let secret_set = SecretValue::from_env(&config.secret.env).is_some();

    if g.json {
        print_json(&serde_json::json!({
            "warnings": warnings,
            "launch_order": order,
            "compose_file": { "path": compose, "exists": compose_ok },
            "runtime": match &runtime {
                Ok(_) => serde_json::json!({ "available": true }),
                Err(e) => serde_json::json!({ "available": false, "error": e }),
            },
            "secret": {
                "variable": config.secret.env,
                "set": secret_set,
                "strategy": strategy,
            },
        }))?;
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
        println!("launch order: {}", order.join(" -> "));
        if compose_ok {
            println!("compose file: {}", compose.display());
        } else {
            println!("compose file: missing ({})", compose.display());
        }
        match &runtime {
            Ok(_) => println!("runtime: available"),
            Err(e) => println!("runtime: {e}"),
        }
        println!(
            "secret: {} {} (strategy: {})",
            config.secret.env,
            if secret_set { "set" } else { "not set" },
            strategy.unwrap_or("unknown")
        );
    }

    let has_errors = warnings.iter().any(|w| w.level == WarnLevel::Error);
    if has_errors || !compose_ok || runtime.is_err() {
        eprintln!("error: check failed");
        return Ok(Exit::Failure);
    }
    Ok(Exit::Success)
}
