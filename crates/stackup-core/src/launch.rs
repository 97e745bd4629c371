use crate::config::ServiceConfig;
use crate::error::{Result, StackError};
use crate::readiness::CancelToken;
use crate::runtime::ContainerRuntime;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

/// Order services so every dependency precedes its dependents. Services
/// that become startable at the same time go by declared `order`, then name.
pub fn launch_order(services: &[ServiceConfig]) -> Result<Vec<&ServiceConfig>> {
    let by_name: HashMap<&str, &ServiceConfig> =
        services.iter().map(|s| (s.name.as_str(), s)).collect();

    let mut pending: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for svc in services {
        for dep in &svc.depends_on {
            if !by_name.contains_key(dep.as_str()) {
                return Err(StackError::UnknownDependency {
                    service: svc.name.clone(),
                    dependency: dep.clone(),
                });
            }
            dependents.entry(dep.as_str()).or_default().push(svc.name.as_str());
        }
        pending.insert(svc.name.as_str(), svc.depends_on.len());
    }

    let mut ready: BTreeSet<(u32, &str)> = services
        .iter()
        .filter(|s| s.depends_on.is_empty())
        .map(|s| (s.order, s.name.as_str()))
        .collect();

    let mut ordered = Vec::with_capacity(services.len());
    while let Some(next) = ready.pop_first() {
        let svc = by_name[next.1];
        ordered.push(svc);
        for &dependent in dependents.get(next.1).into_iter().flatten() {
            if let Some(count) = pending.get_mut(dependent) {
                *count -= 1;
                if *count == 0 {
                    ready.insert((by_name[dependent].order, dependent));
                }
            }
        }
    }

    if ordered.len() < services.len() {
        let mut stuck: Vec<&str> = pending
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(name, _)| *name)
            .collect();
        stuck.sort_unstable();
        return Err(StackError::DependencyCycle(stuck.join(", ")));
    }

    Ok(ordered)
}

/// Starts the stack one service at a time in dependency order.
pub struct Launcher<'a> {
    runtime: &'a dyn ContainerRuntime,
    log: PathBuf,
}

impl<'a> Launcher<'a> {
    pub fn new(runtime: &'a dyn ContainerRuntime, log: impl Into<PathBuf>) -> Self {
        Self {
            runtime,
            log: log.into(),
        }
    }

    pub fn log_path(&self) -> &Path {
        &self.log
    }

    /// Start every service. The first failure stops the launch; services
    /// after it are not attempted. Returns the services started.
    pub fn launch(&self, services: &[ServiceConfig], cancel: &CancelToken) -> Result<Vec<String>> {
        let order = launch_order(services)?;
        let mut started = Vec::with_capacity(order.len());
        for svc in order {
            if cancel.is_cancelled() {
                tracing::warn!(started = ?started, "launch interrupted");
                return Err(StackError::Interrupted);
            }
            tracing::info!(service = %svc.name, "starting service");
            self.runtime.start_service(&svc.name, &self.log)?;
            started.push(svc.name.clone());
        }
        Ok(started)
    }
}
