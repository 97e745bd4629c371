use crate::config::ServiceConfig;
use crate::runtime::{ContainerRuntime, Health, RuntimeStatus};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

// ---------------------------------------------------------------------------
// ServiceObservation
// ---------------------------------------------------------------------------

/// Point-in-time state of one managed service. Built fresh on every call to
/// [`Inspector::observe`]; never cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceObservation {
    pub service: String,
    /// Whether a container exists for the service.
    pub exists: bool,
    pub image_present: bool,
    pub runtime_status: RuntimeStatus,
    pub health: Health,
    pub exit_code: Option<i64>,
    pub restart_count: Option<u64>,
    /// Allow-listed subset of the container environment.
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_log: Option<String>,
}

impl ServiceObservation {
    fn absent(service: &str, image_present: bool) -> Self {
        Self {
            service: service.to_string(),
            exists: false,
            image_present,
            runtime_status: RuntimeStatus::NotCreated,
            health: Health::None,
            exit_code: None,
            restart_count: None,
            env: BTreeMap::new(),
            health_log: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.runtime_status == RuntimeStatus::Running
    }
}

// ---------------------------------------------------------------------------
// Inspector
// ---------------------------------------------------------------------------

/// Read-only view of service state. Never fails: runtime errors degrade the
/// affected fields to `unknown`.
pub struct Inspector<'a> {
    runtime: &'a dyn ContainerRuntime,
    allowlist: Vec<String>,
    secret_env: String,
}

impl<'a> Inspector<'a> {
    pub fn new(runtime: &'a dyn ContainerRuntime, allowlist: &[String], secret_env: &str) -> Self {
        Self {
            runtime,
            allowlist: allowlist.to_vec(),
            secret_env: secret_env.to_string(),
        }
    }

    pub fn runtime(&self) -> &'a dyn ContainerRuntime {
        self.runtime
    }

    pub fn observe(&self, service: &ServiceConfig) -> ServiceObservation {
        let image_present = match self.runtime.image_exists(&service.image) {
            Ok(present) => present,
            Err(e) => {
                tracing::warn!(service = %service.name, image = %service.image, error = %e, "image query failed; treating image as missing");
                false
            }
        };

        let id = match self.runtime.container_id(&service.name) {
            Ok(Some(id)) => id,
            Ok(None) => return ServiceObservation::absent(&service.name, image_present),
            Err(e) => {
                tracing::warn!(service = %service.name, error = %e, "container lookup failed");
                let mut obs = ServiceObservation::absent(&service.name, image_present);
                obs.runtime_status = RuntimeStatus::Unknown;
                return obs;
            }
        };

        match self.runtime.inspect_container(&id) {
            Ok(state) => ServiceObservation {
                service: service.name.clone(),
                exists: true,
                image_present,
                runtime_status: state.status,
                health: state.health,
                exit_code: state.exit_code,
                restart_count: state.restart_count,
                env: self.filter(&state.env),
                health_log: state.health_log,
            },
            Err(e) => {
                tracing::warn!(service = %service.name, container = %id, error = %e, "container inspect failed");
                ServiceObservation {
                    exists: true,
                    runtime_status: RuntimeStatus::Unknown,
                    ..ServiceObservation::absent(&service.name, image_present)
                }
            }
        }
    }

    fn filter(&self, raw: &[String]) -> BTreeMap<String, String> {
        let allow: HashSet<&str> = self
            .allowlist
            .iter()
            .map(String::as_str)
            .filter(|name| *name != self.secret_env)
            .collect();
        filter_env(raw, &allow)
    }
}

/// Keep only `KEY=VALUE` entries whose key is in `allow`.
pub fn filter_env(raw: &[String], allow: &HashSet<&str>) -> BTreeMap<String, String> {
    raw.iter()
        .filter_map(|entry| entry.split_once('='))
        .filter(|(key, _)| allow.contains(key))
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::sample;
    use crate::testing::FakeRuntime;

    #[test]
    fn missing_container_is_not_an_error() {
        let rt = FakeRuntime::new();
        rt.set_image("app-api:latest", true);
        let cfg = sample();
        let inspector = Inspector::new(&rt, &cfg.diagnostics.env_allowlist, "SECRET_KEY");

        let obs = inspector.observe(cfg.service("api").unwrap());
        assert!(!obs.exists);
        assert!(obs.image_present);
        assert_eq!(obs.runtime_status, RuntimeStatus::NotCreated);
        assert_eq!(obs.health, Health::None);
        assert_eq!(obs.exit_code, None);
    }

    #[test]
    fn running_container_is_observed() {
        let rt = FakeRuntime::new();
        rt.set_image("app-api:latest", true);
        rt.set_container("api", RuntimeStatus::Running, &[Health::Healthy]);
        let cfg = sample();
        let inspector = Inspector::new(&rt, &cfg.diagnostics.env_allowlist, "SECRET_KEY");

        let obs = inspector.observe(cfg.service("api").unwrap());
        assert!(obs.exists);
        assert!(obs.is_running());
        assert_eq!(obs.health, Health::Healthy);
        assert_eq!(obs.restart_count, Some(0));
    }

    #[test]
    fn env_is_allowlisted_and_secret_is_dropped() {
        let rt = FakeRuntime::new();
        rt.set_container("worker", RuntimeStatus::Running, &[Health::None]);
        rt.set_env(
            "worker",
            &[
                "SERVICE_ROLE=worker",
                "BROKER_URL=redis://broker:6379/0",
                "SECRET_KEY=s3cr3t",
                "DATABASE_PASSWORD=hunter2",
                "PATH=/usr/bin",
            ],
        );
        let cfg = sample();
        let mut allow = cfg.diagnostics.env_allowlist.clone();
        allow.push("SECRET_KEY".into());
        let inspector = Inspector::new(&rt, &allow, "SECRET_KEY");

        let obs = inspector.observe(cfg.service("worker").unwrap());
        assert_eq!(obs.env.len(), 2);
        assert_eq!(obs.env["SERVICE_ROLE"], "worker");
        assert_eq!(obs.env["BROKER_URL"], "redis://broker:6379/0");
        assert!(!obs.env.contains_key("SECRET_KEY"));
    }

    #[test]
    fn runtime_failures_degrade_to_unknown() {
        let rt = FakeRuntime::new();
        rt.fail_queries(true);
        let cfg = sample();
        let inspector = Inspector::new(&rt, &cfg.diagnostics.env_allowlist, "SECRET_KEY");

        let obs = inspector.observe(cfg.service("db").unwrap());
        assert!(!obs.image_present);
        assert_eq!(obs.runtime_status, RuntimeStatus::Unknown);
    }

    #[test]
    fn filter_env_ignores_malformed_entries() {
        let allow: HashSet<&str> = ["A", "B"].into_iter().collect();
        let raw = vec!["A=1".to_string(), "B".to_string(), "C=3".to_string(), "A2=x".to_string()];
        let env = filter_env(&raw, &allow);
        assert_eq!(env.len(), 1);
        assert_eq!(env["A"], "1");
    }

    #[test]
    fn observations_are_fresh_each_call() {
        let rt = FakeRuntime::new();
        rt.set_image("app-api:latest", true);
        rt.set_container("api", RuntimeStatus::Running, &[Health::Starting, Health::Healthy]);
        let cfg = sample();
        let inspector = Inspector::new(&rt, &cfg.diagnostics.env_allowlist, "SECRET_KEY");
        let api = cfg.service("api").unwrap();

        assert_eq!(inspector.observe(api).health, Health::Starting);
        assert_eq!(inspector.observe(api).health, Health::Healthy);
    }
}
