//! Failure snapshot of the whole stack.
//!
//! Collection never fails: every missing container, log stream or log file
//! is recorded as unavailable and the report is still produced with one
//! section per managed service.

use crate::config::{Config, ServiceConfig};
use crate::inspect::{Inspector, ServiceObservation};
use crate::io;
use crate::paths;
use crate::runtime::{Health, RuntimeStatus};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    TimedOut,
    LaunchFailed,
    Interrupted,
    Manual,
}

impl Trigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Trigger::TimedOut => "timed_out",
            Trigger::LaunchFailed => "launch_failed",
            Trigger::Interrupted => "interrupted",
            Trigger::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LogTail {
    Lines { lines: Vec<String> },
    Unavailable { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSection {
    pub service: String,
    pub primary: bool,
    pub observation: ServiceObservation,
    pub logs: LogTail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyStatus {
    pub service: String,
    /// The service that declared this dependency.
    pub required_by: String,
    pub exists: bool,
    pub runtime_status: RuntimeStatus,
    pub health: Health,
    /// Not running, unhealthy, or not yet passing its probe.
    pub suspect: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyChain {
    pub primary: String,
    pub dependencies: Vec<DependencyStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogFileSection {
    pub name: String,
    pub path: PathBuf,
    pub tail: LogTail,
    /// Lines in the tail that look like errors.
    pub error_lines: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticReport {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub trigger: Trigger,
    pub primary: String,
    pub tail: usize,
    pub services: Vec<ServiceSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency_chain: Option<DependencyChain>,
    pub log_files: Vec<LogFileSection>,
}

impl DiagnosticReport {
    /// Upstream services flagged by the dependency walk.
    pub fn suspects(&self) -> Vec<&str> {
        self.dependency_chain
            .iter()
            .flat_map(|c| c.dependencies.iter())
            .filter(|d| d.suspect)
            .map(|d| d.service.as_str())
            .collect()
    }

    /// Whether anything in the snapshot needs attention.
    pub fn has_problems(&self) -> bool {
        self.services.iter().any(|s| {
            let obs = &s.observation;
            (s.primary && obs.health != Health::Healthy)
                || obs.health == Health::Unhealthy
                || matches!(obs.runtime_status, RuntimeStatus::Exited | RuntimeStatus::Unknown)
                || !obs.exists
        })
    }

    /// Append the rendered report to `path`.
    pub fn append_to(&self, path: &Path) -> crate::Result<()> {
        io::append_text(path, &format!("{self}\n"))
    }
}

// ---------------------------------------------------------------------------
// Collector
// ---------------------------------------------------------------------------

pub struct Collector<'a> {
    inspector: &'a Inspector<'a>,
    config: &'a Config,
    root: &'a Path,
    tail: usize,
}

impl<'a> Collector<'a> {
    pub fn new(inspector: &'a Inspector<'a>, config: &'a Config, root: &'a Path, tail: usize) -> Self {
        Self {
            inspector,
            config,
            root,
            tail,
        }
    }

    pub fn collect(&self, trigger: Trigger) -> DiagnosticReport {
        tracing::info!(trigger = trigger.as_str(), services = self.config.services.len(), "collecting diagnostics");

        let services: Vec<ServiceSection> = self
            .config
            .services
            .iter()
            .map(|svc| self.service_section(svc))
            .collect();

        let primary_missing = services
            .iter()
            .find(|s| s.primary)
            .map(|s| !s.observation.exists)
            .unwrap_or(false);
        let dependency_chain = if primary_missing {
            Some(self.dependency_chain(&services))
        } else {
            None
        };

        let log_dir = self.config.log_dir(self.root);
        let log_files = [paths::BUILD_LOG, paths::STARTUP_LOG, paths::UPDATE_LOG]
            .iter()
            .map(|name| self.log_file_section(name, &log_dir.join(name)))
            .collect();

        DiagnosticReport {
            run_id: uuid::Uuid::new_v4().to_string(),
            generated_at: Utc::now(),
            trigger,
            primary: self.config.primary.clone(),
            tail: self.tail,
            services,
            dependency_chain,
            log_files,
        }
    }

    fn service_section(&self, svc: &ServiceConfig) -> ServiceSection {
        let observation = self.inspector.observe(svc);
        let logs = if !observation.exists {
            LogTail::Unavailable {
                reason: "container not found".into(),
            }
        } else {
            match self.inspector.runtime().logs(&svc.name, self.tail) {
                Ok(lines) => LogTail::Lines { lines },
                Err(e) => LogTail::Unavailable {
                    reason: e.to_string(),
                },
            }
        };
        ServiceSection {
            service: svc.name.clone(),
            primary: svc.name == self.config.primary,
            observation,
            logs,
        }
    }

    /// Breadth-first walk of the primary's dependencies, each listed once.
    fn dependency_chain(&self, sections: &[ServiceSection]) -> DependencyChain {
        let primary = self.config.primary.clone();
        let mut dependencies = Vec::new();
        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<(&str, &str)> = VecDeque::new();

        if let Some(svc) = self.config.service(&primary) {
            visited.insert(svc.name.as_str());
            for dep in &svc.depends_on {
                queue.push_back((dep.as_str(), svc.name.as_str()));
            }
        }

        while let Some((name, required_by)) = queue.pop_front() {
            if !visited.insert(name) {
                continue;
            }
            let Some(svc) = self.config.service(name) else {
                continue;
            };
            let observation = sections
                .iter()
                .find(|s| s.service == name)
                .map(|s| s.observation.clone())
                .unwrap_or_else(|| self.inspector.observe(svc));

            let suspect = !observation.is_running()
                || observation.health == Health::Unhealthy
                || (svc.health_check && observation.health != Health::Healthy);
            if suspect {
                tracing::warn!(service = name, required_by, status = %observation.runtime_status, health = %observation.health, "upstream dependency not ready");
            }

            dependencies.push(DependencyStatus {
                service: name.to_string(),
                required_by: required_by.to_string(),
                exists: observation.exists,
                runtime_status: observation.runtime_status,
                health: observation.health,
                suspect,
            });
            for dep in &svc.depends_on {
                queue.push_back((dep.as_str(), svc.name.as_str()));
            }
        }

        DependencyChain {
            primary,
            dependencies,
        }
    }

    fn log_file_section(&self, name: &str, path: &Path) -> LogFileSection {
        let tail = match io::tail_lines(path, self.tail) {
            Ok(lines) => LogTail::Lines { lines },
            Err(_) if !path.exists() => LogTail::Unavailable {
                reason: "not found".into(),
            },
            Err(e) => LogTail::Unavailable {
                reason: e.to_string(),
            },
        };
        let error_lines = match &tail {
            LogTail::Lines { lines } => count_error_lines(lines),
            LogTail::Unavailable { .. } => 0,
        };
        LogFileSection {
            name: name.to_string(),
            path: path.to_path_buf(),
            tail,
            error_lines,
        }
    }
}

fn error_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(error|exception|traceback|fatal|panic(ked)?)\b")
            .expect("error pattern is valid")
    })
}

pub fn count_error_lines(lines: &[String]) -> usize {
    let re = error_pattern();
    lines.iter().filter(|l| re.is_match(l)).count()
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn opt<T: fmt::Display>(value: &Option<T>) -> String {
    value
        .as_ref()
        .map(|v| v.to_string())
        .unwrap_or_else(|| "unknown".into())
}

fn write_tail(f: &mut fmt::Formatter<'_>, tail: &LogTail) -> fmt::Result {
    match tail {
        LogTail::Lines { lines } if lines.is_empty() => writeln!(f, "  (empty)"),
        LogTail::Lines { lines } => {
            for line in lines {
                writeln!(f, "  {line}")?;
            }
            Ok(())
        }
        LogTail::Unavailable { reason } => writeln!(f, "  unavailable: {reason}"),
    }
}

impl fmt::Display for DiagnosticReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "=== stackup diagnostics {} (run {}, trigger: {}) ===",
            self.generated_at.to_rfc3339(),
            self.run_id,
            self.trigger.as_str()
        )?;

        for section in &self.services {
            let obs = &section.observation;
            let marker = if section.primary { " [primary]" } else { "" };
            writeln!(f, "\n--- {}{} ---", section.service, marker)?;
            writeln!(f, "container: {}", if obs.exists { "present" } else { "not found" })?;
            writeln!(f, "image:     {}", if obs.image_present { "present" } else { "missing" })?;
            writeln!(f, "status:    {}", obs.runtime_status)?;
            writeln!(f, "health:    {}", obs.health)?;
            writeln!(f, "exit code: {}", opt(&obs.exit_code))?;
            writeln!(f, "restarts:  {}", opt(&obs.restart_count))?;
            if obs.env.is_empty() {
                writeln!(f, "env:       (none)")?;
            } else {
                writeln!(f, "env:")?;
                for (k, v) in &obs.env {
                    writeln!(f, "  {k}={v}")?;
                }
            }
            if let Some(probe) = &obs.health_log {
                writeln!(f, "last health probe: {probe}")?;
            }
            writeln!(f, "logs (last {}):", self.tail)?;
            write_tail(f, &section.logs)?;
        }

        if let Some(chain) = &self.dependency_chain {
            writeln!(f, "\n--- dependency chain for {} (container never created) ---", chain.primary)?;
            if chain.dependencies.is_empty() {
                writeln!(f, "  (no dependencies declared)")?;
            }
            for dep in &chain.dependencies {
                writeln!(
                    f,
                    "  {:<16} {:<12} {:<10} required by {}{}",
                    dep.service,
                    dep.runtime_status.as_str(),
                    dep.health.as_str(),
                    dep.required_by,
                    if dep.suspect { "  <- not ready" } else { "" }
                )?;
            }
        }

        for log in &self.log_files {
            writeln!(
                f,
                "\n--- {} (last {}, {} error lines) ---",
                log.path.display(),
                self.tail,
                log.error_lines
            )?;
            write_tail(f, &log.tail)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::sample;
    use crate::testing::FakeRuntime;
    use tempfile::TempDir;

    fn collect(rt: &FakeRuntime, root: &Path, trigger: Trigger) -> DiagnosticReport {
        let cfg = sample();
        let inspector = Inspector::new(rt, &cfg.diagnostics.env_allowlist, &cfg.secret.env);
        Collector::new(&inspector, &cfg, root, 20).collect(trigger)
    }

    #[test]
    fn one_section_per_service_even_when_nothing_exists() {
        let dir = TempDir::new().unwrap();
        let rt = FakeRuntime::new();
        let report = collect(&rt, dir.path(), Trigger::TimedOut);

        assert_eq!(report.services.len(), 4);
        for section in &report.services {
            assert!(!section.observation.exists);
            assert!(matches!(section.logs, LogTail::Unavailable { .. }));
        }
        assert_eq!(report.log_files.len(), 3);
        assert!(report
            .log_files
            .iter()
            .all(|l| l.tail == LogTail::Unavailable { reason: "not found".into() }));
        assert!(report.has_problems());
    }

    #[test]
    fn runtime_outage_still_produces_full_report() {
        let dir = TempDir::new().unwrap();
        let rt = FakeRuntime::new();
        rt.fail_queries(true);
        let report = collect(&rt, dir.path(), Trigger::LaunchFailed);
        assert_eq!(report.services.len(), 4);
        assert!(report
            .services
            .iter()
            .all(|s| s.observation.runtime_status == RuntimeStatus::Unknown));
    }

    #[test]
    fn missing_primary_walks_dependencies_and_flags_broker() {
        let dir = TempDir::new().unwrap();
        let rt = FakeRuntime::new();
        rt.set_image("app-api:latest", true);
        rt.set_container("db", RuntimeStatus::Running, &[Health::Healthy]);
        rt.set_container("broker", RuntimeStatus::Exited, &[Health::None]);
        rt.set_exit("broker", 1, 5);
        rt.set_container("worker", RuntimeStatus::Running, &[Health::None]);

        let report = collect(&rt, dir.path(), Trigger::LaunchFailed);
        let api = report.services.iter().find(|s| s.primary).unwrap();
        assert!(!api.observation.exists);

        let chain = report.dependency_chain.as_ref().unwrap();
        assert_eq!(chain.primary, "api");
        let deps: Vec<&str> = chain.dependencies.iter().map(|d| d.service.as_str()).collect();
        assert_eq!(deps, vec!["db", "broker"]);
        assert_eq!(report.suspects(), vec!["broker"]);

        let broker = report.services.iter().find(|s| s.service == "broker").unwrap();
        assert_eq!(broker.observation.exit_code, Some(1));
        assert_eq!(broker.observation.restart_count, Some(5));

        let text = report.to_string();
        assert!(text.contains("dependency chain for api"));
        assert!(text.contains("<- not ready"));
    }

    #[test]
    fn dependency_chain_only_when_primary_missing() {
        let dir = TempDir::new().unwrap();
        let rt = FakeRuntime::new();
        rt.set_container("api", RuntimeStatus::Running, &[Health::Unhealthy]);
        let report = collect(&rt, dir.path(), Trigger::TimedOut);
        assert!(report.dependency_chain.is_none());
        assert!(report.suspects().is_empty());
    }

    #[test]
    fn container_logs_and_log_files_are_tailed() {
        let dir = TempDir::new().unwrap();
        let rt = FakeRuntime::new();
        rt.set_container("api", RuntimeStatus::Running, &[Health::Starting]);
        let lines: Vec<String> = (1..=30).map(|i| format!("api line {i}")).collect();
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        rt.set_logs("api", &refs);

        std::fs::create_dir_all(dir.path().join("logs")).unwrap();
        std::fs::write(
            dir.path().join("logs/build.log"),
            "Step 1/4\nERROR: failed to solve\nTraceback (most recent call last):\nok\n",
        )
        .unwrap();

        let report = collect(&rt, dir.path(), Trigger::TimedOut);
        let api = report.services.iter().find(|s| s.service == "api").unwrap();
        match &api.logs {
            LogTail::Lines { lines } => {
                assert_eq!(lines.len(), 20);
                assert_eq!(lines.last().unwrap(), "api line 30");
            }
            other => panic!("expected lines, got {other:?}"),
        }
        let build = report.log_files.iter().find(|l| l.name == "build.log").unwrap();
        assert_eq!(build.error_lines, 2);
        let startup = report.log_files.iter().find(|l| l.name == "startup.log").unwrap();
        assert!(matches!(startup.tail, LogTail::Unavailable { .. }));
    }

    #[test]
    fn stray_non_utf8_bytes_keep_the_log_section() {
        let dir = TempDir::new().unwrap();
        let rt = FakeRuntime::new();
        std::fs::create_dir_all(dir.path().join("logs")).unwrap();
        std::fs::write(
            dir.path().join("logs/build.log"),
            b"caf\xe9 locale output\nERROR: failed to solve\n",
        )
        .unwrap();

        let report = collect(&rt, dir.path(), Trigger::TimedOut);
        let build = report.log_files.iter().find(|l| l.name == "build.log").unwrap();
        match &build.tail {
            LogTail::Lines { lines } => {
                assert_eq!(lines.len(), 2);
                assert_eq!(lines[1], "ERROR: failed to solve");
            }
            other => panic!("expected lines, got {other:?}"),
        }
        assert_eq!(build.error_lines, 1);
    }

    #[test]
    fn append_to_is_write_once_per_report() {
        let dir = TempDir::new().unwrap();
        let rt = FakeRuntime::new();
        let path = dir.path().join("logs/diagnostics.log");
        collect(&rt, dir.path(), Trigger::Manual).append_to(&path).unwrap();
        collect(&rt, dir.path(), Trigger::Manual).append_to(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.matches("=== stackup diagnostics").count(), 2);
    }

    #[test]
    fn report_serializes_to_json() {
        let dir = TempDir::new().unwrap();
        let rt = FakeRuntime::new();
        let report = collect(&rt, dir.path(), Trigger::Interrupted);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["trigger"], "interrupted");
        assert_eq!(json["services"].as_array().unwrap().len(), 4);
        assert_eq!(json["log_files"][0]["tail"]["state"], "unavailable");
    }

    #[test]
    fn error_pattern_matches_whole_words() {
        let lines = vec![
            "ERROR: boom".to_string(),
            "thread 'main' panicked at src/main.rs".to_string(),
            "errors_total=0".to_string(),
            "all good".to_string(),
        ];
        assert_eq!(count_error_lines(&lines), 2);
    }
}
