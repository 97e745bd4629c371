//! Drives one `start`, `update` or `diagnose` run end to end.
//!
//! Flow: preflight, hooks, decide, build, launch, gate. A launch failure, a
//! readiness timeout or an interrupt collects diagnostics before returning.

use crate::build::Builder;
use crate::config::{Config, ConfigWarning, WarnLevel};
use crate::decision::{decide, decide_forced, DecisionSet, DecisionSummary};
use crate::diagnostics::{Collector, DiagnosticReport, Trigger};
use crate::error::{Result, StackError};
use crate::hooks::{HookKind, HookRunner};
use crate::inspect::{Inspector, ServiceObservation};
use crate::io;
use crate::launch::Launcher;
use crate::paths;
use crate::readiness::{await_ready, CancelToken, Clock, GateSettings, ReadinessResult};
use crate::runtime::ContainerRuntime;
use crate::secret::{Provisioner, SecretValue};
use serde::Serialize;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Options / outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub rebuild_frontend: bool,
    /// Skip dependency staging.
    pub offline: bool,
    /// Readiness timeout override in seconds.
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    Start,
    Update,
}

impl RunKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RunKind::Start => "start",
            RunKind::Update => "update",
        }
    }

    pub fn log_name(self) -> &'static str {
        match self {
            RunKind::Start => paths::STARTUP_LOG,
            RunKind::Update => paths::UPDATE_LOG,
        }
    }
}

/// Result of a run that got as far as the readiness gate.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub kind: RunKind,
    pub summary: DecisionSummary,
    pub decisions: DecisionSet,
    pub built: Vec<String>,
    pub started: Vec<String>,
    pub readiness: ReadinessResult,
    /// Present when the gate timed out.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<DiagnosticReport>,
    pub log: PathBuf,
}

impl RunOutcome {
    pub fn is_ready(&self) -> bool {
        self.readiness.is_ready()
    }
}

/// Snapshot for `stackup status`.
#[derive(Debug, Clone, Serialize)]
pub struct StackStatus {
    pub primary: String,
    pub services: Vec<ServiceObservation>,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator<'a> {
    config: &'a Config,
    root: &'a Path,
    runtime: &'a dyn ContainerRuntime,
    clock: &'a dyn Clock,
    cancel: CancelToken,
    secret: Option<SecretValue>,
    /// Shared by every run so at most one secret scope is ever open.
    provisioner: Provisioner,
    cache_dir: Option<PathBuf>,
    tail: usize,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        config: &'a Config,
        root: &'a Path,
        runtime: &'a dyn ContainerRuntime,
        clock: &'a dyn Clock,
        cancel: CancelToken,
    ) -> Self {
        Self {
            config,
            root,
            runtime,
            clock,
            cancel,
            secret: None,
            provisioner: Provisioner::new(
                paths::state_dir(root),
                config.secret.id.clone(),
                config.secret.env.clone(),
            ),
            cache_dir: None,
            tail: config.diagnostics.tail_lines,
        }
    }

    /// Build secret, read once from the environment by the caller.
    pub fn with_secret(mut self, secret: Option<SecretValue>) -> Self {
        self.secret = secret;
        self
    }

    pub fn with_cache_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.cache_dir = dir;
        self
    }

    pub fn with_tail(mut self, tail: usize) -> Self {
        self.tail = tail;
        self
    }

    fn inspector(&self) -> Inspector<'a> {
        Inspector::new(
            self.runtime,
            &self.config.diagnostics.env_allowlist,
            &self.config.secret.env,
        )
    }

    pub fn log_path(&self, name: &str) -> PathBuf {
        self.config.log_dir(self.root).join(name)
    }

    // -----------------------------------------------------------------------
    // Preflight
    // -----------------------------------------------------------------------

    /// Environment checks that must pass before anything is built or
    /// started. Returns config warnings.
    pub fn preflight(&self) -> Result<Vec<ConfigWarning>> {
        let mut warnings = self.config.validate()?;
        warnings.extend(self.config.check_paths(self.root));
        for w in &warnings {
            match w.level {
                WarnLevel::Warning => tracing::warn!("{}", w.message),
                WarnLevel::Error => tracing::error!("{}", w.message),
            }
        }

        let compose = self.config.compose_path(self.root);
        if !compose.exists() {
            return Err(StackError::ComposeFileNotFound(compose.display().to_string()));
        }
        self.runtime.ping()?;
        Ok(warnings)
    }

    // -----------------------------------------------------------------------
    // start / update
    // -----------------------------------------------------------------------

    pub fn start(&self, opts: &StartOptions) -> Result<RunOutcome> {
        self.preflight()?;
        let log = self.log_path(RunKind::Start.log_name());
        self.mark(&log, "stackup start")?;

        let hooks = self.hook_runner(&log);
        hooks.run(HookKind::LoadEnv, &self.config.hooks)?;
        hooks.run(HookKind::VerifyModels, &self.config.hooks)?;
        if opts.offline {
            tracing::info!("offline: skipping dependency staging");
        } else {
            hooks.run(HookKind::StageDependencies, &self.config.hooks)?;
        }
        if opts.rebuild_frontend || self.frontend_missing() {
            hooks.run(HookKind::BuildFrontend, &self.config.hooks)?;
        }

        let decisions = decide(&self.inspector(), &self.config.services);
        self.run(RunKind::Start, decisions, &log, opts.timeout)
    }

    /// Rebuild every buildable service regardless of observed state, then
    /// relaunch and gate.
    pub fn update(&self, opts: &UpdateOptions) -> Result<RunOutcome> {
        self.preflight()?;
        let log = self.log_path(RunKind::Update.log_name());
        self.mark(&log, "stackup update")?;

        let hooks = self.hook_runner(&log);
        hooks.run(HookKind::LoadEnv, &self.config.hooks)?;
        hooks.run(HookKind::StageDependencies, &self.config.hooks)?;
        hooks.run(HookKind::BuildFrontend, &self.config.hooks)?;

        let decisions = decide_forced(&self.config.services);
        tracing::info!(count = decisions.to_rebuild().count(), "update: forcing rebuild");
        self.run(RunKind::Update, decisions, &log, opts.timeout)
    }

    fn run(
        &self,
        kind: RunKind,
        decisions: DecisionSet,
        log: &Path,
        timeout: Option<u64>,
    ) -> Result<RunOutcome> {
        if self.cancel.is_cancelled() {
            return Err(self.interrupted(log));
        }

        let built = Builder::new(self.runtime, self.config, self.root).build(
            &decisions,
            self.secret.as_ref(),
            &self.provisioner,
        )?;

        if self.cancel.is_cancelled() {
            return Err(self.interrupted(log));
        }

        let started = match Launcher::new(self.runtime, log).launch(&self.config.services, &self.cancel) {
            Ok(started) => started,
            Err(StackError::Interrupted) => return Err(self.interrupted(log)),
            Err(e) => {
                tracing::error!(error = %e, "launch failed");
                io::append_text(log, &format!("launch failed: {e}\n"))?;
                self.collect_and_write(Trigger::LaunchFailed);
                return Err(e);
            }
        };

        let settings = GateSettings::from_secs(
            self.config.readiness.poll_interval_secs,
            timeout.unwrap_or(self.config.readiness.timeout_secs),
        );
        let primary = self.config.primary_service()?;
        let readiness = match await_ready(&self.inspector(), primary, settings, self.clock, &self.cancel) {
            Ok(result) => result,
            Err(StackError::Interrupted) => return Err(self.interrupted(log)),
            Err(e) => return Err(e),
        };

        let diagnostics = if readiness.is_ready() {
            self.mark(
                log,
                &format!("{} ready after {:.1}s", primary.name, readiness.elapsed_seconds),
            )?;
            None
        } else {
            self.mark(
                log,
                &format!(
                    "{} not healthy after {:.1}s (last health: {})",
                    primary.name, readiness.elapsed_seconds, readiness.last_health
                ),
            )?;
            Some(self.collect_and_write(Trigger::TimedOut))
        };

        Ok(RunOutcome {
            kind,
            summary: decisions.summary(),
            decisions,
            built,
            started,
            readiness,
            diagnostics,
            log: log.to_path_buf(),
        })
    }

    // -----------------------------------------------------------------------
    // diagnose / status
    // -----------------------------------------------------------------------

    /// Collect and persist a report on demand. Works without a reachable
    /// runtime: unreachable parts are marked unavailable.
    pub fn diagnose(&self) -> DiagnosticReport {
        self.collect_and_write(Trigger::Manual)
    }

    pub fn status(&self) -> StackStatus {
        let inspector = self.inspector();
        StackStatus {
            primary: self.config.primary.clone(),
            services: self
                .config
                .services
                .iter()
                .map(|svc| inspector.observe(svc))
                .collect(),
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn hook_runner(&self, log: &Path) -> HookRunner {
        HookRunner::new(self.root, log, &self.config.secret.env).with_cache_dir(self.cache_dir.clone())
    }

    fn frontend_missing(&self) -> bool {
        self.config
            .frontend_output
            .as_ref()
            .is_some_and(|p| !paths::resolve(self.root, p).exists())
    }

    fn mark(&self, log: &Path, text: &str) -> Result<()> {
        io::append_text(
            log,
            &format!("\n=== {} {} ===\n", text, chrono::Utc::now().to_rfc3339()),
        )
    }

    fn interrupted(&self, log: &Path) -> StackError {
        if let Err(e) = self.mark(log, "interrupted") {
            tracing::warn!(error = %e, "failed to write run log");
        }
        self.collect_and_write(Trigger::Interrupted);
        StackError::Interrupted
    }

    /// Collection never fails; a write failure is logged and the report is
    /// still returned.
    fn collect_and_write(&self, trigger: Trigger) -> DiagnosticReport {
        let inspector = self.inspector();
        let report = Collector::new(&inspector, self.config, self.root, self.tail).collect(trigger);
        let path = self.log_path(paths::DIAGNOSTICS_LOG);
        match report.append_to(&path) {
            Ok(()) => tracing::info!(path = %path.display(), "diagnostics written"),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to write diagnostics"),
        }
        report
    }
}
