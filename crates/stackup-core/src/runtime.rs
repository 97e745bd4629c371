//! Container runtime seam.
//!
//! Everything the orchestrator needs from the container engine goes through
//! [`ContainerRuntime`]. The production implementation, [`DockerCli`], shells
//! out to the `docker` binary (and its `compose` plugin). Queries are bounded
//! by a fixed timeout; builds and service starts stream their output into a
//! log file instead of the terminal.

use crate::config::Config;
use crate::error::{Result, StackError};
use crate::secret::SecretValue;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// RuntimeStatus / Health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeStatus {
    NotCreated,
    Created,
    Running,
    Exited,
    Unknown,
}

impl RuntimeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RuntimeStatus::NotCreated => "not_created",
            RuntimeStatus::Created => "created",
            RuntimeStatus::Running => "running",
            RuntimeStatus::Exited => "exited",
            RuntimeStatus::Unknown => "unknown",
        }
    }

    /// Map a `State.Status` string from `docker inspect`.
    pub fn from_docker(status: &str) -> Self {
        match status {
            "created" => RuntimeStatus::Created,
            "running" => RuntimeStatus::Running,
            "exited" | "dead" => RuntimeStatus::Exited,
            _ => RuntimeStatus::Unknown,
        }
    }
}

impl fmt::Display for RuntimeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    None,
    Starting,
    Healthy,
    Unhealthy,
}

impl Health {
    pub fn as_str(self) -> &'static str {
        match self {
            Health::None => "none",
            Health::Starting => "starting",
            Health::Healthy => "healthy",
            Health::Unhealthy => "unhealthy",
        }
    }

    pub fn from_docker(status: &str) -> Self {
        match status {
            "starting" => Health::Starting,
            "healthy" => Health::Healthy,
            "unhealthy" => Health::Unhealthy,
            _ => Health::None,
        }
    }
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ContainerState
// ---------------------------------------------------------------------------

/// Raw container state as reported by the runtime. The environment is the
/// full `KEY=VALUE` list; callers must filter it before exposing it.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerState {
    pub status: RuntimeStatus,
    pub health: Health,
    pub exit_code: Option<i64>,
    pub restart_count: Option<u64>,
    pub env: Vec<String>,
    /// Output of the most recent health probe, if any.
    pub health_log: Option<String>,
}

// ---------------------------------------------------------------------------
// BuildRequest
// ---------------------------------------------------------------------------

/// How the build secret reaches the build tool.
#[derive(Debug, Clone, Copy)]
pub enum SecretInjection<'a> {
    /// `--secret id=<id>,src=<path>`; mounted only for the instructions
    /// that ask for it, never stored in a layer.
    Mount { id: &'a str, path: &'a Path },
    /// `--build-arg <name>` with the value passed through the build
    /// process environment, never on the command line.
    BuildArg {
        name: &'a str,
        value: &'a SecretValue,
    },
}

#[derive(Debug, Clone)]
pub struct BuildRequest<'a> {
    pub service: &'a str,
    pub image: &'a str,
    pub context: PathBuf,
    pub dockerfile: Option<PathBuf>,
    pub secret: Option<SecretInjection<'a>>,
    /// Build output is appended here.
    pub log: &'a Path,
}

// ---------------------------------------------------------------------------
// ContainerRuntime
// ---------------------------------------------------------------------------

pub trait ContainerRuntime {
    /// Fail with `RuntimeUnavailable` when the engine cannot be reached.
    fn ping(&self) -> Result<()>;

    fn image_exists(&self, image: &str) -> Result<bool>;

    /// Container id for a service, `None` when no container was created.
    fn container_id(&self, service: &str) -> Result<Option<String>>;

    fn inspect_container(&self, id: &str) -> Result<ContainerState>;

    fn logs(&self, service: &str, tail: usize) -> Result<Vec<String>>;

    /// Capability probe for mount-based build secrets.
    fn supports_secret_mounts(&self) -> bool;

    fn build_image(&self, request: &BuildRequest<'_>) -> Result<()>;

    /// Start one service without building and without starting its
    /// dependencies; output is appended to `log`.
    fn start_service(&self, service: &str, log: &Path) -> Result<()>;
}

// ---------------------------------------------------------------------------
// DockerCli
// ---------------------------------------------------------------------------

pub struct DockerCli {
    binary: PathBuf,
    root: PathBuf,
    compose_file: PathBuf,
    project: Option<String>,
    query_timeout: Duration,
    /// Removed from every child environment unless injected explicitly.
    secret_env: String,
}

impl DockerCli {
    pub fn new(config: &Config, root: &Path) -> Result<Self> {
        let binary = which::which(&config.runtime.binary).map_err(|_| {
            StackError::RuntimeUnavailable(format!(
                "'{}' not found; install Docker and ensure it is on your PATH",
                config.runtime.binary
            ))
        })?;
        Ok(Self {
            binary,
            root: root.to_path_buf(),
            compose_file: config.compose_path(root),
            project: config.project.clone(),
            query_timeout: Duration::from_secs(config.runtime.query_timeout_secs.max(1)),
            secret_env: config.secret.env.clone(),
        })
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.current_dir(&self.root);
        cmd.env_remove(&self.secret_env);
        cmd
    }

    fn compose_args(&self, rest: &[&str]) -> Vec<String> {
        compose_args(&self.compose_file, self.project.as_deref(), rest)
    }

    fn query(&self, args: &[String]) -> Result<Output> {
        let mut cmd = self.command();
        cmd.args(args);
        let rendered = render_command(args);
        run_with_timeout(cmd, self.query_timeout, &rendered)
    }

    fn run_logged(&self, args: &[String], log: &Path, mut cmd: Command) -> Result<Option<i32>> {
        if let Some(parent) = log.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let out = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log)?;
        let err = out.try_clone()?;
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(out))
            .stderr(Stdio::from(err));
        let status = cmd.status().map_err(|e| spawn_error(&e, &render_command(args)))?;
        if status.success() {
            Ok(None)
        } else {
            Ok(Some(status.code().unwrap_or(-1)))
        }
    }
}

impl ContainerRuntime for DockerCli {
    fn ping(&self) -> Result<()> {
        let info = self.query(&["info".into(), "--format".into(), "{{.ServerVersion}}".into()])?;
        if !info.status.success() {
            return Err(StackError::RuntimeUnavailable(stderr_text(&info)));
        }
        let compose = self.query(&["compose".into(), "version".into()])?;
        if !compose.status.success() {
            return Err(StackError::RuntimeUnavailable(format!(
                "docker compose is unavailable: {}",
                stderr_text(&compose)
            )));
        }
        Ok(())
    }

    fn image_exists(&self, image: &str) -> Result<bool> {
        let out = self.query(&[
            "image".into(),
            "inspect".into(),
            "--format".into(),
            "{{.Id}}".into(),
            image.into(),
        ])?;
        if out.status.success() {
            return Ok(true);
        }
        let stderr = stderr_text(&out);
        if is_not_found(&stderr) {
            return Ok(false);
        }
        Err(StackError::RuntimeUnavailable(stderr))
    }

    fn container_id(&self, service: &str) -> Result<Option<String>> {
        let out = self.query(&self.compose_args(&["ps", "-a", "-q", service]))?;
        if !out.status.success() {
            let stderr = stderr_text(&out);
            if is_not_found(&stderr) {
                return Ok(None);
            }
            return Err(StackError::RuntimeUnavailable(stderr));
        }
        Ok(String::from_utf8_lossy(&out.stdout)
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_string))
    }

    fn inspect_container(&self, id: &str) -> Result<ContainerState> {
        let out = self.query(&["inspect".into(), "--type".into(), "container".into(), id.into()])?;
        if !out.status.success() {
            return Err(StackError::RuntimeUnavailable(stderr_text(&out)));
        }
        parse_inspect(&String::from_utf8_lossy(&out.stdout))
    }

    fn logs(&self, service: &str, tail: usize) -> Result<Vec<String>> {
        let tail = tail.to_string();
        let out = self.query(&self.compose_args(&[
            "logs",
            "--no-color",
            "--no-log-prefix",
            "--tail",
            &tail,
            service,
        ]))?;
        if !out.status.success() {
            return Err(StackError::RuntimeUnavailable(stderr_text(&out)));
        }
        let mut lines: Vec<String> = String::from_utf8_lossy(&out.stdout)
            .lines()
            .map(str::to_string)
            .collect();
        lines.extend(String::from_utf8_lossy(&out.stderr).lines().map(str::to_string));
        Ok(lines)
    }

    fn supports_secret_mounts(&self) -> bool {
        self.query(&["buildx".into(), "version".into()])
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn build_image(&self, request: &BuildRequest<'_>) -> Result<()> {
        let args = build_args(request);
        let mut cmd = self.command();
        match request.secret {
            Some(SecretInjection::Mount { .. }) => {
                cmd.env("DOCKER_BUILDKIT", "1");
            }
            Some(SecretInjection::BuildArg { name, value }) => {
                cmd.env(name, value.expose());
            }
            None => {}
        }
        match self.run_logged(&args, request.log, cmd)? {
            None => Ok(()),
            Some(code) => Err(StackError::Build {
                service: request.service.to_string(),
                message: format!("build exited with {code}; see {}", request.log.display()),
            }),
        }
    }

    fn start_service(&self, service: &str, log: &Path) -> Result<()> {
        let args = self.compose_args(&["up", "-d", "--no-build", "--no-deps", service]);
        match self.run_logged(&args, log, self.command())? {
            None => Ok(()),
            Some(code) => Err(StackError::Launch {
                service: service.to_string(),
                message: format!("compose up exited with {code}; see {}", log.display()),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// UnavailableRuntime
// ---------------------------------------------------------------------------

/// Stand-in used when the runtime binary cannot be located, so read-only
/// commands can still produce a report. Every query fails with the reason.
pub struct UnavailableRuntime {
    reason: String,
}

impl UnavailableRuntime {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn error(&self) -> StackError {
        StackError::RuntimeUnavailable(self.reason.clone())
    }
}

impl ContainerRuntime for UnavailableRuntime {
    fn ping(&self) -> Result<()> {
        Err(self.error())
    }

    fn image_exists(&self, _image: &str) -> Result<bool> {
        Err(self.error())
    }

    fn container_id(&self, _service: &str) -> Result<Option<String>> {
        Err(self.error())
    }

    fn inspect_container(&self, _id: &str) -> Result<ContainerState> {
        Err(self.error())
    }

    fn logs(&self, _service: &str, _tail: usize) -> Result<Vec<String>> {
        Err(self.error())
    }

    fn supports_secret_mounts(&self) -> bool {
        false
    }

    fn build_image(&self, _request: &BuildRequest<'_>) -> Result<()> {
        Err(self.error())
    }

    fn start_service(&self, _service: &str, _log: &Path) -> Result<()> {
        Err(self.error())
    }
}

// ---------------------------------------------------------------------------
// Argument construction
// ---------------------------------------------------------------------------

pub fn compose_args(compose_file: &Path, project: Option<&str>, rest: &[&str]) -> Vec<String> {
    let mut args = vec!["compose".to_string()];
    if let Some(p) = project.filter(|p| !p.trim().is_empty()) {
        args.push("-p".into());
        args.push(p.to_string());
    }
    args.push("-f".into());
    args.push(compose_file.to_string_lossy().into_owned());
    args.extend(rest.iter().map(|s| s.to_string()));
    args
}

/// `docker build` arguments. The secret value never appears here: mounts
/// reference a file, build args reference an environment variable name.
pub fn build_args(request: &BuildRequest<'_>) -> Vec<String> {
    let mut args = vec!["build".to_string(), "-t".into(), request.image.to_string()];
    if let Some(dockerfile) = &request.dockerfile {
        args.push("-f".into());
        args.push(dockerfile.to_string_lossy().into_owned());
    }
    match request.secret {
        Some(SecretInjection::Mount { id, path }) => {
            args.push("--secret".into());
            args.push(format!("id={id},src={}", path.display()));
        }
        Some(SecretInjection::BuildArg { name, .. }) => {
            args.push("--build-arg".into());
            args.push(name.to_string());
        }
        None => {}
    }
    args.push(request.context.to_string_lossy().into_owned());
    args
}

fn render_command(args: &[String]) -> String {
    format!("docker {}", args.join(" "))
}

// ---------------------------------------------------------------------------
// `docker inspect` parsing
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectEntry {
    state: InspectState,
    #[serde(default)]
    restart_count: Option<u64>,
    #[serde(default)]
    config: Option<InspectConfig>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    #[serde(default)]
    status: String,
    #[serde(default)]
    exit_code: Option<i64>,
    #[serde(default)]
    health: Option<InspectHealth>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectHealth {
    #[serde(default)]
    status: String,
    #[serde(default)]
    log: Option<Vec<InspectHealthLog>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectHealthLog {
    #[serde(default)]
    output: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectConfig {
    #[serde(default)]
    env: Option<Vec<String>>,
}

pub fn parse_inspect(json: &str) -> Result<ContainerState> {
    let entries: Vec<InspectEntry> = serde_json::from_str(json)?;
    let entry = entries
        .into_iter()
        .next()
        .ok_or_else(|| StackError::RuntimeUnavailable("inspect returned no containers".into()))?;

    let (health, health_log) = match entry.state.health {
        Some(h) => {
            let last = h
                .log
                .unwrap_or_default()
                .pop()
                .map(|l| l.output.trim().to_string())
                .filter(|o| !o.is_empty());
            (Health::from_docker(&h.status), last)
        }
        None => (Health::None, None),
    };

    Ok(ContainerState {
        status: RuntimeStatus::from_docker(&entry.state.status),
        health,
        exit_code: entry.state.exit_code,
        restart_count: entry.restart_count,
        env: entry.config.and_then(|c| c.env).unwrap_or_default(),
        health_log,
    })
}

// ---------------------------------------------------------------------------
// Process helpers
// ---------------------------------------------------------------------------

fn is_not_found(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("no such image")
        || lower.contains("no such object")
        || lower.contains("no such container")
        || lower.contains("no such service")
}

fn stderr_text(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).trim().to_string()
}

fn spawn_error(err: &std::io::Error, command: &str) -> StackError {
    if err.kind() == std::io::ErrorKind::NotFound {
        return StackError::RuntimeUnavailable(format!("failed to run `{command}`: {err}"));
    }
    StackError::Io(std::io::Error::new(
        err.kind(),
        format!("failed to run `{command}`: {err}"),
    ))
}

/// Run a command to completion, killing it if it outlives `timeout`.
/// Output pipes are drained on helper threads so a chatty child cannot
/// block on a full pipe while we wait.
pub(crate) fn run_with_timeout(mut cmd: Command, timeout: Duration, rendered: &str) -> Result<Output> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = cmd.spawn().map_err(|e| spawn_error(&e, rendered))?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let out_reader = std::thread::spawn(move || drain(stdout));
    let err_reader = std::thread::spawn(move || drain(stderr));

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(StackError::QueryTimeout {
                command: rendered.to_string(),
                seconds: timeout.as_secs(),
            });
        }
        std::thread::sleep(Duration::from_millis(20));
    };

    Ok(Output {
        status,
        stdout: out_reader.join().unwrap_or_default(),
        stderr: err_reader.join().unwrap_or_default(),
    })
}

fn drain<R: Read>(source: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut s) = source {
        let _ = s.read_to_end(&mut buf);
    }
    buf
}
