use crate::error::{Result, StackError};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// ServiceConfig
// ---------------------------------------------------------------------------

/// One managed service. Defined statically in `stackup.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    pub name: String,
    /// Declared startup rank; breaks ties between services at the same
    /// dependency depth.
    #[serde(default)]
    pub order: u32,
    pub image: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Whether the service declares a health probe. Services without one
    /// report health `none` and are never rebuilt for lack of health data.
    #[serde(default)]
    pub health_check: bool,
    #[serde(default)]
    pub build: Option<BuildConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    #[serde(default = "default_context")]
    pub context: PathBuf,
    #[serde(default)]
    pub dockerfile: Option<PathBuf>,
    /// Inject the build secret into this image.
    #[serde(default)]
    pub secret: bool,
}

fn default_context() -> PathBuf {
    PathBuf::from(".")
}

// ---------------------------------------------------------------------------
// ReadinessConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_poll_interval() -> u64 {
    5
}

fn default_timeout() -> u64 {
    120
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            timeout_secs: default_timeout(),
        }
    }
}

// ---------------------------------------------------------------------------
// DiagnosticsConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsConfig {
    #[serde(default = "default_tail_lines")]
    pub tail_lines: usize,
    /// Container environment variables that may appear in reports.
    #[serde(default = "default_env_allowlist")]
    pub env_allowlist: Vec<String>,
}

fn default_tail_lines() -> usize {
    20
}

fn default_env_allowlist() -> Vec<String> {
    [
        "SERVICE_ROLE",
        "APP_ROLE",
        "BROKER_URL",
        "CELERY_BROKER_URL",
        "REDIS_URL",
        "DATABASE_HOST",
        "DATABASE_PORT",
        "LOG_LEVEL",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            tail_lines: default_tail_lines(),
            env_allowlist: default_env_allowlist(),
        }
    }
}

// ---------------------------------------------------------------------------
// SecretConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretConfig {
    /// Environment variable the secret value is read from.
    #[serde(default = "default_secret_env")]
    pub env: String,
    /// Secret id used for mount-based injection (`RUN --mount=type=secret,id=...`).
    #[serde(default = "default_secret_id")]
    pub id: String,
}

fn default_secret_env() -> String {
    "SECRET_KEY".to_string()
}

fn default_secret_id() -> String {
    "secret_key".to_string()
}

impl Default for SecretConfig {
    fn default() -> Self {
        Self {
            env: default_secret_env(),
            id: default_secret_id(),
        }
    }
}

// ---------------------------------------------------------------------------
// RuntimeConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_binary")]
    pub binary: String,
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,
}

fn default_binary() -> String {
    "docker".to_string()
}

fn default_query_timeout() -> u64 {
    10
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            query_timeout_secs: default_query_timeout(),
        }
    }
}

// ---------------------------------------------------------------------------
// HooksConfig
// ---------------------------------------------------------------------------

/// External steps run as black boxes. Each is an argv list; empty means
/// the step is not configured.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HooksConfig {
    #[serde(default)]
    pub load_env: Vec<String>,
    #[serde(default)]
    pub verify_models: Vec<String>,
    #[serde(default)]
    pub stage_dependencies: Vec<String>,
    #[serde(default)]
    pub build_frontend: Vec<String>,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Compose project name (`-p`). Defaults to the compose tool's own choice.
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default = "default_compose_file")]
    pub compose_file: PathBuf,
    /// The externally-facing service the readiness gate polls.
    pub primary: String,
    pub services: Vec<ServiceConfig>,
    #[serde(default)]
    pub readiness: ReadinessConfig,
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
    #[serde(default)]
    pub secret: SecretConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub hooks: HooksConfig,
    /// Compiled frontend assets; when missing, `build_frontend` runs.
    #[serde(default)]
    pub frontend_output: Option<PathBuf>,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

fn default_compose_file() -> PathBuf {
    PathBuf::from("docker-compose.yml")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from(paths::DEFAULT_LOG_DIR)
}

impl Config {
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(StackError::ConfigNotFound(root.display().to_string()));
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn service(&self, name: &str) -> Option<&ServiceConfig> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn primary_service(&self) -> Result<&ServiceConfig> {
        self.service(&self.primary).ok_or_else(|| {
            StackError::InvalidConfig(format!(
                "primary service '{}' is not declared in services",
                self.primary
            ))
        })
    }

    pub fn log_dir(&self, root: &Path) -> PathBuf {
        paths::resolve(root, &self.log_dir)
    }

    pub fn compose_path(&self, root: &Path) -> PathBuf {
        paths::resolve(root, &self.compose_file)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Structural checks that make a run impossible are errors; questionable
    /// but runnable settings come back as warnings.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>> {
        if self.services.is_empty() {
            return Err(StackError::InvalidConfig("no services declared".into()));
        }

        let mut seen = HashSet::new();
        for svc in &self.services {
            if svc.name.trim().is_empty() {
                return Err(StackError::InvalidConfig("service with empty name".into()));
            }
            if !seen.insert(svc.name.as_str()) {
                return Err(StackError::InvalidConfig(format!(
                    "duplicate service name '{}'",
                    svc.name
                )));
            }
        }

        let primary = self.primary_service()?;

        // Rejects unknown dependencies and cycles.
        crate::launch::launch_order(&self.services)?;

        if self.readiness.poll_interval_secs == 0 {
            return Err(StackError::InvalidConfig(
                "readiness.poll_interval_secs must be greater than zero".into(),
            ));
        }

        let mut warnings = Vec::new();

        if !primary.health_check {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "primary service '{}' has no health_check; the readiness gate can only time out",
                    primary.name
                ),
            });
        }

        if self
            .diagnostics
            .env_allowlist
            .iter()
            .any(|name| name == &self.secret.env)
        {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "diagnostics.env_allowlist contains the secret variable '{}'; it will be ignored",
                    self.secret.env
                ),
            });
        }

        for svc in &self.services {
            if let Some(build) = &svc.build {
                if build.context.as_os_str().is_empty() {
                    warnings.push(ConfigWarning {
                        level: WarnLevel::Warning,
                        message: format!("service '{}' has an empty build context", svc.name),
                    });
                }
            }
        }

        if self.readiness.timeout_secs < self.readiness.poll_interval_secs {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "readiness.timeout_secs is shorter than one poll interval".into(),
            });
        }

        Ok(warnings)
    }

    /// Checks that need the project tree. A buildable service whose context
    /// directory is missing would fail at build time, so it is an error.
    pub fn check_paths(&self, root: &Path) -> Vec<ConfigWarning> {
        self.services
            .iter()
            .filter_map(|svc| {
                let build = svc.build.as_ref()?;
                if build.context.as_os_str().is_empty() {
                    return None;
                }
                let context = paths::resolve(root, &build.context);
                (!context.is_dir()).then(|| ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!(
                        "service '{}' build context {} does not exist",
                        svc.name,
                        context.display()
                    ),
                })
            })
            .collect()
    }
}
