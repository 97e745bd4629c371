use thiserror::Error;

#[derive(Debug, Error)]
pub enum StackError {
    #[error("config not found: no stackup.yaml in {0}")]
    ConfigNotFound(String),

    #[error("compose file not found: {0}")]
    ComposeFileNotFound(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("service '{service}' depends on unknown service '{dependency}'")]
    UnknownDependency { service: String, dependency: String },

    #[error("dependency cycle between services: {0}")]
    DependencyCycle(String),

    #[error("container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("runtime query timed out after {seconds}s: {command}")]
    QueryTimeout { command: String, seconds: u64 },

    #[error("dependency staging failed (exit {code:?}):\n{output}")]
    Staging { code: Option<i32>, output: String },

    #[error("hook '{name}' failed (exit {code:?}):\n{output}")]
    Hook {
        name: String,
        code: Option<i32>,
        output: String,
    },

    #[error("image build failed for '{service}': {message}")]
    Build { service: String, message: String },

    #[error("failed to start service '{service}': {message}")]
    Launch { service: String, message: String },

    #[error("a secret is already provisioned for this run")]
    SecretInUse,

    #[error("another run is in progress (PID {pid}); remove {lock} if it is stale")]
    AlreadyRunning { pid: u32, lock: String },

    #[error("interrupted")]
    Interrupted,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl StackError {
    /// Errors raised before any build or start attempt: the run aborts
    /// without touching the stack.
    pub fn is_environment(&self) -> bool {
        matches!(
            self,
            StackError::ConfigNotFound(_)
                | StackError::ComposeFileNotFound(_)
                | StackError::InvalidConfig(_)
                | StackError::UnknownDependency { .. }
                | StackError::DependencyCycle(_)
                | StackError::RuntimeUnavailable(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, StackError>;
