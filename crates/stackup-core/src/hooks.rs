//! External pre-launch steps run as black boxes with a pass/fail contract.

use crate::config::HooksConfig;
use crate::error::{Result, StackError};
use crate::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Lines of hook output carried in the error on failure.
const OUTPUT_TAIL: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    LoadEnv,
    VerifyModels,
    StageDependencies,
    BuildFrontend,
}

impl HookKind {
    pub fn as_str(self) -> &'static str {
        match self {
            HookKind::LoadEnv => "load_env",
            HookKind::VerifyModels => "verify_models",
            HookKind::StageDependencies => "stage_dependencies",
            HookKind::BuildFrontend => "build_frontend",
        }
    }

    pub fn argv(self, hooks: &HooksConfig) -> &[String] {
        match self {
            HookKind::LoadEnv => &hooks.load_env,
            HookKind::VerifyModels => &hooks.verify_models,
            HookKind::StageDependencies => &hooks.stage_dependencies,
            HookKind::BuildFrontend => &hooks.build_frontend,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOutcome {
    Ran,
    /// No command configured for the step.
    NotConfigured,
}

pub struct HookRunner {
    root: PathBuf,
    log: PathBuf,
    secret_env: String,
    cache_dir: Option<PathBuf>,
}

impl HookRunner {
    pub fn new(root: &Path, log: impl Into<PathBuf>, secret_env: &str) -> Self {
        Self {
            root: root.to_path_buf(),
            log: log.into(),
            secret_env: secret_env.to_string(),
            cache_dir: None,
        }
    }

    /// Exported as `STACKUP_CACHE_DIR` to the staging step.
    pub fn with_cache_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.cache_dir = dir;
        self
    }

    pub fn run(&self, kind: HookKind, hooks: &HooksConfig) -> Result<HookOutcome> {
        let argv = kind.argv(hooks);
        let Some((program, args)) = argv.split_first() else {
            tracing::debug!(hook = kind.as_str(), "hook not configured");
            return Ok(HookOutcome::NotConfigured);
        };

        tracing::info!(hook = kind.as_str(), command = %argv.join(" "), "running hook");
        io::append_text(
            &self.log,
            &format!(
                "\n=== hook {} {} ===\n$ {}\n",
                kind.as_str(),
                chrono::Utc::now().to_rfc3339(),
                argv.join(" ")
            ),
        )?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&self.root)
            .env_remove(&self.secret_env)
            .stdin(Stdio::null());
        if kind == HookKind::StageDependencies {
            if let Some(dir) = &self.cache_dir {
                cmd.env("STACKUP_CACHE_DIR", dir);
            }
        }

        let output = match cmd.output() {
            Ok(output) => output,
            Err(e) => {
                let message = format!("failed to run '{program}': {e}");
                io::append_text(&self.log, &format!("{message}\n"))?;
                return Err(failure(kind, None, message));
            }
        };

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        io::append_text(&self.log, &text)?;

        if output.status.success() {
            tracing::info!(hook = kind.as_str(), "hook finished");
            return Ok(HookOutcome::Ran);
        }

        let code = output.status.code();
        tracing::error!(hook = kind.as_str(), code = ?code, "hook failed");
        Err(failure(kind, code, io::tail_str(&text, OUTPUT_TAIL).join("\n")))
    }
}

fn failure(kind: HookKind, code: Option<i32>, output: String) -> StackError {
    match kind {
        HookKind::StageDependencies => StackError::Staging { code, output },
        _ => StackError::Hook {
            name: kind.as_str().to_string(),
            code,
            output,
        },
    }
}
