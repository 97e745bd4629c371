//! Build secret provisioning.
//!
//! The secret value lives in memory as a [`SecretValue`] and, for the
//! duration of one build step, in an owner-only temp file under the state
//! directory. The file is a [`tempfile::TempPath`], so it is removed when the
//! [`SecretHandle`] drops: on normal return, on error return, and while
//! unwinding. Termination signals are turned into cancellation by the CLI, so
//! an interrupted build also unwinds through the drop.

use crate::error::{Result, StackError};
use crate::io;
use crate::runtime::SecretInjection;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::TempPath;

// ---------------------------------------------------------------------------
// SecretValue
// ---------------------------------------------------------------------------

/// A sensitive value. `Debug` and `Display` never print it.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue(String);

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Read the value from the process environment. Unset and empty
    /// variables both yield `None`.
    pub fn from_env(name: &str) -> Option<Self> {
        std::env::var(name)
            .ok()
            .filter(|v| !v.is_empty())
            .map(SecretValue)
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretValue([redacted])")
    }
}

impl fmt::Display for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[redacted]")
    }
}

// ---------------------------------------------------------------------------
// SecretStrategy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretStrategy {
    Mount,
    BuildArg,
}

impl SecretStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            SecretStrategy::Mount => "mount",
            SecretStrategy::BuildArg => "build-arg",
        }
    }
}

// ---------------------------------------------------------------------------
// SecretHandle
// ---------------------------------------------------------------------------

/// The in-flight secret: the value plus its transient file.
pub struct SecretHandle<'a> {
    value: &'a SecretValue,
    path: Option<TempPath>,
    id: &'a str,
    env_name: &'a str,
}

impl<'a> SecretHandle<'a> {
    pub fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or(Path::new(""))
    }

    pub fn injection(&self, strategy: SecretStrategy) -> SecretInjection<'_> {
        match strategy {
            SecretStrategy::Mount => SecretInjection::Mount {
                id: self.id,
                path: self.path(),
            },
            SecretStrategy::BuildArg => SecretInjection::BuildArg {
                name: self.env_name,
                value: self.value,
            },
        }
    }

    /// Remove the file now and surface any removal error.
    fn close(mut self) -> Result<()> {
        if let Some(path) = self.path.take() {
            path.close()?;
        }
        Ok(())
    }
}

impl fmt::Debug for SecretHandle<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretHandle")
            .field("path", &self.path())
            .field("value", self.value)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Provisioner
// ---------------------------------------------------------------------------

/// Hands out at most one live [`SecretHandle`] at a time.
pub struct Provisioner {
    dir: PathBuf,
    id: String,
    env_name: String,
    live: AtomicBool,
}

/// Clears the live flag however the scope ends.
struct LiveGuard<'a>(&'a AtomicBool);

impl Drop for LiveGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Provisioner {
    /// `dir` holds the transient file; `id` is the mount id and `env_name`
    /// the build-arg name.
    pub fn new(dir: impl Into<PathBuf>, id: impl Into<String>, env_name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            id: id.into(),
            env_name: env_name.into(),
            live: AtomicBool::new(false),
        }
    }

    /// Materialize `value` into a transient file, run `body` with it, and
    /// remove the file on every exit path.
    pub fn with_secret<T>(
        &self,
        value: &SecretValue,
        body: impl FnOnce(&SecretHandle<'_>) -> Result<T>,
    ) -> Result<T> {
        if self.live.swap(true, Ordering::SeqCst) {
            return Err(StackError::SecretInUse);
        }
        let _guard = LiveGuard(&self.live);

        let handle = self.acquire(value)?;
        tracing::debug!(path = %handle.path().display(), "secret file provisioned");

        let result = body(&handle);
        let removed = handle.close();
        tracing::debug!("secret file removed");

        let value = result?;
        removed?;
        Ok(value)
    }

    fn acquire<'a>(&'a self, value: &'a SecretValue) -> Result<SecretHandle<'a>> {
        io::ensure_dir(&self.dir)?;
        restrict_dir(&self.dir)?;

        // NamedTempFile is created 0600 on unix.
        let mut file = tempfile::Builder::new()
            .prefix(".secret-")
            .tempfile_in(&self.dir)?;
        file.write_all(value.expose().as_bytes())?;
        file.as_file().sync_all()?;

        Ok(SecretHandle {
            value,
            path: Some(file.into_temp_path()),
            id: &self.id,
            env_name: &self.env_name,
        })
    }
}

#[cfg(unix)]
fn restrict_dir(dir: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_dir(_dir: &Path) -> Result<()> {
    Ok(())
}
