use crate::error::{Result, StackError};
use crate::io;
use crate::paths;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// LockRecord
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRecord {
    pub pid: u32,
    pub command: String,
    pub started_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// RunLock
// ---------------------------------------------------------------------------

/// Exclusive claim on a project root for one `start`/`update` run. The lock
/// file is removed when the guard drops.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Take the lock for `root`. A lock left by a dead process is replaced.
    pub fn acquire(root: &Path, command: &str) -> Result<Self> {
        let path = paths::lock_path(root);
        io::ensure_dir(&paths::state_dir(root))?;
        io::ensure_gitignore_entry(root, &format!("{}/", paths::STATE_DIR))?;

        let record = LockRecord {
            pid: std::process::id(),
            command: command.to_string(),
            started_at: Utc::now(),
        };
        let data = serde_yaml::to_string(&record)?;

        // Two attempts: the second follows removal of a stale lock.
        for _ in 0..2 {
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(mut file) => {
                    file.write_all(data.as_bytes())?;
                    tracing::debug!(lock = %path.display(), "run lock acquired");
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    match read_record(&path) {
                        Some(existing) if is_pid_alive(existing.pid) => {
                            return Err(StackError::AlreadyRunning {
                                pid: existing.pid,
                                lock: path.display().to_string(),
                            });
                        }
                        _ => {
                            tracing::warn!(lock = %path.display(), "removing stale run lock");
                            match std::fs::remove_file(&path) {
                                Ok(()) => {}
                                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                                Err(e) => return Err(e.into()),
                            }
                        }
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        let pid = read_record(&path).map(|r| r.pid).unwrap_or(0);
        Err(StackError::AlreadyRunning {
            pid,
            lock: path.display().to_string(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(lock = %self.path.display(), error = %e, "failed to remove run lock");
            }
        }
    }
}

/// Read the current holder, if any. Unreadable records count as stale.
pub fn read_record(path: &Path) -> Option<LockRecord> {
    let data = std::fs::read_to_string(path).ok()?;
    serde_yaml::from_str(&data).ok()
}

/// Returns true if the process is still alive (`kill -0 {pid}`).
pub fn is_pid_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        std::process::Command::new("kill")
            .args(["-0", &pid.to_string()])
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}
