use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// File and directory constants
// ---------------------------------------------------------------------------

pub const CONFIG_FILE: &str = "stackup.yaml";
pub const STATE_DIR: &str = ".stackup";
pub const LOCK_FILE: &str = ".stackup/run.lock";

pub const DEFAULT_LOG_DIR: &str = "logs";
pub const BUILD_LOG: &str = "build.log";
pub const STARTUP_LOG: &str = "startup.log";
pub const UPDATE_LOG: &str = "update.log";
pub const DIAGNOSTICS_LOG: &str = "diagnostics.log";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn state_dir(root: &Path) -> PathBuf {
    root.join(STATE_DIR)
}

pub fn lock_path(root: &Path) -> PathBuf {
    root.join(LOCK_FILE)
}

/// Resolve a possibly-relative path from config against the project root.
pub fn resolve(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}
