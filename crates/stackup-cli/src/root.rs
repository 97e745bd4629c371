use std::path::{Path, PathBuf};

/// Resolve the project root.
///
/// Priority:
/// 1. `--root` flag / `STACKUP_ROOT` env var (passed in as `explicit`)
/// 2. Walk upward from `cwd` looking for `stackup.yaml`
/// 3. Walk upward from `cwd` looking for `.git/`
/// 4. Fall back to `cwd`
pub fn resolve_root(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    find_root_from(&cwd)
}

fn find_root_from(start: &Path) -> PathBuf {
    if let Some(dir) = walk_up(start, |d| d.join(stackup_core::paths::CONFIG_FILE).is_file()) {
        return dir;
    }
    if let Some(dir) = walk_up(start, |d| d.join(".git").is_dir()) {
        return dir;
    }
    start.to_path_buf()
}

fn walk_up(start: &Path, found: impl Fn(&Path) -> bool) -> Option<PathBuf> {
    start.ancestors().find(|d| found(d)).map(Path::to_path_buf)
}
