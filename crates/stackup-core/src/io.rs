use crate::error::Result;
use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

/// Create a directory and all parents, idempotent.
pub fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)?;
    Ok(())
}

/// Append text to a file, creating it (and its parent) if it doesn't exist.
pub fn append_text(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut f = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    f.write_all(text.as_bytes())?;
    Ok(())
}

/// Return the last `n` lines of a file without loading it whole.
///
/// Tool output lands in these files unfiltered, so bytes that are not valid
/// UTF-8 are replaced rather than failing the read.
pub fn tail_lines(path: &Path, n: usize) -> Result<Vec<String>> {
    let file = std::fs::File::open(path)?;
    let mut window: VecDeque<Vec<u8>> = VecDeque::with_capacity(n.min(1024));
    for line in BufReader::new(file).split(b'\n') {
        let mut line = line?;
        if n == 0 {
            continue;
        }
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        if window.len() == n {
            window.pop_front();
        }
        window.push_back(line);
    }
    Ok(window
        .into_iter()
        .map(|line| String::from_utf8_lossy(&line).into_owned())
        .collect())
}

/// Keep the last `n` lines of an in-memory string.
pub fn tail_str(text: &str, n: usize) -> Vec<String> {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].iter().map(|l| l.to_string()).collect()
}

/// Add `entry` to `root/.gitignore` if it isn't already present.
///
/// Checks for an exact line match. Appends with a leading newline separator
/// if the file doesn't already end with one.
pub fn ensure_gitignore_entry(root: &Path, entry: &str) -> Result<()> {
    let gitignore = root.join(".gitignore");
    let existing = if gitignore.exists() {
        std::fs::read_to_string(&gitignore)?
    } else {
        String::new()
    };
    if existing.lines().any(|l| l == entry) {
        return Ok(());
    }
    let sep = if existing.is_empty() || existing.ends_with('\n') {
        ""
    } else {
        "\n"
    };
    let mut f = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&gitignore)?;
    writeln!(f, "{sep}{entry}")?;
    Ok(())
}
