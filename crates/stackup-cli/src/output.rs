use serde::Serialize;
use std::path::Path;

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{json}");
    Ok(())
}

pub fn print_table(headers: &[&str], rows: &[Vec<String>]) {
    print!("{}", render_table(headers, rows));
}

/// Left-aligned columns separated by two spaces, with a dashed rule under
/// the header.
pub fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(w) = widths.get_mut(i) {
                *w = (*w).max(cell.len());
            }
        }
    }

    let line = |cells: Vec<String>| -> String {
        let padded: Vec<String> = cells
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{:width$}", c, width = widths.get(i).copied().unwrap_or(0)))
            .collect();
        format!("{}\n", padded.join("  ").trim_end())
    };

    let mut out = line(headers.iter().map(|h| h.to_string()).collect());
    out.push_str(&line(widths.iter().map(|&w| "-".repeat(w)).collect()));
    for row in rows {
        out.push_str(&line(row.clone()));
    }
    out
}

/// Print the last lines of a run log to stderr with a pointer to the full
/// report. Used on every fatal path.
pub fn print_failure_tail(log: &Path, lines: usize) {
    match stackup_core::io::tail_lines(log, lines) {
        Ok(tail) if !tail.is_empty() => {
            eprintln!("--- last {} lines of {} ---", tail.len(), log.display());
            for line in tail {
                eprintln!("  {line}");
            }
        }
        _ => {}
    }
    eprintln!("hint: run `stackup diagnose` for a full report");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_columns_align() {
        let rows = vec![
            vec!["db".to_string(), "running".to_string()],
            vec!["broker".to_string(), "exited".to_string()],
        ];
        let out = render_table(&["SERVICE", "STATUS"], &rows);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "SERVICE  STATUS");
        assert_eq!(lines[1], "-------  -------");
        assert_eq!(lines[2], "db       running");
        assert_eq!(lines[3], "broker   exited");
    }
}
