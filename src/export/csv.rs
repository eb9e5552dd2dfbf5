use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;

/// Write collected rows (already comma-separated) under an optional header.
/// Returns the number of data rows written.
pub fn write_rows<'a>(
    path: &Path,
    header: Option<&str>,
    rows: impl IntoIterator<Item = &'a str>,
) -> Result<usize> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut w = BufWriter::new(file);
    if let Some(h) = header.map(str::trim).filter(|h| !h.is_empty()) {
        writeln!(w, "{}", h)?;
    }
    let mut count = 0;
    for row in rows {
        writeln!(w, "{}", row.trim_end_matches(['\r', '\n']))?;
        count += 1;
    }
    w.flush()?;
    Ok(count)
}

/// `<dir>/<device>-log-YYYYmmdd-HHMMSS.csv`
pub fn default_path(dir: &Path, device_name: &str) -> PathBuf {
    let safe: String = device_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let stamp = Local::now().format("%Y%m%d-%H%M%S");
    dir.join(format!("{}-log-{}.csv", safe, stamp))
}
