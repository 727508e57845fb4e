//! Whole-file line storage.
//!
//! Files are read into an ordered list of lines with CRLF and lone CR
//! normalized to LF, and written back joined with LF plus one trailing
//! newline. A file that ends in a newline does not produce a phantom empty
//! last line, so `write(read(f))` is stable.

use crate::error::Result;
use std::path::Path;

/// Reads `path` as a list of lines.
///
/// # Errors
///
/// Returns [`ManagerError::Io`](crate::ManagerError::Io) if the file is
/// absent or unreadable.
pub fn read_lines(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)?;
    Ok(split_lines(&content))
}

/// Writes `lines` to `path`, replacing its content.
///
/// # Errors
///
/// Returns [`ManagerError::Io`](crate::ManagerError::Io) on permission or
/// space failure.
pub fn write_lines(path: &Path, lines: &[String]) -> Result<()> {
    std::fs::write(path, join_lines(lines))?;
    tracing::debug!(path = %path.display(), lines = lines.len(), "Wrote file");
    Ok(())
}

/// Splits text into lines after newline normalization.
#[must_use]
pub fn split_lines(content: &str) -> Vec<String> {
    let normalized = content.replace("\r\n", "\n").replace('\r', "\n");
    if normalized.is_empty() {
        return Vec::new();
    }
    let body = normalized.strip_suffix('\n').unwrap_or(&normalized);
    body.split('\n').map(str::to_owned).collect()
}

/// Joins lines with LF and a single trailing newline. No lines yields an
/// empty string.
#[must_use]
pub fn join_lines(lines: &[String]) -> String {
    if lines.is_empty() {
        return String::new();
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}
