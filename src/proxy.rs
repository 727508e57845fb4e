//! sniproxy host tables.
//!
//! Streaming domains are routed through sniproxy by listing them in named
//! tables:
//!
//! ```text
//! table https_hosts {
//!     .*netflix.com *
//!     .*nflxvideo.net *
//! }
//! ```
//!
//! Merging collects the entries of every block with the given name, drops
//! those blocks, and appends a single canonical block holding the old
//! entries followed by the new ones, without duplicates.

use crate::error::Result;
use crate::lines::{read_lines, write_lines};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Default sniproxy config path.
pub const DEFAULT_PROXY_CONFIG_PATH: &str = "/etc/sniproxy.conf";

/// Table matched by the HTTP listener.
pub const HTTP_HOSTS_TABLE: &str = "http_hosts";

/// Table matched by the TLS listener.
pub const HTTPS_HOSTS_TABLE: &str = "https_hosts";

const ENTRY_INDENT: &str = "    ";

/// Returns the managed-entry form of `domain` (`.*<domain> *`), or `None`
/// for a blank domain. Already-formatted entries are kept as they are.
#[must_use]
pub fn table_entry(domain: &str) -> Option<String> {
    let domain = domain.trim();
    if domain.is_empty() {
        return None;
    }
    if let Some(inner) = entry_host(domain) {
        return Some(format!(".*{inner} *"));
    }
    Some(format!(".*{domain} *"))
}

/// Extracts `<text>` from a `.*<text> *` entry.
fn entry_host(text: &str) -> Option<&str> {
    let inner = text.strip_prefix(".*")?.strip_suffix(" *")?.trim();
    (!inner.is_empty() && !inner.contains(char::is_whitespace)).then_some(inner)
}

/// Returns `true` if `line` opens a block for `table`: `table <table>`
/// followed by whitespace, `{`, or the end of the line.
fn is_table_header(line: &str, table: &str) -> bool {
    let Some(rest) = line.trim_start().strip_prefix("table") else {
        return false;
    };
    if !rest.starts_with(char::is_whitespace) {
        return false;
    }
    let Some(after) = rest.trim_start().strip_prefix(table) else {
        return false;
    };
    after.is_empty() || after.starts_with(char::is_whitespace) || after.starts_with('{')
}

/// Hosts of every `.*<host> *` entry in `text`; a single line may carry
/// several entries.
fn entry_hosts(text: &str) -> Vec<&str> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    tokens
        .windows(2)
        .filter_map(|pair| match pair {
            [host, "*"] => host.strip_prefix(".*").filter(|h| !h.is_empty()),
            _ => None,
        })
        .collect()
}

fn brace_delta(line: &str) -> i64 {
    line.chars().fold(0, |depth, c| match c {
        '{' => depth + 1,
        '}' => depth - 1,
        _ => depth,
    })
}

/// Text of `line` that lies inside the block braces.
fn inner_text(line: &str, opens: bool, closes: bool) -> &str {
    let mut text = line;
    if opens {
        text = text.split_once('{').map_or("", |(_, after)| after);
    }
    if closes {
        text = text.rsplit_once('}').map_or(text, |(before, _)| before);
    }
    text.trim()
}

/// Finds the end (exclusive) of a block whose header is `lines[start]`,
/// collecting managed entries along the way. Returns `None`, leaving
/// `entries` untouched, if the header is not followed by an opening brace
/// or the braces never close.
fn scan_block(lines: &[String], start: usize, entries: &mut Vec<String>) -> Option<usize> {
    let mut depth = 0_i64;
    let mut opened = false;
    let mut found = Vec::new();

    for (idx, line) in lines.iter().enumerate().skip(start) {
        let opens = !opened && line.contains('{');
        if !opened && !opens && idx > start && !line.trim().is_empty() {
            return None;
        }
        if opens {
            opened = true;
        }
        depth += brace_delta(line);
        let closes = opened && depth <= 0;

        if opened {
            found.extend(
                entry_hosts(inner_text(line, opens, closes))
                    .into_iter()
                    .map(|host| format!(".*{host} *")),
            );
        }
        if closes {
            entries.append(&mut found);
            return Some(idx + 1);
        }
    }
    if opened {
        tracing::warn!(line = start + 1, "Unterminated table block, leaving it as is");
    }
    None
}

/// Merges `new_domains` into the table named `table`.
///
/// Every existing block for `table` is removed, wherever it sits, and one
/// canonical block is appended at the end after a blank separator line.
/// Existing entries come first in their original order, then new ones;
/// duplicates are dropped. Merging the same domains twice yields the same
/// lines.
#[must_use]
pub fn merge_domains_into_table<S: AsRef<str>>(
    table: &str,
    new_domains: &[S],
    lines: &[String],
) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    let mut existing = Vec::new();
    let mut blocks = 0_usize;

    let mut idx = 0;
    while idx < lines.len() {
        if is_table_header(&lines[idx], table) {
            if let Some(end) = scan_block(lines, idx, &mut existing) {
                blocks += 1;
                idx = end;
                // Keep a single blank line where the block used to be.
                let out_ends_blank = out.last().is_some_and(|l| l.trim().is_empty());
                if out_ends_blank && lines.get(idx).is_some_and(|l| l.trim().is_empty()) {
                    idx += 1;
                }
                continue;
            }
        }
        out.push(lines[idx].clone());
        idx += 1;
    }

    let mut seen = HashSet::new();
    let merged: Vec<String> = existing
        .into_iter()
        .chain(new_domains.iter().filter_map(|d| table_entry(d.as_ref())))
        .filter(|entry| seen.insert(entry.clone()))
        .collect();

    if out.last().is_some_and(|l| !l.trim().is_empty()) {
        out.push(String::new());
    }
    out.push(format!("table {table} {{"));
    out.extend(merged.iter().map(|entry| format!("{ENTRY_INDENT}{entry}")));
    out.push("}".to_string());

    tracing::debug!(
        table = %table,
        replaced_blocks = blocks,
        entries = merged.len(),
        "Merged proxy table"
    );
    out
}

/// A loaded sniproxy config.
#[derive(Debug, Clone)]
pub struct ProxyFile {
    path: PathBuf,
    lines: Vec<String>,
}

impl ProxyFile {
    /// Reads the config at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Io`](crate::ManagerError::Io) if the file is
    /// absent or unreadable.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let lines = read_lines(&path)?;
        Ok(Self { path, lines })
    }

    /// Wraps already-loaded lines.
    #[must_use]
    pub fn from_lines(path: impl Into<PathBuf>, lines: Vec<String>) -> Self {
        Self {
            path: path.into(),
            lines,
        }
    }

    /// Returns the config path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the current lines.
    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Entries of every block named `table`, in file order.
    #[must_use]
    pub fn table_entries(&self, table: &str) -> Vec<String> {
        let mut entries = Vec::new();
        let mut idx = 0;
        while idx < self.lines.len() {
            if is_table_header(&self.lines[idx], table) {
                if let Some(end) = scan_block(&self.lines, idx, &mut entries) {
                    idx = end;
                    continue;
                }
            }
            idx += 1;
        }
        entries
    }

    /// Merges `domains` into each table in `tables`, in order.
    ///
    /// Returns `true` if the lines changed.
    pub fn merge_domains<S: AsRef<str>>(&mut self, tables: &[&str], domains: &[S]) -> bool {
        let before = self.lines.clone();
        for table in tables {
            self.lines = merge_domains_into_table(table, domains, &self.lines);
        }
        let changed = self.lines != before;
        if changed {
            tracing::info!(
                path = %self.path.display(),
                tables = ?tables,
                domains = domains.len(),
                "Updated proxy host tables"
            );
        }
        changed
    }

    /// Writes the lines back to disk.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Io`](crate::ManagerError::Io) on write failure.
    pub fn save(&self) -> Result<()> {
        write_lines(&self.path, &self.lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lines::split_lines;

    fn merge(table: &str, domains: &[&str], text: &str) -> Vec<String> {
        merge_domains_into_table(table, domains, &split_lines(text))
    }

    #[test]
    fn entry_shape() {
        assert_eq!(table_entry(" netflix.com ").as_deref(), Some(".*netflix.com *"));
        assert_eq!(table_entry(".*hulu.com *").as_deref(), Some(".*hulu.com *"));
        assert_eq!(table_entry("  "), None);
    }

    #[test]
    fn header_matching() {
        assert!(is_table_header("table http_hosts {", "http_hosts"));
        assert!(is_table_header("  table http_hosts{", "http_hosts"));
        assert!(is_table_header("table http_hosts", "http_hosts"));
        assert!(!is_table_header("table http_hosts_v2 {", "http_hosts"));
        assert!(!is_table_header("tablehttp_hosts {", "http_hosts"));
        assert!(!is_table_header("table {", "http_hosts"));
    }

    #[test]
    fn dedupes_existing_and_new() {
        let out = merge(
            "t",
            &["b", "c"],
            "table t {\n    .*a *\n    .*b *\n}\n",
        );
        assert_eq!(out, vec!["table t {", "    .*a *", "    .*b *", "    .*c *", "}"]);
    }

    #[test]
    fn collapses_duplicate_blocks_and_keeps_other_content() {
        let out = merge(
            "http_hosts",
            &["c.com"],
            "user daemon\n\
             \n\
             table http_hosts {\n    .*a.com *\n}\n\
             \n\
             listener 80 {\n    proto http\n    table http_hosts\n}\n\
             \n\
             table http_hosts { .*b.com * }\n\
             table http_hosts {\n    .*a.com *\n    # comment\n}\n",
        );
        assert_eq!(
            out,
            vec![
                "user daemon",
                "",
                "listener 80 {",
                "    proto http",
                "    table http_hosts",
                "}",
                "",
                "table http_hosts {",
                "    .*a.com *",
                "    .*b.com *",
                "    .*c.com *",
                "}",
            ]
        );
    }

    #[test]
    fn brace_on_next_line() {
        let out = merge("t", &[], "table t\n{\n    .*a *\n}\nresolver {\n}\n");
        assert_eq!(out, vec!["resolver {", "}", "", "table t {", "    .*a *", "}"]);
    }

    #[test]
    fn unterminated_block_is_left_alone() {
        let out = merge(
            "http_hosts",
            &["b"],
            "table http_hosts {\n    .*a *\nlistener 80 {\n    proto http\n    table http_hosts\n}\n",
        );
        assert_eq!(
            out,
            vec![
                "table http_hosts {",
                "    .*a *",
                "listener 80 {",
                "    proto http",
                "    table http_hosts",
                "}",
                "",
                "table http_hosts {",
                "    .*b *",
                "}",
            ]
        );
    }

    #[test]
    fn single_line_block_with_several_entries() {
        let out = merge("t", &["c"], "table t { .*a * .*b * }\n");
        assert_eq!(out, vec!["table t {", "    .*a *", "    .*b *", "    .*c *", "}"]);

        let file = ProxyFile::from_lines("/tmp/unused.conf", split_lines("table t {\n  .*x * .*y *\n}\n"));
        assert_eq!(file.table_entries("t"), vec![".*x *", ".*y *"]);
    }

    #[test]
    fn empty_file_gets_block_without_separator() {
        assert_eq!(merge("t", &["x.com"], ""), vec!["table t {", "    .*x.com *", "}"]);
    }

    #[test]
    fn merge_is_idempotent() {
        let first = merge("t", &["x.com", "y.com"], "user daemon\n");
        let second = merge_domains_into_table("t", &["x.com", "y.com"], &first);
        assert_eq!(first, second);
    }

    #[test]
    fn sequential_tables_are_stable() {
        let mut file = ProxyFile::from_lines("/tmp/unused.conf", split_lines("user daemon\n"));
        let tables = [HTTP_HOSTS_TABLE, HTTPS_HOSTS_TABLE];
        assert!(file.merge_domains(&tables, &["x.com"]));
        let after_first = file.lines().to_vec();
        assert!(!file.merge_domains(&tables, &["x.com"]));
        assert_eq!(file.lines(), after_first.as_slice());
        assert_eq!(file.table_entries(HTTP_HOSTS_TABLE), vec![".*x.com *"]);
        assert_eq!(file.table_entries(HTTPS_HOSTS_TABLE), vec![".*x.com *"]);
    }

    #[test]
    fn save_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sniproxy.conf");
        std::fs::write(&path, "user daemon\n").unwrap();
        let mut file = ProxyFile::open(&path).unwrap();
        file.merge_domains(&[HTTPS_HOSTS_TABLE], &["viu.tv"]);
        file.save().unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "user daemon\n\ntable https_hosts {\n    .*viu.tv *\n}\n"
        );
    }
}
