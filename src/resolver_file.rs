//! In-memory view of the SmartDNS resolver config.
//!
//! Every edit happens on the loaded lines; nothing touches the disk until
//! [`ResolverFile::save`]. Managed blocks are identified by their sentinel
//! comment, so hand-written directives elsewhere in the file survive.

use crate::assignment::{
    AssignmentTable, LineKind, Method, SENTINEL_PREFIX, classify_line, parse_assignments,
};
use crate::error::{ManagerError, Result};
use crate::lines::{read_lines, write_lines};
use std::path::{Path, PathBuf};

/// Default SmartDNS config path.
pub const DEFAULT_RESOLVER_CONFIG_PATH: &str = "/etc/smartdns/smartdns.conf";

/// Config written when SmartDNS has no config yet.
pub const DEFAULT_RESOLVER_CONFIG: &str = "bind [::]:53

dualstack-ip-selection no
speed-check-mode none
serve-expired-prefetch-time 21600
prefetch-domain yes
cache-size 32768
cache-persist yes
cache-file /etc/smartdns/cache
serve-expired yes
serve-expired-ttl 259200
serve-expired-reply-ttl 3
cache-checkpoint-time 86400

# default upstream DNS
server 8.8.8.8
server 8.8.4.4
";

/// A loaded resolver config.
///
/// # Example
///
/// ```rust,ignore
/// use smartdns_streams::{Method, ResolverFile};
///
/// let mut file = ResolverFile::open("/etc/smartdns/smartdns.conf")?;
/// file.remove_rules("Netflix");
/// file.write_rules(Method::Nameserver, &["netflix.com".into()], "us", "Netflix")?;
/// file.save()?;
/// ```
#[derive(Debug, Clone)]
pub struct ResolverFile {
    path: PathBuf,
    lines: Vec<String>,
}

impl ResolverFile {
    /// Reads the config at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Io`] if the file is absent or unreadable.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let lines = read_lines(&path)?;
        Ok(Self { path, lines })
    }

    /// Reads the config at `path`, first writing [`DEFAULT_RESOLVER_CONFIG`]
    /// if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Io`] if the directory or file cannot be
    /// created or read.
    pub fn open_or_init(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, DEFAULT_RESOLVER_CONFIG)?;
            tracing::info!(path = %path.display(), "Wrote default SmartDNS config");
        }
        Self::open(path)
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

    pub(crate) fn lines_mut(&mut self) -> &mut Vec<String> {
        &mut self.lines
    }

    /// Rebuilds the assignment table from the current lines.
    #[must_use]
    pub fn assignments(&self) -> AssignmentTable {
        parse_assignments(&self.lines)
    }

    /// Returns `true` if a managed block exists for `sub_platform`.
    #[must_use]
    pub fn has_block(&self, sub_platform: &str) -> bool {
        self.lines.iter().any(|l| is_sentinel_for(l, sub_platform))
    }

    /// Appends a managed block for `sub_platform`.
    ///
    /// Does not remove an existing block for the same sub-platform; call
    /// [`remove_rules`](Self::remove_rules) first.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::EmptyIdentifier`] or
    /// [`ManagerError::EmptyDomains`] without touching the lines.
    pub fn write_rules(
        &mut self,
        method: Method,
        domains: &[String],
        identifier: &str,
        sub_platform: &str,
    ) -> Result<()> {
        let block = render_block(method, domains, identifier, sub_platform)?;
        let directives = block.len() - 2;
        self.lines.extend(block);
        tracing::info!(
            sub_platform = %sub_platform,
            method = %method,
            identifier = %identifier.trim(),
            domains = directives,
            "Added platform rules"
        );
        Ok(())
    }

    /// Removes the first managed block for `sub_platform`.
    ///
    /// The block runs from its sentinel through the next blank line
    /// inclusive; a following sentinel also ends it. Returns `false` if no
    /// block was found.
    pub fn remove_rules(&mut self, sub_platform: &str) -> bool {
        let Some(start) = self
            .lines
            .iter()
            .position(|l| is_sentinel_for(l, sub_platform))
        else {
            tracing::debug!(sub_platform = %sub_platform, "No managed block to remove");
            return false;
        };

        let mut end = start + 1;
        while end < self.lines.len() {
            match classify_line(&self.lines[end]) {
                LineKind::Blank => {
                    end += 1;
                    break;
                }
                LineKind::Sentinel { .. } => break,
                _ => end += 1,
            }
        }
        self.lines.drain(start..end);
        tracing::info!(sub_platform = %sub_platform, "Removed platform rules");
        true
    }

    /// Writes the lines back to disk.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Io`] on write failure.
    pub fn save(&self) -> Result<()> {
        write_lines(&self.path, &self.lines)
    }
}

/// Renders a managed block: sentinel, one directive per non-blank domain in
/// the given order, and the terminating blank line.
///
/// # Errors
///
/// Returns [`ManagerError::EmptyIdentifier`] if `identifier` is blank, or
/// [`ManagerError::EmptyDomains`] if no domain is usable.
pub fn render_block(
    method: Method,
    domains: &[String],
    identifier: &str,
    sub_platform: &str,
) -> Result<Vec<String>> {
    let identifier = identifier.trim();
    if identifier.is_empty() {
        return Err(ManagerError::EmptyIdentifier);
    }
    let directives: Vec<String> = domains
        .iter()
        .map(|d| d.trim())
        .filter(|d| !d.is_empty())
        .map(|d| format!("{method} /{d}/{identifier}"))
        .collect();
    if directives.is_empty() {
        return Err(ManagerError::EmptyDomains {
            sub_platform: sub_platform.to_string(),
        });
    }

    let mut block = Vec::with_capacity(directives.len() + 2);
    block.push(format!("{SENTINEL_PREFIX}{sub_platform} {identifier}"));
    block.extend(directives);
    block.push(String::new());
    Ok(block)
}

fn is_sentinel_for(line: &str, sub_platform: &str) -> bool {
    matches!(classify_line(line), LineKind::Sentinel { sub_platform: s, .. } if s == sub_platform)
}
