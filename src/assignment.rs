//! Upstream assignments recovered from the resolver config.
//!
//! Each managed sub-platform lives in a sentinel-marked block:
//!
//! ```text
//! #> Netflix us
//! nameserver /netflix.com/us
//! nameserver /nflxvideo.net/us
//!
//! ```
//!
//! The assignment table is an index derived from these blocks and is
//! rebuilt from the file whenever it may have changed.

use crate::error::{ManagerError, Result};
use indexmap::IndexMap;
use std::fmt;
use std::str::FromStr;

/// Prefix of the comment line that opens a managed block.
pub const SENTINEL_PREFIX: &str = "#> ";

/// Assignments keyed by sub-platform, in file order.
pub type AssignmentTable = IndexMap<String, Assignment>;

/// How a sub-platform's domains are routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// Forward queries to an upstream server group.
    Nameserver,
    /// Answer queries with a fixed address.
    Address,
}

impl Method {
    /// The directive keyword for this method.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Nameserver => "nameserver",
            Self::Address => "address",
        }
    }

    /// Compares identifiers under this method's rules: group names ignore
    /// case, addresses must match exactly.
    #[must_use]
    pub fn same_identifier(self, a: &str, b: &str) -> bool {
        let (a, b) = (a.trim(), b.trim());
        match self {
            Self::Nameserver => a.to_lowercase() == b.to_lowercase(),
            Self::Address => a == b,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = ManagerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "nameserver" => Ok(Self::Nameserver),
            "address" => Ok(Self::Address),
            other => Err(ManagerError::InvalidMethod(other.to_string())),
        }
    }
}

/// The upstream currently bound to a sub-platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    /// `None` when the block has no recognized directive.
    pub method: Option<Method>,
    /// Upstream group name or literal address, as written in the sentinel.
    pub identifier: String,
}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.method {
            Some(method) => write!(f, "{method} {}", self.identifier),
            None => write!(f, "? {}", self.identifier),
        }
    }
}

/// The upstream being edited against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Rule method written for selected sub-platforms.
    pub method: Method,
    /// Group name (`nameserver`) or address (`address`).
    pub identifier: String,
}

impl Target {
    /// Targets an upstream DNS group.
    #[must_use]
    pub fn nameserver(group: impl Into<String>) -> Self {
        Self {
            method: Method::Nameserver,
            identifier: group.into().trim().to_string(),
        }
    }

    /// Targets a literal address.
    #[must_use]
    pub fn address(ip: impl Into<String>) -> Self {
        Self {
            method: Method::Address,
            identifier: ip.into().trim().to_string(),
        }
    }

    /// Builds the target used by the unlock pseudo-group.
    ///
    /// Prefers an `address` identifier already present in `table` that
    /// matches `preferred`, then any existing `address` identifier, then
    /// `preferred` itself. Returns `None` when nothing is known.
    #[must_use]
    pub fn for_unlock(preferred: Option<&str>, table: &AssignmentTable) -> Option<Self> {
        let preferred = preferred.map(str::trim).filter(|p| !p.is_empty());
        let mut fallback = None;
        for assignment in table.values() {
            if assignment.method != Some(Method::Address) {
                continue;
            }
            let ident = assignment.identifier.trim();
            if ident.is_empty() {
                continue;
            }
            if preferred.is_some_and(|p| p.eq_ignore_ascii_case(ident)) {
                return Some(Self::address(ident));
            }
            fallback.get_or_insert(ident);
        }
        fallback.or(preferred).map(Self::address)
    }

    /// Checks that the identifier is usable.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::EmptyIdentifier`] if it is blank.
    pub fn validate(&self) -> Result<()> {
        if self.identifier.trim().is_empty() {
            return Err(ManagerError::EmptyIdentifier);
        }
        Ok(())
    }

    /// Returns `true` if `assignment` routes to this target.
    #[must_use]
    pub fn matches(&self, assignment: &Assignment) -> bool {
        assignment.method == Some(self.method)
            && self
                .method
                .same_identifier(&assignment.identifier, &self.identifier)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.identifier)
    }
}

/// A resolver config line as seen by the block scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind<'a> {
    /// `#> <sub-platform> <identifier>`; the sub-platform may be empty.
    Sentinel {
        /// First token after the prefix.
        sub_platform: &'a str,
        /// Remaining tokens joined by single spaces.
        identifier: String,
    },
    /// `nameserver ...` or `address ...`.
    Directive(Method),
    /// Empty or whitespace-only.
    Blank,
    /// Anything else.
    Other,
}

/// Classifies a single line.
#[must_use]
pub fn classify_line(line: &str) -> LineKind<'_> {
    if let Some(rest) = line.strip_prefix(SENTINEL_PREFIX) {
        let mut fields = rest.split_whitespace();
        let sub_platform = fields.next().unwrap_or("");
        let identifier = fields.collect::<Vec<_>>().join(" ");
        return LineKind::Sentinel {
            sub_platform,
            identifier,
        };
    }
    let trimmed = line.trim();
    if trimmed.is_empty() {
        LineKind::Blank
    } else if trimmed.starts_with("nameserver ") {
        LineKind::Directive(Method::Nameserver)
    } else if trimmed.starts_with("address ") {
        LineKind::Directive(Method::Address)
    } else {
        LineKind::Other
    }
}

#[derive(Debug, Clone, Copy)]
enum ScanState<'a> {
    Scanning,
    /// `None` for a sentinel without a sub-platform name.
    InBlock(Option<&'a str>),
}

/// Rebuilds the assignment table from resolver config lines.
///
/// Malformed blocks never abort the scan: a sentinel with no sub-platform
/// is ignored, and a block without a directive keeps `method: None`. Only
/// the first directive of a block sets the method.
#[must_use]
pub fn parse_assignments<S: AsRef<str>>(lines: &[S]) -> AssignmentTable {
    let mut table = AssignmentTable::new();
    let mut state = ScanState::Scanning;

    for line in lines {
        match (classify_line(line.as_ref()), state) {
            (
                LineKind::Sentinel {
                    sub_platform,
                    identifier,
                },
                _,
            ) => {
                if sub_platform.is_empty() {
                    tracing::debug!("Ignoring sentinel without sub-platform");
                    state = ScanState::InBlock(None);
                    continue;
                }
                table.insert(
                    sub_platform.to_string(),
                    Assignment {
                        method: None,
                        identifier,
                    },
                );
                state = ScanState::InBlock(Some(sub_platform));
            }
            (LineKind::Blank, ScanState::InBlock(_)) => state = ScanState::Scanning,
            (LineKind::Directive(method), ScanState::InBlock(Some(sub))) => {
                if let Some(entry) = table.get_mut(sub) {
                    entry.method.get_or_insert(method);
                }
            }
            _ => {}
        }
    }

    for (sub, assignment) in &table {
        if assignment.method.is_none() {
            tracing::debug!(sub_platform = %sub, "Managed block has no directive");
        }
    }
    table
}
