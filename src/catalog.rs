//! Streaming-platform domain catalog.
//!
//! The catalog is a two-level YAML document:
//!
//! ```yaml
//! USA:
//!   Netflix:
//!     - netflix.com
//!     - nflxvideo.net
//!   Hulu:
//! ```
//!
//! Document order is kept at every level; domains are written to the
//! resolver config in that order.

use crate::error::Result;
use indexmap::IndexMap;
use std::path::Path;
use std::time::Duration;

/// Default timeout for [`DomainCatalog::refresh`].
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(30);

/// Default remote location of the catalog document.
pub const DEFAULT_CATALOG_URL: &str =
    "https://raw.githubusercontent.com/kilvil/oneclick_smartdns/main/StreamConfig.yaml";

type RawCatalog = IndexMap<String, Option<IndexMap<String, Option<Vec<Option<String>>>>>>;

/// Read-only mapping of top category → sub-platform → domains.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainCatalog {
    entries: IndexMap<String, IndexMap<String, Vec<String>>>,
}

impl DomainCatalog {
    /// Loads the catalog from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Io`](crate::ManagerError::Io) if the file
    /// cannot be read, or [`ManagerError::Catalog`](crate::ManagerError::Catalog)
    /// if it is not a valid catalog document.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let catalog = Self::from_yaml(&content)?;
        tracing::debug!(
            path = %path.display(),
            categories = catalog.entries.len(),
            "Loaded domain catalog"
        );
        Ok(catalog)
    }

    /// Parses a catalog document.
    ///
    /// Null sub-platforms and null domain lists load as empty lists. Empty
    /// sub-platform names and blank domains are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Catalog`](crate::ManagerError::Catalog) on
    /// malformed YAML or an unexpected shape.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let blank = content.lines().all(|l| {
            let l = l.trim();
            l.is_empty() || l.starts_with('#')
        });
        if blank {
            return Ok(Self::default());
        }
        let raw: Option<RawCatalog> = serde_yaml::from_str(content)?;
        let mut entries = IndexMap::new();
        for (top, subs) in raw.unwrap_or_default() {
            let top = top.trim().to_string();
            let mut platforms = IndexMap::new();
            for (sub, domains) in subs.unwrap_or_default() {
                let sub = sub.trim().to_string();
                if sub.is_empty() {
                    tracing::debug!(top = %top, "Skipping unnamed sub-platform");
                    continue;
                }
                let domains = domains
                    .unwrap_or_default()
                    .into_iter()
                    .flatten()
                    .map(|d| d.trim().trim_matches('"').trim().to_string())
                    .filter(|d| !d.is_empty())
                    .collect();
                platforms.insert(sub, domains);
            }
            entries.insert(top, platforms);
        }
        Ok(Self { entries })
    }

    /// Builds a catalog in memory.
    #[must_use]
    pub fn from_entries(entries: IndexMap<String, IndexMap<String, Vec<String>>>) -> Self {
        Self { entries }
    }

    /// Returns the domains of `top`/`sub`, or an empty slice if unknown.
    #[must_use]
    pub fn domains(&self, top: &str, sub: &str) -> &[String] {
        self.entries
            .get(top)
            .and_then(|subs| subs.get(sub))
            .map_or(&[], Vec::as_slice)
    }

    /// Top-level categories in document order.
    pub fn top_categories(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Sub-platforms of `top` in document order.
    pub fn sub_platforms(&self, top: &str) -> impl Iterator<Item = &str> {
        self.entries
            .get(top)
            .into_iter()
            .flat_map(|subs| subs.keys().map(String::as_str))
    }

    /// Every `(top, sub, domains)` triple in document order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &[String])> {
        self.entries.iter().flat_map(|(top, subs)| {
            subs.iter()
                .map(move |(sub, domains)| (top.as_str(), sub.as_str(), domains.as_slice()))
        })
    }

    /// Returns `true` if `top`/`sub` exists.
    #[must_use]
    pub fn contains(&self, top: &str, sub: &str) -> bool {
        self.entries.get(top).is_some_and(|subs| subs.contains_key(sub))
    }

    /// Returns `true` if the catalog has no categories.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Downloads the catalog from `url`, validates it, and replaces `path`.
    ///
    /// The file is only written once the downloaded document parses.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Http`](crate::ManagerError::Http) on network
    /// failure or a non-success status, [`ManagerError::Catalog`](crate::ManagerError::Catalog)
    /// if the document is invalid, or [`ManagerError::Io`](crate::ManagerError::Io)
    /// if it cannot be saved.
    pub fn refresh(url: &str, path: &Path, timeout: Duration) -> Result<Self> {
        tracing::info!(url = %url, timeout_secs = timeout.as_secs(), "Downloading domain catalog");
        let client = reqwest::blocking::Client::builder().timeout(timeout).build()?;
        let body = client.get(url).send()?.error_for_status()?.text()?;
        let catalog = Self::from_yaml(&body)?;
        std::fs::write(path, body)?;
        tracing::info!(
            path = %path.display(),
            categories = catalog.entries.len(),
            "Domain catalog refreshed"
        );
        Ok(catalog)
    }
}
