//! Tool settings.

use crate::catalog::DEFAULT_CATALOG_URL;
use crate::error::Result;
use crate::proxy::DEFAULT_PROXY_CONFIG_PATH;
use crate::resolver_file::DEFAULT_RESOLVER_CONFIG_PATH;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Settings file looked up in the working directory.
pub const LOCAL_SETTINGS_FILE: &str = "smartdns-streams.toml";

/// System-wide settings file.
pub const SYSTEM_SETTINGS_FILE: &str = "/etc/smartdns-streams/config.toml";

/// Settings for managed files, catalog source, services, and logging.
///
/// # Example
///
/// ```
/// use smartdns_streams::Settings;
///
/// let settings = Settings::from_toml("[paths]\ncatalog = \"/srv/StreamConfig.yaml\"\n").unwrap();
///
/// assert_eq!(settings.paths.catalog.to_str(), Some("/srv/StreamConfig.yaml"));
/// assert_eq!(settings.paths.resolver_config.to_str(), Some("/etc/smartdns/smartdns.conf"));
/// assert_eq!(settings.logging.level, "info");
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Locations of managed and input files.
    pub paths: PathsConfig,
    /// Where the catalog is refreshed from.
    pub catalog: CatalogConfig,
    /// Service unit names.
    pub service: ServiceConfig,
    /// Log filter.
    pub logging: LoggingConfig,
}

/// File locations.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// SmartDNS config holding the managed blocks.
    pub resolver_config: PathBuf,
    /// sniproxy config holding the host tables.
    pub proxy_config: PathBuf,
    /// Local copy of the domain catalog.
    pub catalog: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            resolver_config: PathBuf::from(DEFAULT_RESOLVER_CONFIG_PATH),
            proxy_config: PathBuf::from(DEFAULT_PROXY_CONFIG_PATH),
            catalog: PathBuf::from("StreamConfig.yaml"),
        }
    }
}

/// Catalog download settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Remote catalog document.
    pub url: String,
    /// Download timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_CATALOG_URL.to_string(),
            timeout_secs: crate::catalog::DEFAULT_REFRESH_TIMEOUT.as_secs(),
        }
    }
}

/// systemd unit names.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// SmartDNS unit, restarted after resolver config changes.
    pub resolver_unit: String,
    /// sniproxy unit, restarted after host table changes.
    pub proxy_unit: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            resolver_unit: "smartdns".to_string(),
            proxy_unit: "sniproxy".to_string(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Values given on the command line, applied over the loaded settings.
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    /// Replaces `paths.resolver_config`.
    pub resolver_config: Option<PathBuf>,
    /// Replaces `paths.proxy_config`.
    pub proxy_config: Option<PathBuf>,
    /// Replaces `paths.catalog`.
    pub catalog: Option<PathBuf>,
    /// Replaces `logging.level`.
    pub log_level: Option<String>,
}

impl Settings {
    /// Loads settings, then applies `overrides`.
    ///
    /// Lookup order: `path` if given, [`LOCAL_SETTINGS_FILE`],
    /// [`SYSTEM_SETTINGS_FILE`], built-in defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Io`](crate::ManagerError::Io) if a chosen file
    /// cannot be read, or [`ManagerError::Config`](crate::ManagerError::Config)
    /// if it is not valid TOML.
    pub fn load(path: Option<&Path>, overrides: SettingsOverrides) -> Result<Self> {
        let mut settings = if let Some(path) = path {
            Self::from_file(path)?
        } else if Path::new(LOCAL_SETTINGS_FILE).exists() {
            Self::from_file(Path::new(LOCAL_SETTINGS_FILE))?
        } else if Path::new(SYSTEM_SETTINGS_FILE).exists() {
            Self::from_file(Path::new(SYSTEM_SETTINGS_FILE))?
        } else {
            Self::default()
        };
        settings.apply_overrides(overrides);
        Ok(settings)
    }

    /// Parses settings from TOML text; missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Config`](crate::ManagerError::Config) on
    /// invalid TOML.
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings = Self::from_toml(&content)?;
        tracing::debug!(path = %path.display(), "Loaded settings");
        Ok(settings)
    }

    fn apply_overrides(&mut self, overrides: SettingsOverrides) {
        if let Some(path) = overrides.resolver_config {
            self.paths.resolver_config = path;
        }
        if let Some(path) = overrides.proxy_config {
            self.paths.proxy_config = path;
        }
        if let Some(path) = overrides.catalog {
            self.paths.catalog = path;
        }
        if let Some(level) = overrides.log_level {
            self.logging.level = level;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = Settings::default();
        assert_eq!(s.paths.resolver_config, Path::new("/etc/smartdns/smartdns.conf"));
        assert_eq!(s.paths.proxy_config, Path::new("/etc/sniproxy.conf"));
        assert_eq!(s.service.resolver_unit, "smartdns");
        assert_eq!(s.catalog.timeout_secs, 30);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let s = Settings::from_toml("[logging]\nlevel = \"debug\"\n[service]\nproxy_unit = \"nginx\"\n")
            .unwrap();
        assert_eq!(s.logging.level, "debug");
        assert_eq!(s.service.proxy_unit, "nginx");
        assert_eq!(s.service.resolver_unit, "smartdns");
    }

    #[test]
    fn invalid_toml_is_rejected() {
        assert!(matches!(
            Settings::from_toml("[paths\n"),
            Err(crate::ManagerError::Config(_))
        ));
    }

    #[test]
    fn explicit_file_and_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[paths]\nresolver_config = \"/tmp/a.conf\"\n").unwrap();

        let s = Settings::load(
            Some(&path),
            SettingsOverrides {
                catalog: Some(PathBuf::from("/tmp/cat.yaml")),
                log_level: Some("warn".into()),
                ..SettingsOverrides::default()
            },
        )
        .unwrap();
        assert_eq!(s.paths.resolver_config, Path::new("/tmp/a.conf"));
        assert_eq!(s.paths.catalog, Path::new("/tmp/cat.yaml"));
        assert_eq!(s.logging.level, "warn");
    }

    #[test]
    fn missing_explicit_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(Settings::load(Some(&missing), SettingsOverrides::default()).is_err());
    }
}
