//! Error types.

use thiserror::Error;

/// Result alias for configuration-management operations.
pub type Result<T> = std::result::Result<T, ManagerError>;

/// Errors returned by configuration-management operations.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// Filesystem I/O failed (typically `PermissionDenied` on `/etc/smartdns/`).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A rule method other than `nameserver` or `address` was requested.
    #[error("invalid rule method: {0:?}")]
    InvalidMethod(String),

    /// The upstream group name or address is blank.
    #[error("identifier must not be empty")]
    EmptyIdentifier,

    /// No usable domain was supplied for a sub-platform.
    #[error("no domains to write for {sub_platform}")]
    EmptyDomains {
        /// The sub-platform whose domain list is empty.
        sub_platform: String,
    },

    /// The sub-platform is bound to a different target.
    #[error("{sub_platform} is already assigned to {owner}")]
    Conflict {
        /// The contested sub-platform.
        sub_platform: String,
        /// Identifier of the current owner.
        owner: String,
    },

    /// A group, server index, or catalog entry does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A value that should be an IPv4 address is not one.
    #[error("invalid IPv4 address: {0}")]
    InvalidAddress(String),

    /// The domain catalog document could not be decoded.
    #[error("invalid domain catalog: {0}")]
    Catalog(#[from] serde_yaml::Error),

    /// The settings file could not be decoded.
    #[error("invalid settings: {0}")]
    Config(#[from] toml::de::Error),

    /// A download or address lookup failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl ManagerError {
    /// Returns `true` if the underlying I/O error is `PermissionDenied`.
    #[must_use]
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::Io(e) if e.kind() == std::io::ErrorKind::PermissionDenied)
    }

    /// Returns `true` for errors raised before any write was attempted.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidMethod(_) | Self::EmptyIdentifier | Self::EmptyDomains { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_denied_is_detected() {
        let err = ManagerError::from(std::io::Error::from(std::io::ErrorKind::PermissionDenied));
        assert!(err.is_permission_denied());
        assert!(!ManagerError::EmptyIdentifier.is_permission_denied());
    }

    #[test]
    fn validation_errors() {
        assert!(ManagerError::EmptyIdentifier.is_validation());
        assert!(ManagerError::InvalidMethod("server".into()).is_validation());
        assert!(
            ManagerError::EmptyDomains {
                sub_platform: "Netflix".into()
            }
            .is_validation()
        );
        assert!(!ManagerError::NotFound("us".into()).is_validation());
    }
}
