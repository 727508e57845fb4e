//! Service lifecycle control.

use crate::error::Result;
use std::fmt;
use std::process::Command;

/// Lifecycle action passed to the service manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    /// Start the unit now.
    Start,
    /// Stop the unit now.
    Stop,
    /// Stop and start the unit, picking up new config.
    Restart,
    /// Start the unit at boot.
    Enable,
}

impl ServiceAction {
    /// The `systemctl` verb.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
            Self::Enable => "enable",
        }
    }
}

impl fmt::Display for ServiceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Controls system services.
pub trait ServiceManager {
    /// Returns `true` if `unit` is running.
    fn is_active(&self, unit: &str) -> bool;

    /// Runs `action` on `unit`.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Io`](crate::ManagerError::Io) if the command
    /// cannot be run or exits unsuccessfully.
    fn control(&self, unit: &str, action: ServiceAction) -> Result<()>;
}

/// [`ServiceManager`] backed by `systemctl`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Systemctl;

impl ServiceManager for Systemctl {
    fn is_active(&self, unit: &str) -> bool {
        Command::new("systemctl")
            .args(["is-active", unit])
            .output()
            .is_ok_and(|out| String::from_utf8_lossy(&out.stdout).trim() == "active")
    }

    fn control(&self, unit: &str, action: ServiceAction) -> Result<()> {
        let status = Command::new("systemctl")
            .args([action.as_str(), unit])
            .status()?;
        if !status.success() {
            tracing::warn!(unit = %unit, action = %action, status = %status, "systemctl failed");
            return Err(std::io::Error::other(format!("systemctl {action} {unit}: {status}")).into());
        }
        tracing::info!(unit = %unit, action = %action, "Service updated");
        Ok(())
    }
}

/// Restarts `unit` if it is running. Returns `false` when it was not.
///
/// # Errors
///
/// Propagates the service manager's failure to restart the unit.
pub fn restart_if_active(services: &dyn ServiceManager, unit: &str) -> Result<bool> {
    if !services.is_active(unit) {
        return Ok(false);
    }
    services.control(unit, ServiceAction::Restart)?;
    Ok(true)
}
