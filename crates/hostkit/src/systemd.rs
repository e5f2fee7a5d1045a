//! Service backend using `systemctl`.

use crate::command::run_program;
use crate::error::Error;
use declarative::{ServiceProvider, ServiceStatus};

/// Service provider backed by systemd
#[derive(Debug, Clone, Default)]
pub struct Systemd;

impl Systemd {
    pub fn new() -> Self {
        Self
    }

    /// Run a query verb; its nonzero exit is an answer, not a failure
    fn query(verb: &str, unit: &str) -> Result<String, Error> {
        let output = run_program("systemctl", &[verb, unit], &[])?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn control(verb: &str, unit: &str) -> Result<(), Error> {
        log::info!("systemctl {verb} {unit}");
        let output = run_program("systemctl", &[verb, unit], &[])?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("not found") || stderr.contains("does not exist") {
            return Err(Error::NotFound {
                name: unit.to_string(),
            });
        }
        Err(Error::CommandFailed {
            program: format!("systemctl {verb} {unit}"),
            status: output.status.code(),
            stderr: stderr.trim().to_string(),
        })
    }
}

impl ServiceProvider for Systemd {
    fn status(&self, name: &str) -> anyhow::Result<ServiceStatus> {
        Ok(ServiceStatus {
            running: is_active(&Self::query("is-active", name)?),
            enabled: is_enabled(&Self::query("is-enabled", name)?),
        })
    }

    fn start(&self, name: &str) -> anyhow::Result<()> {
        Ok(Self::control("start", name)?)
    }

    fn stop(&self, name: &str) -> anyhow::Result<()> {
        Ok(Self::control("stop", name)?)
    }

    fn restart(&self, name: &str) -> anyhow::Result<()> {
        Ok(Self::control("restart", name)?)
    }

    fn set_enabled(&self, name: &str, enabled: bool) -> anyhow::Result<()> {
        Ok(Self::control(if enabled { "enable" } else { "disable" }, name)?)
    }
}

/// `systemctl is-active` output counts as running
///
/// `activating` and `reloading` are treated as running so a unit in the
/// middle of starting is not started twice.
pub fn is_active(state: &str) -> bool {
    matches!(state, "active" | "activating" | "reloading")
}

/// `systemctl is-enabled` output counts as enabled at boot
pub fn is_enabled(state: &str) -> bool {
    matches!(state, "enabled" | "enabled-runtime" | "alias" | "static" | "indirect")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_active() {
        assert!(is_active("active"));
        assert!(is_active("activating"));
        assert!(!is_active("inactive"));
        assert!(!is_active("failed"));
        assert!(!is_active(""));
    }

    #[test]
    fn test_is_enabled() {
        assert!(is_enabled("enabled"));
        assert!(is_enabled("static"));
        assert!(!is_enabled("disabled"));
        assert!(!is_enabled("masked"));
        assert!(!is_enabled("not-found"));
    }
}
