//! Service resource

use super::{AttrReader, Resource};
use crate::context::Providers;
use crate::diff::{Change, CheckOutcome};
use crate::error::CompileError;
use crate::types::{Attributes, ResourceId, ResourceKind};
use anyhow::Result;

const ATTRIBUTES: &[&str] = &["ensure", "enable", "name", "hasrestart"];

/// Declared run state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceEnsure {
    Running,
    Stopped,
}

impl ServiceEnsure {
    fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
        }
    }
}

fn run_state(running: bool) -> &'static str {
    if running { "running" } else { "stopped" }
}

/// A service whose run state and boot enablement are managed
///
/// Either property may be left unmanaged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    pub name: String,
    pub ensure: Option<ServiceEnsure>,
    pub enable: Option<bool>,
    /// Restart with a single restart call instead of stop + start
    pub hasrestart: bool,
}

impl ServiceSpec {
    pub fn from_attributes(id: &ResourceId, attrs: &Attributes) -> Result<Self, CompileError> {
        let reader = AttrReader::new(id, attrs, ATTRIBUTES)?;
        let ensure = match reader.string("ensure")?.as_deref() {
            None => None,
            Some("running") => Some(ServiceEnsure::Running),
            Some("stopped") => Some(ServiceEnsure::Stopped),
            Some(other) => {
                return Err(reader.invalid(
                    "ensure",
                    format!("`{other}` is not running or stopped"),
                ));
            }
        };

        Ok(Self {
            name: reader.name_or_title("name")?,
            ensure,
            enable: reader.bool("enable")?,
            hasrestart: reader.bool("hasrestart")?.unwrap_or(true),
        })
    }
}

impl Resource for ServiceSpec {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Service
    }

    fn description(&self) -> String {
        let mut parts = Vec::new();
        if let Some(ensure) = self.ensure {
            parts.push(ensure.as_str().to_string());
        }
        if let Some(enable) = self.enable {
            parts.push(if enable { "enabled" } else { "disabled" }.to_string());
        }
        if parts.is_empty() {
            format!("Service {}", self.name)
        } else {
            format!("Service {} ({})", self.name, parts.join(", "))
        }
    }

    fn check(&self, host: &Providers<'_>) -> Result<CheckOutcome> {
        let status = host.services.status(&self.name)?;
        let mut changes = Vec::new();

        if let Some(ensure) = self.ensure {
            let want_running = ensure == ServiceEnsure::Running;
            if status.running != want_running {
                changes.push(Change::new(
                    "ensure",
                    run_state(status.running),
                    ensure.as_str(),
                ));
            }
        }
        if let Some(enable) = self.enable
            && status.enabled != enable
        {
            changes.push(Change::new(
                "enable",
                status.enabled.to_string(),
                enable.to_string(),
            ));
        }

        Ok(CheckOutcome::from_changes(changes))
    }

    fn apply(&self, host: &Providers<'_>, changes: &[Change]) -> Result<()> {
        for change in changes {
            match change.property.as_str() {
                "enable" => host
                    .services
                    .set_enabled(&self.name, change.desired == "true")?,
                "ensure" if change.desired == "running" => host.services.start(&self.name)?,
                "ensure" => host.services.stop(&self.name)?,
                other => anyhow::bail!("unexpected service property `{other}`"),
            }
        }
        Ok(())
    }

    fn refresh(&self, host: &Providers<'_>) -> Result<bool> {
        if self.ensure == Some(ServiceEnsure::Stopped) {
            return Ok(false);
        }

        let status = host.services.status(&self.name)?;
        if !status.running && self.ensure.is_none() {
            // Unmanaged and not running: nothing to restart
            return Ok(false);
        }

        log::debug!("Restarting service {}", self.name);
        if self.hasrestart {
            host.services.restart(&self.name)?;
        } else {
            if status.running {
                host.services.stop(&self.name)?;
            }
            host.services.start(&self.name)?;
        }
        Ok(true)
    }
}
