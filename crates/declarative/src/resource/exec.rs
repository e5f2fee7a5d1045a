//! Exec resource: an opaque command with guards
//!
//! The exit status is the whole contract. Output is captured for reporting
//! only and never parsed.
//!
//! Guards are evaluated at check time, right before the command would run:
//! - `creates`: the command is skipped when the path exists
//! - `onlyif`: the command is skipped when the guard command exits 0
//!
//! Guard evaluation goes through read-only capabilities (file inspection and
//! [`CommandPurpose::Guard`] commands) and never changes host state.

use super::{AttrReader, Resource};
use crate::context::{CommandPurpose, CommandSpec, Providers};
use crate::diff::{Change, CheckOutcome};
use crate::error::CompileError;
use crate::types::{Attributes, ResourceId, ResourceKind};
use anyhow::Result;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

const ATTRIBUTES: &[&str] = &[
    "command",
    "creates",
    "onlyif",
    "refreshonly",
    "cwd",
    "environment",
    "timeout",
    "path",
];

/// A command exited with a nonzero (or no) status
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("command exited with {}", .status.map_or_else(|| "no status".to_string(), |s| s.to_string()))]
pub struct CommandExit {
    pub status: Option<i32>,
    pub stderr: String,
}

/// A condition that suppresses the command when satisfied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Guard {
    Creates(PathBuf),
    OnlyIf(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecSpec {
    pub command: String,
    pub creates: Option<PathBuf>,
    pub onlyif: Option<String>,
    /// Run only in response to a refresh event
    pub refreshonly: bool,
    pub cwd: Option<PathBuf>,
    pub environment: Vec<(String, String)>,
    pub timeout: Option<Duration>,
    pub path: Vec<String>,
}

impl ExecSpec {
    pub fn from_attributes(id: &ResourceId, attrs: &Attributes) -> Result<Self, CompileError> {
        let reader = AttrReader::new(id, attrs, ATTRIBUTES)?;

        let command = reader.name_or_title("command")?;
        if command.trim().is_empty() {
            return Err(reader.invalid("command", "must not be empty"));
        }

        let creates = reader.string("creates")?.map(PathBuf::from);
        if let Some(path) = &creates
            && !path.is_absolute()
        {
            return Err(reader.invalid("creates", format!("`{}` is not absolute", path.display())));
        }

        let environment = reader
            .list("environment")?
            .into_iter()
            .map(|entry| match entry.split_once('=') {
                Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
                _ => Err(reader.invalid("environment", format!("`{entry}` is not KEY=VALUE"))),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let timeout = match reader.int("timeout")? {
            None => None,
            Some(secs) if secs > 0 => Some(Duration::from_secs(secs.unsigned_abs())),
            Some(secs) => {
                return Err(reader.invalid("timeout", format!("{secs} is not a positive number of seconds")));
            }
        };

        Ok(Self {
            command,
            creates,
            onlyif: reader.string("onlyif")?,
            refreshonly: reader.bool("refreshonly")?.unwrap_or(false),
            cwd: reader.string("cwd")?.map(PathBuf::from),
            environment,
            timeout,
            path: reader.list("path")?,
        })
    }

    pub fn guards(&self) -> Vec<Guard> {
        let mut guards = Vec::new();
        if let Some(path) = &self.creates {
            guards.push(Guard::Creates(path.clone()));
        }
        if let Some(command) = &self.onlyif {
            guards.push(Guard::OnlyIf(command.clone()));
        }
        guards
    }

    fn command_spec(&self, command: &str, purpose: CommandPurpose) -> CommandSpec {
        CommandSpec {
            command: command.to_string(),
            cwd: self.cwd.clone(),
            environment: self.environment.clone(),
            path: self.path.clone(),
            timeout: self.timeout,
            purpose,
        }
    }

    /// The first guard that suppresses the command, if any
    fn satisfied_guard(&self, host: &Providers<'_>) -> Result<Option<Guard>> {
        for guard in self.guards() {
            let satisfied = match &guard {
                Guard::Creates(path) => host.files.inspect(path)?.exists(),
                Guard::OnlyIf(command) => host
                    .commands
                    .run(&self.command_spec(command, CommandPurpose::Guard))?
                    .success(),
            };
            if satisfied {
                return Ok(Some(guard));
            }
        }
        Ok(None)
    }

    fn run(&self, host: &Providers<'_>) -> Result<()> {
        log::debug!("Running: {}", self.command);
        let result = host
            .commands
            .run(&self.command_spec(&self.command, CommandPurpose::Action))?;
        if result.success() {
            Ok(())
        } else {
            Err(CommandExit {
                status: result.status,
                stderr: result.stderr_str().trim().to_string(),
            }
            .into())
        }
    }
}

impl Resource for ExecSpec {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Exec
    }

    fn description(&self) -> String {
        format!("Exec {}", self.command)
    }

    fn check(&self, host: &Providers<'_>) -> Result<CheckOutcome> {
        if self.refreshonly {
            return Ok(CheckOutcome::InSync);
        }
        if let Some(guard) = self.satisfied_guard(host)? {
            log::debug!("Skipping `{}`: {:?} satisfied", self.command, guard);
            return Ok(CheckOutcome::InSync);
        }
        Ok(CheckOutcome::Drifted(vec![Change::new("returns", "notrun", "0")]))
    }

    fn apply(&self, host: &Providers<'_>, _changes: &[Change]) -> Result<()> {
        self.run(host)
    }

    fn refresh(&self, host: &Providers<'_>) -> Result<bool> {
        if !self.refreshonly || self.satisfied_guard(host)?.is_some() {
            return Ok(false);
        }
        self.run(host)?;
        Ok(true)
    }

    fn verify_after_apply(&self) -> bool {
        false
    }
}
