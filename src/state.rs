//! Last-run summary persisted between invocations

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use declarative::{Counts, Outcome, RunReport};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const LAST_RUN_FILE: &str = "last_run.toml";

/// Summary of the most recent `edgeform apply`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastRun {
    pub role: String,
    pub hostname: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub noop: bool,
    pub exit_code: i32,
    pub counts: Counts,

    /// Resources that changed, or would have in a noop run
    #[serde(default)]
    pub changed: Vec<String>,

    #[serde(default)]
    pub problems: Vec<Problem>,
}

/// A resource that did not converge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    pub resource: String,
    /// `failed`, `blocked` or `skipped`
    pub status: String,
    pub message: String,
}

impl LastRun {
    pub fn from_report(role: &str, hostname: Option<&str>, report: &RunReport) -> Self {
        let mut changed = Vec::new();
        let mut problems = Vec::new();

        for entry in &report.resources {
            let message = match &entry.outcome {
                Outcome::Changed { .. } | Outcome::WouldChange { .. } => {
                    changed.push(entry.id.to_string());
                    continue;
                }
                Outcome::Unchanged => continue,
                Outcome::Failed { error } => error.to_string(),
                Outcome::Blocked { error } => error.to_string(),
                Outcome::Skipped { reason } => reason.clone(),
            };
            problems.push(Problem {
                resource: entry.id.to_string(),
                status: entry.outcome.label().to_string(),
                message,
            });
        }

        Self {
            role: role.to_string(),
            hostname: hostname.map(str::to_string),
            started_at: report.started_at,
            duration_ms: report.duration_ms,
            noop: report.noop,
            exit_code: report.exit_code(),
            counts: report.counts,
            changed,
            problems,
        }
    }

    pub fn file_in(dir: &Path) -> PathBuf {
        dir.join(LAST_RUN_FILE)
    }

    /// Load the summary from `dir`, `None` if no run was recorded yet
    pub fn load_from(dir: &Path) -> Result<Option<Self>> {
        let path = Self::file_in(dir);
        if !path.exists() {
            log::debug!("No last run recorded at {}", path.display());
            return Ok(None);
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read state file: {}", path.display()))?;
        let last_run = toml::from_str(&content)
            .with_context(|| format!("Failed to parse state file: {}", path.display()))?;
        Ok(Some(last_run))
    }

    pub fn save_to(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create state directory: {}", dir.display()))?;

        let path = Self::file_in(dir);
        let content = toml::to_string_pretty(self).context("Failed to serialize last run to TOML")?;
        fs::write(&path, content)
            .with_context(|| format!("Failed to write state file: {}", path.display()))?;

        log::debug!("Saved last run to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use declarative::{ApplyError, BlockedError, Change, ResourceId, ResourceReport};

    fn report() -> RunReport {
        let mut report = RunReport::new(Utc::now(), false);
        let mut push = |id: ResourceId, outcome: Outcome| {
            report.push(ResourceReport {
                id,
                class: "profiles::k3s_agent".to_string(),
                outcome,
                duration_ms: 3,
            });
        };
        push(ResourceId::package("curl"), Outcome::Unchanged);
        push(
            ResourceId::package("git"),
            Outcome::Changed {
                changes: vec![Change::new("ensure", "absent", "present")],
                refreshed: false,
            },
        );
        push(
            ResourceId::exec("install_k3s_agent"),
            Outcome::Failed {
                error: ApplyError::CommandFailed {
                    resource: ResourceId::exec("install_k3s_agent"),
                    status: Some(1),
                    stderr: String::new(),
                }
                .into(),
            },
        );
        push(
            ResourceId::service("k3s-agent"),
            Outcome::Blocked {
                error: BlockedError {
                    resource: ResourceId::service("k3s-agent"),
                    failed_dependency: ResourceId::exec("install_k3s_agent"),
                },
            },
        );
        report
    }

    #[test]
    fn test_summary_from_report() {
        let last = LastRun::from_report("roles::pi_worker", Some("pi-worker-01"), &report());
        assert_eq!(last.exit_code, 1);
        assert_eq!(last.changed, ["Package[git]"]);
        assert_eq!(last.problems.len(), 2);
        assert_eq!(last.problems[0].resource, "Exec[install_k3s_agent]");
        assert_eq!(last.problems[0].status, "failed");
        assert_eq!(last.problems[1].status, "blocked");
        assert!(last.problems[1].message.contains("Exec[install_k3s_agent]"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let last = LastRun::from_report("roles::pi_worker", None, &report());

        last.save_to(dir.path()).unwrap();
        let loaded = LastRun::load_from(dir.path()).unwrap();
        assert_eq!(loaded, Some(last));
    }

    #[test]
    fn test_load_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(LastRun::load_from(dir.path()).unwrap(), None);
    }
}
