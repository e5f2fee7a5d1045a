//! Run reports

use crate::diff::Change;
use crate::error::{BlockedError, ResourceError};
use crate::types::{ResourceId, ResourceKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Final outcome of one resource in a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// Already in the declared state; nothing was done
    Unchanged,
    /// Changes were applied
    Changed {
        changes: Vec<Change>,
        /// Whether the resource was also refreshed (restart, refreshonly run)
        #[serde(default)]
        refreshed: bool,
    },
    /// Noop run: these changes would have been applied
    WouldChange { changes: Vec<Change> },
    Failed { error: ResourceError },
    Blocked { error: BlockedError },
    /// Not attempted, e.g. the run was cancelled
    Skipped { reason: String },
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Unchanged => "unchanged",
            Self::Changed { .. } => "changed",
            Self::WouldChange { .. } => "would change",
            Self::Failed { .. } => "failed",
            Self::Blocked { .. } => "blocked",
            Self::Skipped { .. } => "skipped",
        }
    }

    /// Applied, or would have been applied in a noop run
    pub fn is_change(&self) -> bool {
        matches!(self, Self::Changed { .. } | Self::WouldChange { .. })
    }

    /// Whether dependents may proceed after this outcome
    pub fn is_resolved(&self) -> bool {
        matches!(
            self,
            Self::Unchanged | Self::Changed { .. } | Self::WouldChange { .. }
        )
    }

    pub fn changes(&self) -> &[Change] {
        match self {
            Self::Changed { changes, .. } | Self::WouldChange { changes } => changes,
            _ => &[],
        }
    }
}

/// One entry of a run report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceReport {
    pub id: ResourceId,
    /// Class that declared the resource
    pub class: String,
    pub outcome: Outcome,
    pub duration_ms: u64,
}

/// Aggregate outcome counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    pub changed: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub blocked: usize,
    pub skipped: usize,
    pub would_change: usize,
}

impl Counts {
    pub fn add(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Unchanged => self.unchanged += 1,
            Outcome::Changed { .. } => self.changed += 1,
            Outcome::WouldChange { .. } => self.would_change += 1,
            Outcome::Failed { .. } => self.failed += 1,
            Outcome::Blocked { .. } => self.blocked += 1,
            Outcome::Skipped { .. } => self.skipped += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.changed + self.unchanged + self.failed + self.blocked + self.skipped + self.would_change
    }
}

impl fmt::Display for Counts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} changed, {} unchanged, {} failed, {} blocked",
            self.changed, self.unchanged, self.failed, self.blocked
        )?;
        if self.skipped > 0 {
            write!(f, ", {} skipped", self.skipped)?;
        }
        if self.would_change > 0 {
            write!(f, ", {} would change", self.would_change)?;
        }
        Ok(())
    }
}

/// Result of one convergence run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub noop: bool,
    /// Per-resource outcomes in plan order
    pub resources: Vec<ResourceReport>,
    pub counts: Counts,
}

impl RunReport {
    pub fn new(started_at: DateTime<Utc>, noop: bool) -> Self {
        Self {
            started_at,
            duration_ms: 0,
            noop,
            resources: Vec::new(),
            counts: Counts::default(),
        }
    }

    pub fn push(&mut self, entry: ResourceReport) {
        self.counts.add(&entry.outcome);
        self.resources.push(entry);
    }

    /// Every resource ended unchanged, changed, or would change
    pub fn is_success(&self) -> bool {
        self.counts.failed == 0 && self.counts.blocked == 0 && self.counts.skipped == 0
    }

    /// Process exit code for the run: 0 on success, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.is_success() { 0 } else { 1 }
    }

    pub fn entry(&self, kind: ResourceKind, title: &str) -> Option<&ResourceReport> {
        self.resources
            .iter()
            .find(|entry| entry.id.kind == kind && entry.id.title == title)
    }

    pub fn outcome_of(&self, kind: ResourceKind, title: &str) -> Option<&Outcome> {
        self.entry(kind, title).map(|entry| &entry.outcome)
    }

    /// Failed resources and their errors
    pub fn failures(&self) -> impl Iterator<Item = (&ResourceId, &ResourceError)> {
        self.resources.iter().filter_map(|entry| match &entry.outcome {
            Outcome::Failed { error } => Some((&entry.id, error)),
            _ => None,
        })
    }

    /// Number of resources that changed (or would change in noop)
    pub fn change_count(&self) -> usize {
        self.counts.changed + self.counts.would_change
    }
}
