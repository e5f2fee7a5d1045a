//! Drift between current and desired state

use serde::{Deserialize, Serialize};
use similar::TextDiff;

/// Largest file content, in bytes, for which a textual diff is rendered
const MAX_DIFF_BYTES: usize = 64 * 1024;

/// One property that differs from its declared value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    /// Property name (e.g. "ensure", "content", "enable")
    pub property: String,
    /// Current value as observed on the host
    pub current: String,
    /// Declared value
    pub desired: String,
    /// Unified diff for content changes, when both sides are small text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
}

impl Change {
    pub fn new(
        property: impl Into<String>,
        current: impl Into<String>,
        desired: impl Into<String>,
    ) -> Self {
        Self {
            property: property.into(),
            current: current.into(),
            desired: desired.into(),
            diff: None,
        }
    }

    pub fn with_diff(mut self, diff: Option<String>) -> Self {
        self.diff = diff;
        self
    }

    /// Short form for logs and error messages: `ensure: stopped -> running`
    pub fn summary(&self) -> String {
        format!("{}: {} -> {}", self.property, self.current, self.desired)
    }
}

/// Result of checking one resource against the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Current state already satisfies the declaration
    InSync,
    /// The listed properties need to change
    Drifted(Vec<Change>),
}

impl CheckOutcome {
    pub fn is_in_sync(&self) -> bool {
        matches!(self, Self::InSync)
    }

    /// Build an outcome from a list of changes, empty meaning in sync
    pub fn from_changes(changes: Vec<Change>) -> Self {
        if changes.is_empty() {
            Self::InSync
        } else {
            Self::Drifted(changes)
        }
    }

    pub fn changes(&self) -> &[Change] {
        match self {
            Self::InSync => &[],
            Self::Drifted(changes) => changes,
        }
    }
}

/// Hex BLAKE3 digest of file content
pub fn content_digest(content: &str) -> String {
    blake3::hash(content.as_bytes()).to_hex().to_string()
}

/// Shorten a digest for display
pub fn short_digest(digest: &str) -> &str {
    &digest[..digest.len().min(12)]
}

/// Render a unified diff between two texts, if both are small enough
pub fn unified_diff(path: &str, current: &str, desired: &str) -> Option<String> {
    if current.len() > MAX_DIFF_BYTES || desired.len() > MAX_DIFF_BYTES {
        return None;
    }

    let old_header = format!("{path} (current)");
    let new_header = format!("{path} (desired)");
    let diff = TextDiff::from_lines(current, desired);
    let rendered = diff
        .unified_diff()
        .context_radius(3)
        .header(&old_header, &new_header)
        .to_string();
    Some(rendered)
}

/// Counts of drift across a set of check outcomes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffSummary {
    /// Resources already in sync
    pub in_sync: usize,
    /// Resources that need changes
    pub drifted: usize,
    /// Individual properties that need changes
    pub properties: usize,
}

impl DiffSummary {
    pub fn add(&mut self, outcome: &CheckOutcome) {
        match outcome {
            CheckOutcome::InSync => self.in_sync += 1,
            CheckOutcome::Drifted(changes) => {
                self.drifted += 1;
                self.properties += changes.len();
            }
        }
    }

    /// Check if there are any changes
    pub fn has_changes(&self) -> bool {
        self.drifted > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_changes() {
        assert!(CheckOutcome::from_changes(Vec::new()).is_in_sync());
        let outcome = CheckOutcome::from_changes(vec![Change::new("ensure", "absent", "present")]);
        assert_eq!(outcome.changes().len(), 1);
        assert_eq!(outcome.changes()[0].summary(), "ensure: absent -> present");
    }

    #[test]
    fn test_content_digest_is_stable() {
        assert_eq!(content_digest("overlay\n"), content_digest("overlay\n"));
        assert_ne!(content_digest("overlay\n"), content_digest("br_netfilter\n"));
        assert_eq!(short_digest(&content_digest("x")).len(), 12);
    }

    #[test]
    fn test_unified_diff_marks_lines() {
        let diff = unified_diff("/etc/modules-load.d/k3s.conf", "overlay\n", "overlay\nbr_netfilter\n")
            .unwrap();
        assert!(diff.contains("+br_netfilter"));
        assert!(diff.contains("(desired)"));
    }

    #[test]
    fn test_diff_summary() {
        let mut summary = DiffSummary::default();
        summary.add(&CheckOutcome::InSync);
        summary.add(&CheckOutcome::Drifted(vec![
            Change::new("ensure", "stopped", "running"),
            Change::new("enable", "false", "true"),
        ]));
        assert_eq!(summary.in_sync, 1);
        assert_eq!(summary.drifted, 1);
        assert_eq!(summary.properties, 2);
        assert!(summary.has_changes());
    }
}
