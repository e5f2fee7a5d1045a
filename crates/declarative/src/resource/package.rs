//! Package resource

use super::{AttrReader, Resource};
use crate::context::Providers;
use crate::diff::{Change, CheckOutcome};
use crate::error::CompileError;
use crate::types::{Attributes, ResourceId, ResourceKind};
use anyhow::Result;
use std::fmt;

const ATTRIBUTES: &[&str] = &["ensure", "name"];

/// Declared package state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageEnsure {
    Present,
    Absent,
    /// Removed along with its configuration files
    Purged,
    /// Whatever version the package manager considers newest
    Latest,
    /// An exact version string
    Version(String),
}

impl PackageEnsure {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "present" | "installed" => Some(Self::Present),
            "absent" => Some(Self::Absent),
            "purged" => Some(Self::Purged),
            "latest" => Some(Self::Latest),
            v if looks_like_version(v) => Some(Self::Version(v.to_string())),
            _ => None,
        }
    }
}

impl fmt::Display for PackageEnsure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Present => f.write_str("present"),
            Self::Absent => f.write_str("absent"),
            Self::Purged => f.write_str("purged"),
            Self::Latest => f.write_str("latest"),
            Self::Version(v) => f.write_str(v),
        }
    }
}

/// Debian versions start with a digit, optionally after an `epoch:`
fn looks_like_version(value: &str) -> bool {
    value.chars().next().is_some_and(|c| c.is_ascii_digit())
        && !value.chars().any(char::is_whitespace)
}

/// A package that should be installed, pinned, or removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSpec {
    pub name: String,
    pub ensure: PackageEnsure,
}

impl PackageSpec {
    pub fn from_attributes(id: &ResourceId, attrs: &Attributes) -> Result<Self, CompileError> {
        let reader = AttrReader::new(id, attrs, ATTRIBUTES)?;
        let ensure = match reader.string("ensure")? {
            None => PackageEnsure::Present,
            Some(value) => PackageEnsure::parse(&value).ok_or_else(|| {
                reader.invalid(
                    "ensure",
                    format!("`{value}` is not present, absent, purged, latest, or a version"),
                )
            })?,
        };

        Ok(Self {
            name: reader.name_or_title("name")?,
            ensure,
        })
    }
}

impl Resource for PackageSpec {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Package
    }

    fn description(&self) -> String {
        format!("Package {} ({})", self.name, self.ensure)
    }

    fn check(&self, host: &Providers<'_>) -> Result<CheckOutcome> {
        let status = host.packages.query(&self.name)?;
        let current = status.installed.as_deref();
        let current_label = current.unwrap_or("absent");

        let change = match (&self.ensure, current) {
            (PackageEnsure::Present, None) => Some(Change::new("ensure", "absent", "present")),
            (PackageEnsure::Absent | PackageEnsure::Purged, Some(version)) => {
                Some(Change::new("ensure", version, self.ensure.to_string()))
            }
            (PackageEnsure::Purged, None) if status.config_files_remain => {
                Some(Change::new("ensure", "config-files", "purged"))
            }
            (PackageEnsure::Version(wanted), _) if current != Some(wanted.as_str()) => {
                Some(Change::new("ensure", current_label, wanted.clone()))
            }
            (PackageEnsure::Latest, None) => Some(Change::new("ensure", "absent", "latest")),
            (PackageEnsure::Latest, Some(version)) => host
                .packages
                .candidate_version(&self.name)?
                .filter(|candidate| candidate != version)
                .map(|candidate| Change::new("ensure", version, candidate)),
            _ => None,
        };

        Ok(CheckOutcome::from_changes(change.into_iter().collect()))
    }

    fn apply(&self, host: &Providers<'_>, _changes: &[Change]) -> Result<()> {
        match &self.ensure {
            PackageEnsure::Present | PackageEnsure::Latest => host.packages.install(&self.name, None),
            PackageEnsure::Version(version) => host.packages.install(&self.name, Some(version)),
            PackageEnsure::Absent => host.packages.remove(&self.name, false),
            PackageEnsure::Purged => host.packages.remove(&self.name, true),
        }
    }
}
