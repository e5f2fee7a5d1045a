//! Error taxonomy for compilation, ordering, and convergence
//!
//! Compile and cycle errors abort a run before anything touches the host.
//! Check, apply, and blocked errors are scoped to one resource and end up
//! in the run report instead of aborting the run.

use crate::types::ResourceId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading manifest text
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The text is not valid TOML or does not have the manifest shape
    #[error("{source_name}: {source}")]
    Parse {
        source_name: String,
        #[source]
        source: toml::de::Error,
    },

    /// A resource table is missing a required key
    #[error("{source_name}: resource #{index} is missing `{field}`")]
    MissingField {
        source_name: String,
        index: usize,
        field: &'static str,
    },

    /// A resource declares a type the engine does not know
    #[error("{source_name}: unknown resource type `{type_name}`")]
    UnknownType {
        source_name: String,
        type_name: String,
    },

    /// A value cannot be represented as an attribute
    #[error("{source_name}: {resource} `{key}`: {reason}")]
    InvalidValue {
        source_name: String,
        resource: String,
        key: String,
        reason: String,
    },

    /// A relationship target is not of the form `Type[title]`
    #[error("{source_name}: invalid reference `{reference}`")]
    InvalidReference {
        source_name: String,
        reference: String,
    },

    /// Two manifests declare the same class
    #[error("class `{name}` is declared more than once")]
    DuplicateClass { name: String },
}

/// Errors that prevent a catalog from being compiled
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("unknown class `{name}`{}", .referenced_by.as_ref().map(|c| format!(" (referenced by `{c}`)")).unwrap_or_default())]
    UnknownClass {
        name: String,
        referenced_by: Option<String>,
    },

    #[error("class inclusion cycle: {}", .path.join(" -> "))]
    ClassCycle { path: Vec<String> },

    #[error("class `{class}` does not support os.family {} (supported: {})", .family.as_deref().unwrap_or("<missing fact>"), .supported.join(", "))]
    UnsupportedPlatform {
        class: String,
        family: Option<String>,
        supported: Vec<String>,
    },

    #[error("class `{class}` has no parameter `{param}`")]
    UnknownParameter { class: String, param: String },

    #[error("class `{class}` requires parameter `{param}`")]
    MissingParameter { class: String, param: String },

    #[error("class `{class}`{}: {message}", .resource.as_ref().map(|r| format!(" {r}")).unwrap_or_default())]
    Template {
        class: String,
        resource: Option<String>,
        message: String,
    },

    #[error("{resource}: invalid `{attribute}`: {reason}")]
    InvalidAttribute {
        resource: ResourceId,
        attribute: String,
        reason: String,
    },

    #[error("{resource} is declared with conflicting attributes in `{first_class}` and `{second_class}`")]
    DuplicateResource {
        resource: ResourceId,
        first_class: String,
        second_class: String,
    },

    #[error("{resource}: reference to undeclared {reference}")]
    UnresolvedReference {
        resource: ResourceId,
        reference: String,
    },
}

/// The resolved graph is not a DAG
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("dependency cycle: {}", format_cycle(.members))]
pub struct CycleError {
    /// Members of one cycle, in edge order
    pub members: Vec<ResourceId>,
}

fn format_cycle(members: &[ResourceId]) -> String {
    let mut parts: Vec<String> = members.iter().map(ToString::to_string).collect();
    if let Some(first) = members.first() {
        parts.push(first.to_string());
    }
    parts.join(" => ")
}

/// The current state of a resource could not be determined
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{resource}: could not check state: {cause}")]
pub struct CheckError {
    pub resource: ResourceId,
    pub cause: String,
}

/// A state-changing action failed or did not converge
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ApplyError {
    #[error("{resource}: {cause}")]
    ActionFailed { resource: ResourceId, cause: String },

    #[error("{resource}: command exited with {}", format_exit(.status, .stderr))]
    CommandFailed {
        resource: ResourceId,
        status: Option<i32>,
        stderr: String,
    },

    #[error("{resource}: still out of sync after apply ({})", .remaining.join(", "))]
    VerificationFailed {
        resource: ResourceId,
        remaining: Vec<String>,
    },
}

fn format_exit(status: &Option<i32>, stderr: &str) -> String {
    let status = status.map_or_else(|| "no status".to_string(), |s| s.to_string());
    if stderr.is_empty() {
        status
    } else {
        format!("{status}: {stderr}")
    }
}

impl ApplyError {
    pub fn resource(&self) -> &ResourceId {
        match self {
            Self::ActionFailed { resource, .. }
            | Self::CommandFailed { resource, .. }
            | Self::VerificationFailed { resource, .. } => resource,
        }
    }
}

/// A resource was not attempted because something it depends on failed
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{resource}: skipped because {failed_dependency} failed")]
pub struct BlockedError {
    pub resource: ResourceId,
    pub failed_dependency: ResourceId,
}

/// Per-resource failure recorded in a run report
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum ResourceError {
    #[error(transparent)]
    Check(#[from] CheckError),

    #[error(transparent)]
    Apply(#[from] ApplyError),
}

/// Errors that abort a whole run
#[derive(Debug, Error)]
pub enum Error {
    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("compile error: {0}")]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Cycle(#[from] CycleError),
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_error_names_members() {
        let err = CycleError {
            members: vec![ResourceId::package("a"), ResourceId::service("b")],
        };
        assert_eq!(
            err.to_string(),
            "dependency cycle: Package[a] => Service[b] => Package[a]"
        );
    }

    #[test]
    fn test_unknown_class_mentions_referrer() {
        let err = CompileError::UnknownClass {
            name: "profiles::missing".to_string(),
            referenced_by: Some("roles::pi_worker".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "unknown class `profiles::missing` (referenced by `roles::pi_worker`)"
        );
    }

    #[test]
    fn test_command_failed_message() {
        let err = ApplyError::CommandFailed {
            resource: ResourceId::exec("install_k3s_server"),
            status: Some(22),
            stderr: "curl: (22) 404".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Exec[install_k3s_server]: command exited with 22: curl: (22) 404"
        );
        assert_eq!(err.resource(), &ResourceId::exec("install_k3s_server"));
    }
}
