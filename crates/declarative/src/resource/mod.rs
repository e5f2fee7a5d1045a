//! Resource trait and typed resource specs
//!
//! Every compiled resource is validated into one of the typed specs below.
//! Each spec knows how to:
//! - Check the host (current vs declared state)
//! - Apply the minimal change to converge
//! - Respond to refresh events sent along notify/subscribe edges

use crate::context::Providers;
use crate::diff::{Change, CheckOutcome};
use crate::error::CompileError;
use crate::types::{AttrValue, Attributes, ResourceId, ResourceKind};
use anyhow::Result;
use std::fmt;

pub mod exec;
pub mod file;
pub mod package;
pub mod service;

pub use exec::{CommandExit, ExecSpec, Guard};
pub use file::{FileEnsure, FileSpec};
pub use package::{PackageEnsure, PackageSpec};
pub use service::{ServiceEnsure, ServiceSpec};

/// Core trait for convergeable resources
pub trait Resource: Send + Sync + fmt::Debug {
    fn kind(&self) -> ResourceKind;

    /// Human-readable description of the declared state
    fn description(&self) -> String;

    /// Compare the host against the declaration
    ///
    /// Must not change host state.
    fn check(&self, host: &Providers<'_>) -> Result<CheckOutcome>;

    /// Make the changes reported by [`Resource::check`]
    fn apply(&self, host: &Providers<'_>, changes: &[Change]) -> Result<()>;

    /// React to a refresh event
    ///
    /// Returns whether anything was done. Default: refresh is ignored.
    fn refresh(&self, _host: &Providers<'_>) -> Result<bool> {
        Ok(false)
    }

    /// Whether a check after apply must come back in sync
    fn verify_after_apply(&self) -> bool {
        true
    }
}

/// A validated resource declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceSpec {
    Package(PackageSpec),
    Service(ServiceSpec),
    File(FileSpec),
    Exec(ExecSpec),
}

impl ResourceSpec {
    /// Validate rendered attributes into a typed spec
    pub fn from_attributes(id: &ResourceId, attrs: &Attributes) -> Result<Self, CompileError> {
        Ok(match id.kind {
            ResourceKind::Package => Self::Package(PackageSpec::from_attributes(id, attrs)?),
            ResourceKind::Service => Self::Service(ServiceSpec::from_attributes(id, attrs)?),
            ResourceKind::File => Self::File(FileSpec::from_attributes(id, attrs)?),
            ResourceKind::Exec => Self::Exec(ExecSpec::from_attributes(id, attrs)?),
        })
    }

    pub fn as_resource(&self) -> &dyn Resource {
        match self {
            Self::Package(spec) => spec,
            Self::Service(spec) => spec,
            Self::File(spec) => spec,
            Self::Exec(spec) => spec,
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.as_resource().kind()
    }
}

/// Typed access to a resource's attributes
///
/// Rejects attributes the resource kind does not know up front, then hands
/// out values with type checking.
pub(crate) struct AttrReader<'a> {
    id: &'a ResourceId,
    attrs: &'a Attributes,
}

impl<'a> AttrReader<'a> {
    pub(crate) fn new(
        id: &'a ResourceId,
        attrs: &'a Attributes,
        allowed: &[&str],
    ) -> Result<Self, CompileError> {
        if let Some(unknown) = attrs.keys().find(|k| !allowed.contains(&k.as_str())) {
            return Err(CompileError::InvalidAttribute {
                resource: id.clone(),
                attribute: unknown.clone(),
                reason: format!("not a {} attribute", id.kind.as_str()),
            });
        }
        Ok(Self { id, attrs })
    }

    pub(crate) fn invalid(&self, attribute: &str, reason: impl Into<String>) -> CompileError {
        CompileError::InvalidAttribute {
            resource: self.id.clone(),
            attribute: attribute.to_string(),
            reason: reason.into(),
        }
    }

    fn mismatch(&self, attribute: &str, expected: &str, found: &AttrValue) -> CompileError {
        self.invalid(
            attribute,
            format!("expected {expected}, found {}", found.type_name()),
        )
    }

    pub(crate) fn string(&self, key: &str) -> Result<Option<String>, CompileError> {
        match self.attrs.get(key) {
            None => Ok(None),
            Some(AttrValue::Str(s)) => Ok(Some(s.clone())),
            Some(other) => Err(self.mismatch(key, "string", other)),
        }
    }

    pub(crate) fn bool(&self, key: &str) -> Result<Option<bool>, CompileError> {
        match self.attrs.get(key) {
            None => Ok(None),
            Some(AttrValue::Bool(b)) => Ok(Some(*b)),
            Some(other) => Err(self.mismatch(key, "boolean", other)),
        }
    }

    pub(crate) fn int(&self, key: &str) -> Result<Option<i64>, CompileError> {
        match self.attrs.get(key) {
            None => Ok(None),
            Some(AttrValue::Int(i)) => Ok(Some(*i)),
            Some(other) => Err(self.mismatch(key, "integer", other)),
        }
    }

    /// A list attribute; a single string counts as a one-element list
    pub(crate) fn list(&self, key: &str) -> Result<Vec<String>, CompileError> {
        match self.attrs.get(key) {
            None => Ok(Vec::new()),
            Some(AttrValue::List(items)) => Ok(items.clone()),
            Some(AttrValue::Str(s)) => Ok(vec![s.clone()]),
            Some(other) => Err(self.mismatch(key, "list of strings", other)),
        }
    }

    /// The `name`-style attribute, defaulting to the title
    pub(crate) fn name_or_title(&self, key: &str) -> Result<String, CompileError> {
        Ok(self.string(key)?.unwrap_or_else(|| self.id.title.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, AttrValue)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_unknown_attribute_rejected() {
        let id = ResourceId::package("curl");
        let err = ResourceSpec::from_attributes(&id, &attrs(&[("enable", true.into())]))
            .unwrap_err();
        assert!(matches!(
            err,
            CompileError::InvalidAttribute { ref attribute, .. } if attribute == "enable"
        ));
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let id = ResourceId::service("k3s");
        let err = ResourceSpec::from_attributes(&id, &attrs(&[("enable", "yes".into())]))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Service[k3s]: invalid `enable`: expected boolean, found string"
        );
    }

    #[test]
    fn test_dispatch_by_kind() {
        let spec = ResourceSpec::from_attributes(&ResourceId::exec("apt_update"), &Attributes::new())
            .unwrap();
        assert_eq!(spec.kind(), ResourceKind::Exec);
        assert!(!spec.as_resource().verify_after_apply());
    }
}
