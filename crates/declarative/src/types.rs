//! Core types for the resource model

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::process::Output;
use std::str::FromStr;

/// The kinds of resources the engine knows how to converge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Package,
    Service,
    File,
    Exec,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::Package,
        ResourceKind::Service,
        ResourceKind::File,
        ResourceKind::Exec,
    ];

    /// Lowercase name used in manifests (`type = "package"`)
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Package => "package",
            Self::Service => "service",
            Self::File => "file",
            Self::Exec => "exec",
        }
    }

    /// Capitalized name used in references (`Package[curl]`)
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Package => "Package",
            Self::Service => "Service",
            Self::File => "File",
            Self::Exec => "Exec",
        }
    }

    /// Parse a kind, ignoring case
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Identity of a resource within a catalog: (type, title)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId {
    pub kind: ResourceKind,
    pub title: String,
}

impl ResourceId {
    pub fn new(kind: ResourceKind, title: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
        }
    }

    pub fn package(title: impl Into<String>) -> Self {
        Self::new(ResourceKind::Package, title)
    }

    pub fn service(title: impl Into<String>) -> Self {
        Self::new(ResourceKind::Service, title)
    }

    pub fn file(title: impl Into<String>) -> Self {
        Self::new(ResourceKind::File, title)
    }

    pub fn exec(title: impl Into<String>) -> Self {
        Self::new(ResourceKind::Exec, title)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.kind, self.title)
    }
}

/// A declared attribute value
///
/// Manifests only carry scalars and string lists; anything richer is
/// rejected when the manifest is loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<String>),
}

impl AttrValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Short name of the value's type, for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "boolean",
            Self::Int(_) => "integer",
            Self::Str(_) => "string",
            Self::List(_) => "list",
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Str(s) => f.write_str(s),
            Self::List(items) => write!(f, "[{}]", items.join(", ")),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<Vec<String>> for AttrValue {
    fn from(value: Vec<String>) -> Self {
        Self::List(value)
    }
}

impl From<Vec<&str>> for AttrValue {
    fn from(value: Vec<&str>) -> Self {
        Self::List(value.into_iter().map(str::to_string).collect())
    }
}

/// Attribute name -> declared value, ordered for deterministic output
pub type Attributes = BTreeMap<String, AttrValue>;

/// Relationship metaparameters that can appear on any resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationKind {
    /// This resource is applied before the target
    Before,
    /// This resource is applied after the target
    Require,
    /// Like `before`, and the target is refreshed when this resource changes
    Notify,
    /// Like `require`, and this resource is refreshed when the target changes
    Subscribe,
}

impl RelationKind {
    pub const ALL: [RelationKind; 4] = [
        RelationKind::Before,
        RelationKind::Require,
        RelationKind::Notify,
        RelationKind::Subscribe,
    ];

    /// Manifest key for this relation
    pub fn attr_name(&self) -> &'static str {
        match self {
            Self::Before => "before",
            Self::Require => "require",
            Self::Notify => "notify",
            Self::Subscribe => "subscribe",
        }
    }

    pub fn from_attr_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.attr_name() == name)
    }

    /// Whether the declaring resource comes first in the resulting edge
    pub fn declarer_first(&self) -> bool {
        matches!(self, Self::Before | Self::Notify)
    }

    /// Whether a change on the source side sends a refresh along the edge
    pub fn refreshes(&self) -> bool {
        matches!(self, Self::Notify | Self::Subscribe)
    }
}

/// A reference to a resource or a class, as written in relationships
///
/// Syntax: `Package[curl]`, `exec[apt_update]`, `Class[profiles::base]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Reference {
    Resource(ResourceId),
    Class(String),
}

impl Reference {
    pub fn parse(s: &str) -> Option<Self> {
        let (type_name, rest) = s.trim().split_once('[')?;
        let title = rest.strip_suffix(']')?.trim();
        if title.is_empty() {
            return None;
        }

        if type_name.trim().eq_ignore_ascii_case("class") {
            return Some(Self::Class(title.to_string()));
        }

        let kind = ResourceKind::parse(type_name)?;
        Some(Self::Resource(ResourceId::new(kind, title)))
    }
}

impl FromStr for Reference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("invalid reference: {s}"))
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resource(id) => write!(f, "{id}"),
            Self::Class(name) => write!(f, "Class[{name}]"),
        }
    }
}

/// Exit status and captured output of an external command
///
/// The engine only ever interprets `status`; output is kept for reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    /// Exit code, `None` when the process was killed by a signal or timed out
    pub status: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl From<Output> for CommandResult {
    fn from(output: Output) -> Self {
        Self {
            status: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        }
    }
}

impl CommandResult {
    pub fn exited(status: i32) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Get stdout as a string
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    /// Get stderr as a string
    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_parse() {
        assert_eq!(
            Reference::parse("Package[curl]"),
            Some(Reference::Resource(ResourceId::package("curl")))
        );
        assert_eq!(
            Reference::parse("exec[apt_update]"),
            Some(Reference::Resource(ResourceId::exec("apt_update")))
        );
        assert_eq!(
            Reference::parse("File[/root/.kube/config]"),
            Some(Reference::Resource(ResourceId::file("/root/.kube/config")))
        );
        assert_eq!(
            Reference::parse("Class[profiles::base]"),
            Some(Reference::Class("profiles::base".to_string()))
        );
        assert_eq!(Reference::parse("Mount[/data]"), None);
        assert_eq!(Reference::parse("Package[]"), None);
        assert_eq!(Reference::parse("curl"), None);
    }

    #[test]
    fn test_reference_display_round_trips() {
        for text in ["Service[k3s]", "Class[roles::pi_worker]"] {
            assert_eq!(Reference::parse(text).unwrap().to_string(), text);
        }
    }

    #[test]
    fn test_relation_direction() {
        assert!(RelationKind::Before.declarer_first());
        assert!(RelationKind::Notify.declarer_first());
        assert!(!RelationKind::Require.declarer_first());
        assert!(!RelationKind::Subscribe.declarer_first());
        assert!(RelationKind::Subscribe.refreshes());
        assert!(!RelationKind::Require.refreshes());
    }

    #[test]
    fn test_command_result_success() {
        assert!(CommandResult::exited(0).success());
        assert!(!CommandResult::exited(1).success());
        assert!(!CommandResult::default().success());
    }
}
