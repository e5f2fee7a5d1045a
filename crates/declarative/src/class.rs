//! Class declarations and the class registry
//!
//! A class is a named group of resource declarations plus references to
//! other classes. Roles and profiles are both plain classes; the naming
//! (`roles::pi_worker`, `profiles::base`) is convention only.

use crate::error::ManifestError;
use crate::types::{AttrValue, Attributes, Reference, RelationKind, ResourceKind};
use std::collections::BTreeMap;

/// Parameter values bound to one class
pub type ClassParams = BTreeMap<String, AttrValue>;

/// A declared class parameter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamDecl {
    /// Value used when the caller supplies none; `None` makes it required
    pub default: Option<AttrValue>,
}

impl ParamDecl {
    pub fn required() -> Self {
        Self { default: None }
    }

    pub fn with_default(value: impl Into<AttrValue>) -> Self {
        Self {
            default: Some(value.into()),
        }
    }
}

/// A relationship declared on a resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Relation {
    pub kind: RelationKind,
    pub target: Reference,
}

/// A resource as written in a class, before templates are rendered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDecl {
    pub kind: ResourceKind,
    pub title: String,
    pub attrs: Attributes,
    pub relations: Vec<Relation>,
    /// Condition evaluated against facts and parameters; the resource is
    /// dropped when it is false
    pub when: Option<String>,
}

impl ResourceDecl {
    pub fn new(kind: ResourceKind, title: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            attrs: Attributes::new(),
            relations: Vec::new(),
            when: None,
        }
    }

    pub fn attr(mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }

    pub fn relation(mut self, kind: RelationKind, target: Reference) -> Self {
        self.relations.push(Relation { kind, target });
        self
    }

    pub fn require(self, target: Reference) -> Self {
        self.relation(RelationKind::Require, target)
    }

    pub fn before(self, target: Reference) -> Self {
        self.relation(RelationKind::Before, target)
    }

    pub fn notify(self, target: Reference) -> Self {
        self.relation(RelationKind::Notify, target)
    }

    pub fn subscribe(self, target: Reference) -> Self {
        self.relation(RelationKind::Subscribe, target)
    }

    pub fn when(mut self, condition: impl Into<String>) -> Self {
        self.when = Some(condition.into());
        self
    }
}

/// A named, reusable group of resources
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassDecl {
    pub name: String,
    pub params: BTreeMap<String, ParamDecl>,
    /// Classes whose resources become part of this one (include-once)
    pub contains: Vec<String>,
    /// Classes whose resources must all be applied before this class's
    pub requires: Vec<String>,
    /// Accepted `os.family` values; empty means any
    pub supported_os: Vec<String>,
    pub resources: Vec<ResourceDecl>,
}

impl ClassDecl {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn param(mut self, name: impl Into<String>, decl: ParamDecl) -> Self {
        self.params.insert(name.into(), decl);
        self
    }

    pub fn contains(mut self, class: impl Into<String>) -> Self {
        self.contains.push(class.into());
        self
    }

    pub fn requires(mut self, class: impl Into<String>) -> Self {
        self.requires.push(class.into());
        self
    }

    pub fn supported_os(mut self, family: impl Into<String>) -> Self {
        self.supported_os.push(family.into());
        self
    }

    pub fn resource(mut self, decl: ResourceDecl) -> Self {
        self.resources.push(decl);
        self
    }

    /// Whether a host with this `os.family` may compile the class
    pub fn supports(&self, family: Option<&str>) -> bool {
        if self.supported_os.is_empty() {
            return true;
        }
        family.is_some_and(|family| {
            self.supported_os
                .iter()
                .any(|supported| supported.eq_ignore_ascii_case(family))
        })
    }
}

/// All known classes, by name
#[derive(Debug, Clone, Default)]
pub struct ClassRegistry {
    classes: BTreeMap<String, ClassDecl>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, class: ClassDecl) -> Result<(), ManifestError> {
        if self.classes.contains_key(&class.name) {
            return Err(ManifestError::DuplicateClass { name: class.name });
        }
        log::debug!("Registered class {}", class.name);
        self.classes.insert(class.name.clone(), class);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ClassDecl> {
        self.classes.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_class_rejected() {
        let mut registry = ClassRegistry::new();
        registry.register(ClassDecl::new("profiles::base")).unwrap();
        let err = registry.register(ClassDecl::new("profiles::base")).unwrap_err();
        assert!(matches!(err, ManifestError::DuplicateClass { .. }));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_supports() {
        let any = ClassDecl::new("profiles::any");
        assert!(any.supports(None));

        let debian = ClassDecl::new("profiles::base").supported_os("Debian");
        assert!(debian.supports(Some("Debian")));
        assert!(debian.supports(Some("debian")));
        assert!(!debian.supports(Some("RedHat")));
        assert!(!debian.supports(None));
    }
}
