//! The compiled resource graph for one host
//!
//! Nodes live in an arena (`Vec<CatalogNode>`) in declaration order; edges
//! are plain index pairs. A catalog is built fresh for every run.

use crate::class::ClassParams;
use crate::resource::ResourceSpec;
use crate::types::{AttrValue, Attributes, RelationKind, ResourceId, ResourceKind};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// One resource in the catalog
#[derive(Debug, Clone)]
pub struct CatalogNode {
    pub id: ResourceId,
    pub spec: ResourceSpec,
    /// Rendered attributes, as declared
    pub attrs: Attributes,
    /// Class that first declared the resource
    pub class: String,
    /// Position in declaration order
    pub index: usize,
}

impl CatalogNode {
    pub fn attr(&self, name: &str) -> Option<&AttrValue> {
        self.attrs.get(name)
    }
}

/// Why an edge exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    Before,
    Require,
    Notify,
    Subscribe,
    /// Implied by a class requiring another class
    Containment,
}

impl EdgeKind {
    /// Whether a change at the source refreshes the target
    pub fn refreshes(&self) -> bool {
        matches!(self, Self::Notify | Self::Subscribe)
    }
}

impl From<RelationKind> for EdgeKind {
    fn from(kind: RelationKind) -> Self {
        match kind {
            RelationKind::Before => Self::Before,
            RelationKind::Require => Self::Require,
            RelationKind::Notify => Self::Notify,
            RelationKind::Subscribe => Self::Subscribe,
        }
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Before => "before",
            Self::Require => "require",
            Self::Notify => "notify",
            Self::Subscribe => "subscribe",
            Self::Containment => "containment",
        })
    }
}

/// `from` must be applied before `to`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Edge {
    pub from: usize,
    pub to: usize,
    pub kind: EdgeKind,
}

/// A class as it was evaluated for this catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledClass {
    pub name: String,
    /// Parameter values after defaults and overrides
    pub params: ClassParams,
    /// Indices of resources declared directly by the class
    pub members: Vec<usize>,
    /// Classes included through `contains`, transitively
    pub contained: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    nodes: Vec<CatalogNode>,
    edges: Vec<Edge>,
    classes: Vec<CompiledClass>,
    lookup: HashMap<ResourceId, usize>,
}

impl Catalog {
    pub(crate) fn new(nodes: Vec<CatalogNode>, edges: Vec<Edge>, classes: Vec<CompiledClass>) -> Self {
        let lookup = nodes.iter().map(|node| (node.id.clone(), node.index)).collect();
        Self {
            nodes,
            edges,
            classes,
            lookup,
        }
    }

    pub fn nodes(&self) -> &[CatalogNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn classes(&self) -> &[CompiledClass] {
        &self.classes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, index: usize) -> &CatalogNode {
        &self.nodes[index]
    }

    pub fn index_of(&self, id: &ResourceId) -> Option<usize> {
        self.lookup.get(id).copied()
    }

    /// Look up a resource by type and title
    pub fn resource(&self, kind: ResourceKind, title: &str) -> Option<&CatalogNode> {
        self.index_of(&ResourceId::new(kind, title))
            .map(|index| &self.nodes[index])
    }

    pub fn contains_class(&self, name: &str) -> bool {
        self.classes.iter().any(|class| class.name == name)
    }

    pub fn class(&self, name: &str) -> Option<&CompiledClass> {
        self.classes.iter().find(|class| class.name == name)
    }

    /// Class names in evaluation order
    pub fn class_names(&self) -> Vec<&str> {
        self.classes.iter().map(|class| class.name.as_str()).collect()
    }

    pub fn edges_from(&self, index: usize) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |edge| edge.from == index)
    }

    /// Resources declared by one class
    pub fn resources_of(&self, class: &str) -> impl Iterator<Item = &CatalogNode> {
        self.nodes.iter().filter(move |node| node.class == class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(index: usize, id: ResourceId, class: &str) -> CatalogNode {
        let attrs = Attributes::new();
        CatalogNode {
            spec: ResourceSpec::from_attributes(&id, &attrs).unwrap(),
            id,
            attrs,
            class: class.to_string(),
            index,
        }
    }

    #[test]
    fn test_lookup_and_queries() {
        let catalog = Catalog::new(
            vec![
                node(0, ResourceId::package("curl"), "profiles::base"),
                node(1, ResourceId::service("k3s"), "profiles::k3s_server"),
            ],
            vec![Edge {
                from: 0,
                to: 1,
                kind: EdgeKind::Containment,
            }],
            vec![CompiledClass {
                name: "profiles::base".to_string(),
                params: ClassParams::new(),
                members: vec![0],
                contained: Vec::new(),
            }],
        );

        assert_eq!(catalog.resource(ResourceKind::Service, "k3s").unwrap().index, 1);
        assert!(catalog.resource(ResourceKind::Service, "ssh").is_none());
        assert!(catalog.contains_class("profiles::base"));
        assert!(!catalog.contains_class("profiles::security"));
        assert_eq!(catalog.edges_from(0).count(), 1);
        assert_eq!(catalog.resources_of("profiles::base").count(), 1);
    }
}
