//! Catalog compiler
//!
//! Expands root classes into a flat catalog:
//! 1. Depth-first class expansion (contained classes, then required
//!    classes, then the class's own resources), each class at most once
//! 2. Parameter binding, `when` evaluation, and template rendering
//! 3. Validation of attributes into typed resource specs
//! 4. Relationship and containment edges
//!
//! Compilation is pure: the same registry, facts, and parameters always
//! produce the same catalog, node for node and edge for edge.

use crate::catalog::{Catalog, CatalogNode, CompiledClass, Edge, EdgeKind};
use crate::class::{ClassDecl, ClassParams, ClassRegistry, Relation, ResourceDecl};
use crate::error::CompileError;
use crate::facts::Facts;
use crate::resource::ResourceSpec;
use crate::template::TemplateEngine;
use crate::types::{Attributes, Reference, ResourceId};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Compiles classes into a [`Catalog`] for one host
pub struct Compiler<'a> {
    registry: &'a ClassRegistry,
    facts: &'a Facts,
    params: BTreeMap<String, ClassParams>,
    templates: TemplateEngine,
}

impl<'a> Compiler<'a> {
    pub fn new(registry: &'a ClassRegistry, facts: &'a Facts) -> Self {
        Self {
            registry,
            facts,
            params: BTreeMap::new(),
            templates: TemplateEngine::new(),
        }
    }

    /// Parameter values keyed by class name
    pub fn with_params(mut self, params: BTreeMap<String, ClassParams>) -> Self {
        self.params = params;
        self
    }

    pub fn with_class_params(mut self, class: impl Into<String>, params: ClassParams) -> Self {
        self.params.insert(class.into(), params);
        self
    }

    /// Compile the given root classes into one catalog
    pub fn compile<S: AsRef<str>>(&self, roots: &[S]) -> Result<Catalog, CompileError> {
        let mut expansion = Expansion::default();
        for root in roots {
            self.expand(&mut expansion, root.as_ref(), None)?;
        }

        for class in self.params.keys() {
            if !expansion.evaluated.contains_key(class) {
                log::warn!("Parameters given for class `{class}`, which is not in the catalog");
            }
        }

        let mut edges = expansion.relation_edges()?;
        let containment = expansion.containment_edges(&edges);
        edges.extend(containment);
        edges.sort();
        edges.dedup();

        log::debug!(
            "Compiled {} resources and {} edges from {} classes",
            expansion.nodes.len(),
            edges.len(),
            expansion.classes.len()
        );
        Ok(Catalog::new(expansion.nodes, edges, expansion.classes))
    }

    fn expand(
        &self,
        state: &mut Expansion,
        name: &str,
        referenced_by: Option<&str>,
    ) -> Result<(), CompileError> {
        if let Some(pos) = state.stack.iter().position(|entry| entry == name) {
            let mut path = state.stack[pos..].to_vec();
            path.push(name.to_string());
            return Err(CompileError::ClassCycle { path });
        }
        if state.evaluated.contains_key(name) {
            return Ok(());
        }

        let decl = self
            .registry
            .get(name)
            .ok_or_else(|| CompileError::UnknownClass {
                name: name.to_string(),
                referenced_by: referenced_by.map(str::to_string),
            })?;

        if !decl.supports(self.facts.os_family()) {
            return Err(CompileError::UnsupportedPlatform {
                class: name.to_string(),
                family: self.facts.os_family().map(str::to_string),
                supported: decl.supported_os.clone(),
            });
        }

        let params = self.bind_params(decl)?;
        log::debug!("Evaluating class {name}");

        let slot = state.classes.len();
        state.classes.push(CompiledClass {
            name: name.to_string(),
            params: params.clone(),
            members: Vec::new(),
            contained: Vec::new(),
        });
        state.evaluated.insert(name.to_string(), slot);
        state.stack.push(name.to_string());

        let mut contained = Vec::new();
        for child in &decl.contains {
            self.expand(state, child, Some(name))?;
            contained.push(child.clone());
            contained.extend(state.class_at(child).contained.iter().cloned());
        }
        contained.sort();
        contained.dedup();
        contained.retain(|class| class != name);
        state.classes[slot].contained = contained;

        for required in &decl.requires {
            self.expand(state, required, Some(name))?;
            state.requires.push((name.to_string(), required.clone()));
        }

        for resource in &decl.resources {
            self.declare(state, slot, decl, &params, resource)?;
        }

        state.stack.pop();
        Ok(())
    }

    /// Bind caller-supplied values and defaults to declared parameters
    fn bind_params(&self, decl: &ClassDecl) -> Result<ClassParams, CompileError> {
        let empty = ClassParams::new();
        let supplied = self.params.get(&decl.name).unwrap_or(&empty);

        if let Some(unknown) = supplied.keys().find(|key| !decl.params.contains_key(*key)) {
            return Err(CompileError::UnknownParameter {
                class: decl.name.clone(),
                param: unknown.clone(),
            });
        }

        decl.params
            .iter()
            .map(|(param, spec)| {
                supplied
                    .get(param)
                    .or(spec.default.as_ref())
                    .cloned()
                    .map(|value| (param.clone(), value))
                    .ok_or_else(|| CompileError::MissingParameter {
                        class: decl.name.clone(),
                        param: param.clone(),
                    })
            })
            .collect()
    }

    fn declare(
        &self,
        state: &mut Expansion,
        slot: usize,
        class: &ClassDecl,
        params: &ClassParams,
        decl: &ResourceDecl,
    ) -> Result<(), CompileError> {
        let template_error = |err: minijinja::Error| CompileError::Template {
            class: class.name.clone(),
            resource: Some(format!("{}[{}]", decl.kind, decl.title)),
            message: err.to_string(),
        };

        if let Some(condition) = &decl.when {
            let enabled = self
                .templates
                .eval_condition(condition, self.facts, params)
                .map_err(template_error)?;
            if !enabled {
                log::debug!(
                    "Skipping {}[{}] in {}: `{condition}` is false",
                    decl.kind,
                    decl.title,
                    class.name
                );
                return Ok(());
            }
        }

        let title = self
            .templates
            .render(&decl.title, self.facts, params)
            .map_err(template_error)?;
        let attrs = decl
            .attrs
            .iter()
            .map(|(key, value)| {
                self.templates
                    .render_value(value, self.facts, params)
                    .map(|rendered| (key.clone(), rendered))
            })
            .collect::<Result<Attributes, _>>()
            .map_err(template_error)?;

        let mut relations = Vec::with_capacity(decl.relations.len());
        for relation in &decl.relations {
            let target = match &relation.target {
                Reference::Resource(id) => Reference::Resource(ResourceId::new(
                    id.kind,
                    self.templates
                        .render(&id.title, self.facts, params)
                        .map_err(template_error)?,
                )),
                class_ref @ Reference::Class(_) => class_ref.clone(),
            };
            relations.push(Relation {
                kind: relation.kind,
                target,
            });
        }

        let id = ResourceId::new(decl.kind, title);
        let index = match state.lookup.get(&id) {
            Some(&existing) => {
                let node = &state.nodes[existing];
                if node.attrs != attrs {
                    return Err(CompileError::DuplicateResource {
                        resource: id,
                        first_class: node.class.clone(),
                        second_class: class.name.clone(),
                    });
                }
                log::debug!("Merging duplicate declaration of {id} from {}", class.name);
                existing
            }
            None => {
                let spec = ResourceSpec::from_attributes(&id, &attrs)?;
                let index = state.nodes.len();
                state.lookup.insert(id.clone(), index);
                state.nodes.push(CatalogNode {
                    id,
                    spec,
                    attrs,
                    class: class.name.clone(),
                    index,
                });
                state.classes[slot].members.push(index);
                index
            }
        };

        state
            .relations
            .extend(relations.into_iter().map(|relation| (index, relation)));
        Ok(())
    }
}

/// Working state of one compilation
#[derive(Default)]
struct Expansion {
    nodes: Vec<CatalogNode>,
    lookup: HashMap<ResourceId, usize>,
    classes: Vec<CompiledClass>,
    evaluated: HashMap<String, usize>,
    stack: Vec<String>,
    /// (class, required class) pairs
    requires: Vec<(String, String)>,
    /// Declared relations, by declaring node
    relations: Vec<(usize, Relation)>,
}

impl Expansion {
    fn class_at(&self, name: &str) -> &CompiledClass {
        &self.classes[self.evaluated[name]]
    }

    /// Resources of a class and every class it contains
    fn all_members(&self, name: &str) -> Vec<usize> {
        let class = self.class_at(name);
        let mut members = class.members.clone();
        for contained in &class.contained {
            members.extend(&self.class_at(contained).members);
        }
        members.sort_unstable();
        members.dedup();
        members
    }

    fn relation_edges(&self) -> Result<Vec<Edge>, CompileError> {
        let mut edges = Vec::new();
        for (node, relation) in &self.relations {
            let unresolved = || CompileError::UnresolvedReference {
                resource: self.nodes[*node].id.clone(),
                reference: relation.target.to_string(),
            };
            let targets = match &relation.target {
                Reference::Resource(id) => vec![*self.lookup.get(id).ok_or_else(unresolved)?],
                Reference::Class(name) => {
                    if !self.evaluated.contains_key(name) {
                        return Err(unresolved());
                    }
                    self.all_members(name)
                }
            };

            for target in targets.into_iter().filter(|target| target != node) {
                let (from, to) = if relation.kind.declarer_first() {
                    (*node, target)
                } else {
                    (target, *node)
                };
                edges.push(Edge {
                    from,
                    to,
                    kind: EdgeKind::from(relation.kind),
                });
            }
        }
        Ok(edges)
    }

    /// Order every member of a required class before the requiring class,
    /// except where an explicit relation already points the other way
    fn containment_edges(&self, explicit: &[Edge]) -> Vec<Edge> {
        let declared: HashSet<(usize, usize)> =
            explicit.iter().map(|edge| (edge.from, edge.to)).collect();

        let mut edges = Vec::new();
        for (class, required) in &self.requires {
            let before = self.all_members(required);
            let after: Vec<usize> = self
                .all_members(class)
                .into_iter()
                .filter(|member| before.binary_search(member).is_err())
                .collect();

            for &from in &before {
                for &to in &after {
                    if declared.contains(&(to, from)) {
                        log::debug!(
                            "{} is ordered before {} explicitly, skipping containment",
                            self.nodes[to].id,
                            self.nodes[from].id
                        );
                        continue;
                    }
                    edges.push(Edge {
                        from,
                        to,
                        kind: EdgeKind::Containment,
                    });
                }
            }
        }
        edges
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::ParamDecl;
    use crate::facts::keys;
    use crate::types::{AttrValue, ResourceKind};

    fn debian() -> Facts {
        Facts::new()
            .with(keys::OS_FAMILY, "Debian")
            .with(keys::OS_RELEASE_MAJOR, "12")
    }

    fn registry(classes: Vec<ClassDecl>) -> ClassRegistry {
        let mut registry = ClassRegistry::new();
        for class in classes {
            registry.register(class).unwrap();
        }
        registry
    }

    fn package(title: &str) -> ResourceDecl {
        ResourceDecl::new(ResourceKind::Package, title).attr("ensure", "present")
    }

    fn pkg_ref(title: &str) -> Reference {
        Reference::Resource(ResourceId::package(title))
    }

    #[test]
    fn test_contained_classes_first_and_included_once() {
        let registry = registry(vec![
            ClassDecl::new("roles::worker")
                .contains("profiles::base")
                .contains("profiles::agent"),
            ClassDecl::new("profiles::base").resource(package("curl")),
            ClassDecl::new("profiles::agent")
                .contains("profiles::base")
                .resource(package("k3s-selinux")),
        ]);
        let facts = debian();
        let catalog = Compiler::new(&registry, &facts)
            .compile(&["roles::worker"])
            .unwrap();

        let titles: Vec<_> = catalog.nodes().iter().map(|n| n.id.title.as_str()).collect();
        assert_eq!(titles, ["curl", "k3s-selinux"]);
        assert_eq!(
            catalog.class_names(),
            ["roles::worker", "profiles::base", "profiles::agent"]
        );
        assert_eq!(
            catalog.class("roles::worker").unwrap().contained,
            ["profiles::agent", "profiles::base"]
        );
    }

    #[test]
    fn test_unknown_class() {
        let registry = registry(vec![ClassDecl::new("roles::worker").contains("profiles::gone")]);
        let facts = debian();
        let err = Compiler::new(&registry, &facts)
            .compile(&["roles::worker"])
            .unwrap_err();
        assert_eq!(
            err,
            CompileError::UnknownClass {
                name: "profiles::gone".to_string(),
                referenced_by: Some("roles::worker".to_string()),
            }
        );
    }

    #[test]
    fn test_class_cycle_names_path() {
        let registry = registry(vec![
            ClassDecl::new("a").contains("b"),
            ClassDecl::new("b").requires("c"),
            ClassDecl::new("c").contains("a"),
        ]);
        let facts = debian();
        let err = Compiler::new(&registry, &facts).compile(&["a"]).unwrap_err();
        assert_eq!(
            err,
            CompileError::ClassCycle {
                path: vec!["a".into(), "b".into(), "c".into(), "a".into()],
            }
        );
    }

    #[test]
    fn test_unsupported_platform() {
        let registry = registry(vec![ClassDecl::new("profiles::base").supported_os("Debian")]);

        let redhat = Facts::new().with(keys::OS_FAMILY, "RedHat");
        let err = Compiler::new(&registry, &redhat)
            .compile(&["profiles::base"])
            .unwrap_err();
        assert!(matches!(err, CompileError::UnsupportedPlatform { ref family, .. } if family.as_deref() == Some("RedHat")));

        let empty = Facts::new();
        let err = Compiler::new(&registry, &empty)
            .compile(&["profiles::base"])
            .unwrap_err();
        assert!(matches!(err, CompileError::UnsupportedPlatform { family: None, .. }));
    }

    #[test]
    fn test_parameters() {
        let class = ClassDecl::new("profiles::k3s_server")
            .param("version", ParamDecl::with_default("v1.27.0+k3s1"))
            .param("token", ParamDecl::required())
            .resource(
                ResourceDecl::new(ResourceKind::Exec, "install")
                    .attr("command", "INSTALL_K3S_VERSION={{ params.version }} K3S_TOKEN={{ params.token }} sh"),
            );
        let registry = registry(vec![class]);
        let facts = debian();

        let err = Compiler::new(&registry, &facts)
            .compile(&["profiles::k3s_server"])
            .unwrap_err();
        assert!(matches!(err, CompileError::MissingParameter { ref param, .. } if param == "token"));

        let err = Compiler::new(&registry, &facts)
            .with_class_params(
                "profiles::k3s_server",
                ClassParams::from([("tokn".to_string(), AttrValue::from("x"))]),
            )
            .compile(&["profiles::k3s_server"])
            .unwrap_err();
        assert!(matches!(err, CompileError::UnknownParameter { ref param, .. } if param == "tokn"));

        let catalog = Compiler::new(&registry, &facts)
            .with_class_params(
                "profiles::k3s_server",
                ClassParams::from([("token".to_string(), AttrValue::from("s3cr3t"))]),
            )
            .compile(&["profiles::k3s_server"])
            .unwrap();
        let exec = catalog.resource(ResourceKind::Exec, "install").unwrap();
        assert_eq!(
            exec.attr("command"),
            Some(&AttrValue::from("INSTALL_K3S_VERSION=v1.27.0+k3s1 K3S_TOKEN=s3cr3t sh"))
        );
        assert_eq!(
            catalog.class("profiles::k3s_server").unwrap().params["version"],
            AttrValue::from("v1.27.0+k3s1")
        );
    }

    #[test]
    fn test_when_and_missing_fact() {
        let registry = registry(vec![ClassDecl::new("profiles::base").resource(
            ResourceDecl::new(ResourceKind::Service, "dphys-swapfile")
                .attr("ensure", "stopped")
                .when("facts['os.family'] == 'Debian'"),
        )]);

        let facts = debian();
        let catalog = Compiler::new(&registry, &facts)
            .compile(&["profiles::base"])
            .unwrap();
        assert!(catalog.resource(ResourceKind::Service, "dphys-swapfile").is_some());

        let other = Facts::new().with(keys::OS_FAMILY, "Suse");
        let catalog = Compiler::new(&registry, &other)
            .compile(&["profiles::base"])
            .unwrap();
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_template_error_names_resource() {
        let registry = registry(vec![ClassDecl::new("profiles::base").resource(
            ResourceDecl::new(ResourceKind::File, "/etc/hostname")
                .attr("content", "{{ facts['networking.hostname'] }}\n"),
        )]);
        let facts = debian();
        let err = Compiler::new(&registry, &facts)
            .compile(&["profiles::base"])
            .unwrap_err();
        assert!(matches!(
            err,
            CompileError::Template { ref resource, .. } if resource.as_deref() == Some("File[/etc/hostname]")
        ));
    }

    #[test]
    fn test_duplicate_resources() {
        let same = registry(vec![
            ClassDecl::new("a").contains("b").resource(package("curl")),
            ClassDecl::new("b").resource(package("curl")),
        ]);
        let facts = debian();
        let catalog = Compiler::new(&same, &facts).compile(&["a"]).unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.nodes()[0].class, "b");

        let conflicting = registry(vec![
            ClassDecl::new("a").contains("b").resource(package("curl")),
            ClassDecl::new("b")
                .resource(ResourceDecl::new(ResourceKind::Package, "curl").attr("ensure", "absent")),
        ]);
        let err = Compiler::new(&conflicting, &facts).compile(&["a"]).unwrap_err();
        assert_eq!(
            err,
            CompileError::DuplicateResource {
                resource: ResourceId::package("curl"),
                first_class: "b".to_string(),
                second_class: "a".to_string(),
            }
        );
    }

    #[test]
    fn test_malformed_attribute() {
        let registry = registry(vec![ClassDecl::new("a").resource(
            ResourceDecl::new(ResourceKind::Package, "curl").attr("ensure", "sometimes"),
        )]);
        let facts = debian();
        let err = Compiler::new(&registry, &facts).compile(&["a"]).unwrap_err();
        assert!(matches!(err, CompileError::InvalidAttribute { .. }));
    }

    #[test]
    fn test_relation_edges() {
        let registry = registry(vec![ClassDecl::new("a")
            .resource(package("curl"))
            .resource(
                ResourceDecl::new(ResourceKind::Exec, "install")
                    .require(pkg_ref("curl"))
                    .notify(Reference::Resource(ResourceId::service("k3s"))),
            )
            .resource(ResourceDecl::new(ResourceKind::Service, "k3s"))]);
        let facts = debian();
        let catalog = Compiler::new(&registry, &facts).compile(&["a"]).unwrap();

        assert_eq!(
            catalog.edges(),
            [
                Edge { from: 0, to: 1, kind: EdgeKind::Require },
                Edge { from: 1, to: 2, kind: EdgeKind::Notify },
            ]
        );
    }

    #[test]
    fn test_unresolved_reference() {
        let registry = registry(vec![ClassDecl::new("a").resource(
            ResourceDecl::new(ResourceKind::Exec, "install").require(pkg_ref("curl")),
        )]);
        let facts = debian();
        let err = Compiler::new(&registry, &facts).compile(&["a"]).unwrap_err();
        assert_eq!(
            err,
            CompileError::UnresolvedReference {
                resource: ResourceId::exec("install"),
                reference: "Package[curl]".to_string(),
            }
        );
    }

    #[test]
    fn test_containment_edges_from_requires() {
        let registry = registry(vec![
            ClassDecl::new("role").contains("base").contains("agent"),
            ClassDecl::new("base").resource(package("curl")).resource(package("git")),
            ClassDecl::new("agent")
                .requires("base")
                .resource(ResourceDecl::new(ResourceKind::Service, "k3s-agent")),
        ]);
        let facts = debian();
        let catalog = Compiler::new(&registry, &facts).compile(&["role"]).unwrap();

        let agent = catalog.index_of(&ResourceId::service("k3s-agent")).unwrap();
        let containment: Vec<_> = catalog
            .edges()
            .iter()
            .filter(|edge| edge.kind == EdgeKind::Containment)
            .map(|edge| (catalog.node(edge.from).id.title.as_str(), edge.to))
            .collect();
        assert_eq!(containment, [("curl", agent), ("git", agent)]);
    }

    #[test]
    fn test_class_reference_expands_to_members() {
        let registry = registry(vec![
            ClassDecl::new("role").contains("base").resource(
                ResourceDecl::new(ResourceKind::Exec, "join")
                    .require(Reference::Class("base".to_string())),
            ),
            ClassDecl::new("base").resource(package("curl")).resource(package("git")),
        ]);
        let facts = debian();
        let catalog = Compiler::new(&registry, &facts).compile(&["role"]).unwrap();
        let join = catalog.index_of(&ResourceId::exec("join")).unwrap();
        assert_eq!(
            catalog.edges().iter().filter(|edge| edge.to == join).count(),
            2
        );
    }

    #[test]
    fn test_compile_is_deterministic() {
        let registry = registry(vec![
            ClassDecl::new("role").contains("base").contains("agent"),
            ClassDecl::new("base").resource(package("curl")).resource(package("git")),
            ClassDecl::new("agent")
                .requires("base")
                .resource(ResourceDecl::new(ResourceKind::Service, "k3s-agent")),
        ]);
        let facts = debian();
        let compiler = Compiler::new(&registry, &facts);
        let first = compiler.compile(&["role"]).unwrap();
        let second = compiler.compile(&["role"]).unwrap();

        let ids = |c: &Catalog| c.nodes().iter().map(|n| n.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&first), ids(&second));
        assert_eq!(first.edges(), second.edges());
    }
}
