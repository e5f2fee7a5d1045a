//! TOML class manifests
//!
//! One manifest declares one class:
//!
//! ```toml
//! [class]
//! name = "profiles::k3s_server"
//! supported_os = ["Debian"]
//! contains = ["profiles::base"]
//!
//! [class.params]
//! version = { default = "v1.28.4+k3s1" }
//! token = {}                                  # required
//!
//! [[resource]]
//! type = "service"
//! title = "k3s"
//! ensure = "running"
//! enable = true
//! require = ["Exec[install_k3s_server]"]
//! ```
//!
//! Inside a `[[resource]]` table, `type`, `title`, `when`, and the relation
//! keys (`before`, `require`, `notify`, `subscribe`) are structural; every
//! other key is an attribute of the resource.

use crate::class::{ClassDecl, ClassRegistry, ParamDecl, Relation, ResourceDecl};
use crate::error::ManifestError;
use crate::types::{AttrValue, Reference, RelationKind, ResourceKind};
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ManifestFile {
    class: RawClass,
    #[serde(default)]
    resource: Vec<toml::Table>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawClass {
    name: String,
    #[serde(default)]
    supported_os: Vec<String>,
    #[serde(default)]
    contains: Vec<String>,
    #[serde(default)]
    requires: Vec<String>,
    #[serde(default)]
    params: BTreeMap<String, RawParam>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawParam {
    default: Option<toml::Value>,
}

/// Convert a TOML value into an attribute value
///
/// Only strings, booleans, integers, and arrays of strings are accepted.
pub fn attr_value_from_toml(value: &toml::Value) -> Result<AttrValue, String> {
    match value {
        toml::Value::String(s) => Ok(AttrValue::Str(s.clone())),
        toml::Value::Boolean(b) => Ok(AttrValue::Bool(*b)),
        toml::Value::Integer(i) => Ok(AttrValue::Int(*i)),
        toml::Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| format!("arrays may only hold strings, found {}", item.type_str()))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(AttrValue::List),
        other => Err(format!("unsupported value type {}", other.type_str())),
    }
}

/// Parse one manifest into a class declaration
///
/// `source_name` is only used in error messages.
pub fn parse_class(source_name: &str, text: &str) -> Result<ClassDecl, ManifestError> {
    let file: ManifestFile = toml::from_str(text).map_err(|source| ManifestError::Parse {
        source_name: source_name.to_string(),
        source,
    })?;

    let mut params = BTreeMap::new();
    for (name, raw) in file.class.params {
        let default = raw
            .default
            .as_ref()
            .map(attr_value_from_toml)
            .transpose()
            .map_err(|reason| ManifestError::InvalidValue {
                source_name: source_name.to_string(),
                resource: format!("class {}", file.class.name),
                key: format!("params.{name}"),
                reason,
            })?;
        params.insert(name, ParamDecl { default });
    }

    let resources = file
        .resource
        .into_iter()
        .enumerate()
        .map(|(index, table)| parse_resource(source_name, index, table))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ClassDecl {
        name: file.class.name,
        params,
        contains: file.class.contains,
        requires: file.class.requires,
        supported_os: file.class.supported_os,
        resources,
    })
}

fn take_string(
    source_name: &str,
    index: usize,
    table: &mut toml::Table,
    field: &'static str,
) -> Result<Option<String>, ManifestError> {
    match table.remove(field) {
        None => Ok(None),
        Some(toml::Value::String(s)) => Ok(Some(s)),
        Some(other) => Err(ManifestError::InvalidValue {
            source_name: source_name.to_string(),
            resource: format!("resource #{index}"),
            key: field.to_string(),
            reason: format!("expected string, found {}", other.type_str()),
        }),
    }
}

fn parse_resource(
    source_name: &str,
    index: usize,
    mut table: toml::Table,
) -> Result<ResourceDecl, ManifestError> {
    let missing = |field| ManifestError::MissingField {
        source_name: source_name.to_string(),
        index,
        field,
    };

    let type_name = take_string(source_name, index, &mut table, "type")?.ok_or_else(|| missing("type"))?;
    let kind = ResourceKind::parse(&type_name).ok_or_else(|| ManifestError::UnknownType {
        source_name: source_name.to_string(),
        type_name: type_name.clone(),
    })?;
    let title = take_string(source_name, index, &mut table, "title")?.ok_or_else(|| missing("title"))?;
    let label = format!("{kind}[{title}]");

    let mut decl = ResourceDecl::new(kind, title);
    decl.when = take_string(source_name, index, &mut table, "when")?;

    for relation in RelationKind::ALL {
        let Some(value) = table.remove(relation.attr_name()) else {
            continue;
        };
        let targets = attr_value_from_toml(&value)
            .ok()
            .and_then(|value| match value {
                AttrValue::Str(s) => Some(vec![s]),
                AttrValue::List(items) => Some(items),
                _ => None,
            })
            .ok_or_else(|| ManifestError::InvalidValue {
                source_name: source_name.to_string(),
                resource: label.clone(),
                key: relation.attr_name().to_string(),
                reason: "expected a reference or a list of references".to_string(),
            })?;

        for target in targets {
            let target = Reference::parse(&target).ok_or_else(|| ManifestError::InvalidReference {
                source_name: source_name.to_string(),
                reference: target.clone(),
            })?;
            decl.relations.push(Relation {
                kind: relation,
                target,
            });
        }
    }

    for (key, value) in table {
        let value = attr_value_from_toml(&value).map_err(|reason| ManifestError::InvalidValue {
            source_name: source_name.to_string(),
            resource: label.clone(),
            key: key.clone(),
            reason,
        })?;
        decl.attrs.insert(key, value);
    }

    Ok(decl)
}

/// Parse manifests and register every class they declare
pub fn load_registry<'a, I>(sources: I) -> Result<ClassRegistry, ManifestError>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut registry = ClassRegistry::new();
    extend_registry(&mut registry, sources)?;
    Ok(registry)
}

/// Parse manifests into an existing registry
pub fn extend_registry<'a, I>(registry: &mut ClassRegistry, sources: I) -> Result<(), ManifestError>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    for (source_name, text) in sources {
        registry.register(parse_class(source_name, text)?)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResourceId;

    const SERVER: &str = r#"
[class]
name = "profiles::k3s_server"
supported_os = ["Debian"]
contains = ["profiles::base"]

[class.params]
version = { default = "v1.28.4+k3s1" }
disable_components = { default = [] }
token = {}

[[resource]]
type = "exec"
title = "install_k3s_server"
command = "curl -sfL https://get.k3s.io | INSTALL_K3S_VERSION={{ params.version }} sh -"
creates = "/usr/local/bin/k3s"
require = "Package[curl]"

[[resource]]
type = "Service"
title = "k3s"
ensure = "running"
enable = true
require = ["Exec[install_k3s_server]"]
when = "facts['os.family'] == 'Debian'"
"#;

    #[test]
    fn test_parse_class() {
        let class = parse_class("k3s_server.toml", SERVER).unwrap();

        assert_eq!(class.name, "profiles::k3s_server");
        assert_eq!(class.supported_os, ["Debian"]);
        assert_eq!(class.contains, ["profiles::base"]);
        assert_eq!(
            class.params["version"].default,
            Some(AttrValue::from("v1.28.4+k3s1"))
        );
        assert_eq!(
            class.params["disable_components"].default,
            Some(AttrValue::List(Vec::new()))
        );
        assert_eq!(class.params["token"].default, None);

        let exec = &class.resources[0];
        assert_eq!(exec.kind, ResourceKind::Exec);
        assert_eq!(exec.attrs["creates"], AttrValue::from("/usr/local/bin/k3s"));
        assert!(!exec.attrs.contains_key("require"));
        assert_eq!(
            exec.relations,
            [Relation {
                kind: RelationKind::Require,
                target: Reference::Resource(ResourceId::package("curl")),
            }]
        );

        let service = &class.resources[1];
        assert_eq!(service.kind, ResourceKind::Service);
        assert_eq!(service.attrs["enable"], AttrValue::Bool(true));
        assert_eq!(service.when.as_deref(), Some("facts['os.family'] == 'Debian'"));
    }

    #[test]
    fn test_missing_title() {
        let text = "[class]\nname = \"x\"\n\n[[resource]]\ntype = \"package\"\n";
        let err = parse_class("x.toml", text).unwrap_err();
        assert_eq!(err.to_string(), "x.toml: resource #0 is missing `title`");
    }

    #[test]
    fn test_unknown_type() {
        let text = "[class]\nname = \"x\"\n\n[[resource]]\ntype = \"mount\"\ntitle = \"/data\"\n";
        assert!(matches!(
            parse_class("x.toml", text),
            Err(ManifestError::UnknownType { .. })
        ));
    }

    #[test]
    fn test_float_attribute_rejected() {
        let text = "[class]\nname = \"x\"\n\n[[resource]]\ntype = \"exec\"\ntitle = \"t\"\ntimeout = 1.5\n";
        let err = parse_class("x.toml", text).unwrap_err();
        assert!(err.to_string().contains("unsupported value type float"));
    }

    #[test]
    fn test_bad_reference() {
        let text = "[class]\nname = \"x\"\n\n[[resource]]\ntype = \"exec\"\ntitle = \"t\"\nrequire = \"curl\"\n";
        assert!(matches!(
            parse_class("x.toml", text),
            Err(ManifestError::InvalidReference { .. })
        ));
    }

    #[test]
    fn test_unknown_class_key_rejected() {
        let text = "[class]\nname = \"x\"\ninclude = [\"y\"]\n";
        assert!(matches!(
            parse_class("x.toml", text),
            Err(ManifestError::Parse { .. })
        ));
    }

    #[test]
    fn test_load_registry_rejects_duplicates() {
        let text = "[class]\nname = \"profiles::base\"\n";
        let err = load_registry([("a.toml", text), ("b.toml", text)]).unwrap_err();
        assert!(matches!(err, ManifestError::DuplicateClass { .. }));
    }
}
