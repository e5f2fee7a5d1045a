use crate::Context;
use crate::cli::RoleArgs;
use crate::commands::{Session, print_json};
use crate::ui;
use anyhow::Result;
use colored::Colorize;
use declarative::Catalog;
use serde_json::{Value, json};
use std::path::Path;

pub fn run(ctx: &Context, config_path: Option<&Path>, args: &RoleArgs) -> Result<()> {
    let session = Session::load(config_path, args.role.as_deref())?;
    let registry = session.registry()?;
    let catalog = session.compile(&registry)?;

    if args.json {
        return print_json(&catalog_json(&session.role, &catalog));
    }

    ui::header(&format!("Catalog for {}", session.role));
    for class in catalog.classes() {
        ui::section(&class.name);
        for (name, value) in &class.params {
            ui::kv(&format!("${name}"), &value.to_string());
        }
        for node in catalog.resources_of(&class.name) {
            println!("  {}", node.id.to_string().bold());
            if !ctx.quiet {
                for (attr, value) in &node.attrs {
                    println!("      {} = {}", attr.dimmed(), value);
                }
            }
        }
    }
    println!();
    ui::info(&format!(
        "{} resources from {} classes",
        catalog.len(),
        catalog.classes().len()
    ));
    Ok(())
}

/// Classes with their parameters and the resources each declared
pub fn catalog_json(role: &str, catalog: &Catalog) -> Value {
    let classes: Vec<Value> = catalog
        .classes()
        .iter()
        .map(|class| {
            let resources: Vec<Value> = catalog
                .resources_of(&class.name)
                .map(|node| {
                    json!({
                        "id": node.id.to_string(),
                        "attributes": node.attrs,
                    })
                })
                .collect();
            json!({
                "name": class.name,
                "params": class.params,
                "contains": class.contained,
                "resources": resources,
            })
        })
        .collect();

    json!({
        "role": role,
        "resource_count": catalog.len(),
        "classes": classes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site;
    use declarative::Compiler;
    use declarative::testing::debian_facts;

    #[test]
    fn test_catalog_json_shape() {
        let registry = site::embedded_registry().unwrap();
        let facts = debian_facts();
        let catalog = Compiler::new(&registry, &facts)
            .compile(&["profiles::monitoring_agent"])
            .unwrap();

        let value = catalog_json("profiles::monitoring_agent", &catalog);
        assert_eq!(value["resource_count"], catalog.len());

        let classes = value["classes"].as_array().unwrap();
        let monitoring = classes
            .iter()
            .find(|class| class["name"] == "profiles::monitoring_agent")
            .unwrap();
        assert_eq!(monitoring["params"]["port"], 9100);
        assert_eq!(
            monitoring["resources"][0]["id"],
            "Package[prometheus-node-exporter]"
        );
    }
}
