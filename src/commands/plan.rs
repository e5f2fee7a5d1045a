use crate::Context;
use crate::cli::RoleArgs;
use crate::commands::{Session, print_json};
use crate::ui;
use anyhow::Result;
use colored::Colorize;
use declarative::{Catalog, EdgeKind, Plan, resolve};
use serde::Serialize;
use std::path::Path;

/// One resource in application order
#[derive(Debug, Serialize)]
pub struct PlanStep {
    pub position: usize,
    pub id: String,
    pub class: String,
    pub after: Vec<Dependency>,
}

#[derive(Debug, Serialize)]
pub struct Dependency {
    pub id: String,
    /// Strongest relation between the two; notify and subscribe also refresh
    pub kind: EdgeKind,
}

pub fn run(ctx: &Context, config_path: Option<&Path>, args: &RoleArgs) -> Result<()> {
    let session = Session::load(config_path, args.role.as_deref())?;
    let registry = session.registry()?;
    let catalog = session.compile(&registry)?;
    let plan = resolve(&catalog)?;
    let steps = steps(&catalog, &plan);

    if args.json {
        return print_json(&steps);
    }

    ui::header(&format!("Plan for {}", session.role));
    let width = steps.len().to_string().len();
    for step in &steps {
        println!(
            "  {:>width$}. {} {}",
            step.position,
            step.id.bold(),
            format!("({})", step.class).dimmed()
        );
        if !ctx.quiet {
            for dep in &step.after {
                let line = format!("{} {}", dep.kind, dep.id);
                if dep.kind.refreshes() {
                    println!("  {:width$}    {} {}", "", "↻".cyan(), line.cyan());
                } else {
                    println!("  {:width$}    {} {}", "", "←".dimmed(), line.dimmed());
                }
            }
        }
    }
    println!();
    ui::info(&format!("{} resources, nothing applied", steps.len()));
    Ok(())
}

/// Resources in application order with their direct dependencies
pub fn steps(catalog: &Catalog, plan: &Plan) -> Vec<PlanStep> {
    plan.order
        .iter()
        .enumerate()
        .map(|(position, &index)| {
            let node = catalog.node(index);
            let after = plan.predecessors[index]
                .iter()
                .map(|&pred| Dependency {
                    id: catalog.node(pred).id.to_string(),
                    kind: edge_kind(catalog, pred, index),
                })
                .collect();
            PlanStep {
                position: position + 1,
                id: node.id.to_string(),
                class: node.class.clone(),
                after,
            }
        })
        .collect()
}

fn edge_kind(catalog: &Catalog, from: usize, to: usize) -> EdgeKind {
    let kinds: Vec<EdgeKind> = catalog
        .edges_from(from)
        .filter(|edge| edge.to == to)
        .map(|edge| edge.kind)
        .collect();
    // A refreshing edge says more than a plain ordering one
    kinds
        .iter()
        .copied()
        .find(EdgeKind::refreshes)
        .or_else(|| kinds.iter().copied().min())
        .unwrap_or(EdgeKind::Containment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site;
    use declarative::Compiler;
    use declarative::testing::debian_facts;

    #[test]
    fn test_networking_plan_steps() {
        let registry = site::embedded_registry().unwrap();
        let facts = debian_facts();
        let catalog = Compiler::new(&registry, &facts)
            .compile(&["profiles::networking"])
            .unwrap();
        let plan = resolve(&catalog).unwrap();
        let steps = steps(&catalog, &plan);

        assert_eq!(steps.len(), catalog.len());
        assert_eq!(steps[0].position, 1);

        let position = |id: &str| steps.iter().position(|step| step.id == id).unwrap();
        assert!(position("Exec[apt_update]") < position("Package[avahi-daemon]"));
        assert!(position("File[/etc/sysctl.d/90-k3s.conf]") < position("Exec[apply_sysctl]"));

        let sysctl = &steps[position("Exec[apply_sysctl]")];
        let notify = sysctl
            .after
            .iter()
            .find(|dep| dep.id == "File[/etc/sysctl.d/90-k3s.conf]")
            .unwrap();
        assert_eq!(notify.kind, EdgeKind::Notify);
    }
}
