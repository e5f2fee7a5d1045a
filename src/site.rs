//! Site manifests: the roles and profiles of the edge fleet
//!
//! The manifests under `site/` are compiled into the binary. Extra manifests
//! can be loaded from a directory on top of them; a class name may only be
//! declared once across both.

use anyhow::{Context, Result};
use declarative::{ClassRegistry, manifest};
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

/// Embedded manifests as (source name, text)
pub const MANIFESTS: &[(&str, &str)] = &[
    ("site/roles/pi_worker.toml", include_str!("../site/roles/pi_worker.toml")),
    ("site/roles/k3s_server.toml", include_str!("../site/roles/k3s_server.toml")),
    ("site/profiles/base.toml", include_str!("../site/profiles/base.toml")),
    ("site/profiles/networking.toml", include_str!("../site/profiles/networking.toml")),
    ("site/profiles/security.toml", include_str!("../site/profiles/security.toml")),
    ("site/profiles/k3s_agent.toml", include_str!("../site/profiles/k3s_agent.toml")),
    ("site/profiles/k3s_server.toml", include_str!("../site/profiles/k3s_server.toml")),
    (
        "site/profiles/monitoring_agent.toml",
        include_str!("../site/profiles/monitoring_agent.toml"),
    ),
];

/// Registry of the embedded classes
pub fn embedded_registry() -> Result<ClassRegistry> {
    manifest::load_registry(MANIFESTS.iter().copied()).context("Invalid embedded site manifest")
}

/// Embedded classes plus every `*.toml` under `extra_dir`
pub fn registry(extra_dir: Option<&Path>) -> Result<ClassRegistry> {
    let mut registry = embedded_registry()?;
    if let Some(dir) = extra_dir {
        let sources = read_manifest_dir(dir)?;
        log::info!("Loaded {} manifests from {}", sources.len(), dir.display());
        manifest::extend_registry(
            &mut registry,
            sources.iter().map(|(name, text)| (name.as_str(), text.as_str())),
        )?;
    }
    Ok(registry)
}

/// Read `*.toml` files under `dir`, sorted by path
pub fn read_manifest_dir(dir: &Path) -> Result<Vec<(String, String)>> {
    if !dir.is_dir() {
        anyhow::bail!("Manifest directory not found: {}", dir.display());
    }

    let mut sources = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk {}", dir.display()))?;
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().is_none_or(|ext| ext != "toml") {
            continue;
        }
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest {}", path.display()))?;
        sources.push((path.display().to_string(), text));
    }
    Ok(sources)
}
