pub mod apply;
pub mod compile;
pub mod facts;
pub mod plan;
pub mod report;

use crate::config::Config;
use crate::site;
use anyhow::{Context as _, Result};
use declarative::{Catalog, ClassRegistry, Compiler, FactProvider, Facts};
use hostkit::OsReleaseFacts;
use std::path::{Path, PathBuf};

/// Config, facts and role shared by the commands that compile a catalog
pub struct Session {
    pub config: Config,
    pub source: Option<PathBuf>,
    pub facts: Facts,
    pub role: String,
}

impl Session {
    pub fn load(config_path: Option<&Path>, cli_role: Option<&str>) -> Result<Self> {
        let loaded = Config::load(config_path)?;
        if let Some(source) = &loaded.source {
            log::info!("Using config {}", source.display());
        }
        let facts = detect_facts(&loaded.config)?;
        let role = loaded.config.role(cli_role);

        Ok(Self {
            config: loaded.config,
            source: loaded.source,
            facts,
            role,
        })
    }

    pub fn registry(&self) -> Result<ClassRegistry> {
        site::registry(self.config.manifest_dir().as_deref())
    }

    /// Compile the role against this host's facts
    pub fn compile(&self, registry: &ClassRegistry) -> Result<Catalog> {
        let catalog = Compiler::new(registry, &self.facts)
            .with_params(self.config.class_params()?)
            .compile(&[self.role.as_str()])
            .with_context(|| format!("Failed to compile {}", self.role))?;
        log::info!(
            "Compiled {} into {} resources from {} classes",
            self.role,
            catalog.len(),
            catalog.classes().len()
        );
        Ok(catalog)
    }
}

/// Facts from `/etc/os-release` and friends, with config overrides applied
pub fn detect_facts(config: &Config) -> Result<Facts> {
    let detected = OsReleaseFacts::new()
        .facts()
        .context("Failed to detect host facts")?;
    Ok(config.apply_fact_overrides(&detected))
}

/// Print a value as pretty JSON on stdout
pub fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize output")?
    );
    Ok(())
}
