//! edgeform configuration
//!
//! ```toml
//! role = "roles::k3s_server"
//! manifest_dir = "/etc/edgeform/manifests"
//! jobs = 4
//! timeout_secs = 1800
//!
//! [facts]
//! "networking.hostname" = "k3s-server-01"
//!
//! [params."profiles::k3s_server"]
//! version = "v1.28.4+k3s1"
//! disable_components = ["traefik", "servicelb"]
//!
//! [retry]
//! max_attempts = 4
//! base_delay_secs = 5
//! ```

use crate::paths;
use anyhow::{Context, Result};
use declarative::manifest::attr_value_from_toml;
use declarative::{ClassParams, Facts};
use hostkit::RetryConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Role converged when neither the config nor the command line names one
pub const DEFAULT_ROLE: &str = "roles::pi_worker";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Class to converge, e.g. `roles::pi_worker`
    pub role: Option<String>,

    /// Directory of extra class manifests, searched recursively for `*.toml`
    pub manifest_dir: Option<String>,

    /// Parallel workers for independent resources
    pub jobs: Option<usize>,

    /// Deadline for a whole run
    pub timeout_secs: Option<u64>,

    /// Facts layered over the detected ones
    #[serde(default)]
    pub facts: BTreeMap<String, String>,

    /// Class parameters, keyed by class name
    #[serde(default)]
    pub params: BTreeMap<String, toml::Table>,

    #[serde(default)]
    pub retry: RetrySettings,
}

/// Retry settings for transient package manager failures
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let defaults = RetryConfig::default();
        Self {
            max_attempts: defaults.max_attempts,
            base_delay_secs: defaults.base_delay.as_secs(),
        }
    }
}

impl RetrySettings {
    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig::new(
            self.max_attempts.max(1),
            Duration::from_secs(self.base_delay_secs),
            2.0,
        )
    }
}

/// A loaded config and the file it came from
#[derive(Debug, Clone, Default)]
pub struct LoadedConfig {
    pub config: Config,
    pub source: Option<PathBuf>,
}

impl Config {
    /// Load the config from an explicit path or the standard locations
    pub fn load(explicit: Option<&Path>) -> Result<LoadedConfig> {
        let Some(path) = paths::config_file(explicit)? else {
            return Ok(LoadedConfig::default());
        };
        let config = Self::from_file(&path)?;
        Ok(LoadedConfig {
            config,
            source: Some(path),
        })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        // Surface bad parameter values now rather than at compile time
        config.class_params()?;
        Ok(config)
    }

    /// Role to converge: command line, then config, then the default
    pub fn role(&self, cli_role: Option<&str>) -> String {
        let role = cli_role
            .or(self.role.as_deref())
            .unwrap_or(DEFAULT_ROLE);
        qualify_role(role)
    }

    /// Class parameters converted to engine values
    pub fn class_params(&self) -> Result<BTreeMap<String, ClassParams>> {
        self.params
            .iter()
            .map(|(class, table)| {
                let params = table
                    .iter()
                    .map(|(name, value)| {
                        attr_value_from_toml(value)
                            .map(|value| (name.clone(), value))
                            .map_err(|reason| {
                                anyhow::anyhow!("params.\"{class}\".{name}: {reason}")
                            })
                    })
                    .collect::<Result<ClassParams>>()?;
                Ok((class.clone(), params))
            })
            .collect()
    }

    /// Detected facts with the configured overrides applied
    pub fn apply_fact_overrides(&self, detected: &Facts) -> Facts {
        detected.merged(&self.facts)
    }

    pub fn manifest_dir(&self) -> Option<PathBuf> {
        self.manifest_dir.as_deref().map(paths::expand)
    }

    pub fn timeout(&self, cli_timeout: Option<u64>) -> Option<Duration> {
        cli_timeout
            .or(self.timeout_secs)
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

/// `pi_worker` is shorthand for `roles::pi_worker`
pub fn qualify_role(role: &str) -> String {
    if role.contains("::") {
        role.to_string()
    } else {
        format!("roles::{role}")
    }
}
