//! Host facts
//!
//! Facts are read once at the start of a run and handed to the compiler.
//! Nothing in the engine mutates them afterwards.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Well-known fact names
pub mod keys {
    pub const OS_FAMILY: &str = "os.family";
    pub const OS_NAME: &str = "os.name";
    pub const OS_RELEASE_FULL: &str = "os.release.full";
    pub const OS_RELEASE_MAJOR: &str = "os.release.major";
    pub const OS_CODENAME: &str = "os.distro.codename";
    pub const OS_ARCHITECTURE: &str = "os.architecture";
    pub const HOSTNAME: &str = "networking.hostname";
    pub const KERNEL_RELEASE: &str = "kernel.release";
}

/// Immutable key/value facts describing one host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Facts(BTreeMap<String, String>);

impl Facts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn os_family(&self) -> Option<&str> {
        self.get(keys::OS_FAMILY)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Builder-style insert, used while a provider assembles facts
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Return a copy with `overrides` layered on top
    pub fn merged(&self, overrides: &BTreeMap<String, String>) -> Self {
        let mut merged = self.0.clone();
        merged.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self(merged)
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.0
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Facts {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Source of host facts
///
/// Implement this trait to detect facts from the running system; tests use
/// [`StaticFacts`].
pub trait FactProvider: Send + Sync {
    fn facts(&self) -> Result<Facts>;
}

/// Fact provider that returns a fixed set
#[derive(Debug, Clone, Default)]
pub struct StaticFacts(pub Facts);

impl FactProvider for StaticFacts {
    fn facts(&self) -> Result<Facts> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merged_overrides_win() {
        let facts = Facts::new()
            .with(keys::OS_FAMILY, "Debian")
            .with(keys::HOSTNAME, "raspberrypi");
        let overrides = BTreeMap::from([(keys::HOSTNAME.to_string(), "pi-worker-01".to_string())]);

        let merged = facts.merged(&overrides);
        assert_eq!(merged.get(keys::HOSTNAME), Some("pi-worker-01"));
        assert_eq!(merged.os_family(), Some("Debian"));
        assert_eq!(facts.get(keys::HOSTNAME), Some("raspberrypi"));
    }

    #[test]
    fn test_static_provider() {
        let facts: Facts = [(keys::OS_FAMILY, "Debian")].into_iter().collect();
        let provider = StaticFacts(facts.clone());
        assert_eq!(provider.facts().unwrap(), facts);
    }
}
