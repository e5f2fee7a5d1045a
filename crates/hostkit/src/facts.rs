//! Host facts from `/etc/os-release` and `/proc`

use anyhow::{Context, Result};
use declarative::facts::keys;
use declarative::{FactProvider, Facts};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

/// Reads OS, architecture, hostname and kernel facts from the local system
#[derive(Debug, Clone)]
pub struct OsReleaseFacts {
    root: PathBuf,
    arch: String,
}

impl Default for OsReleaseFacts {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/"),
            arch: std::env::consts::ARCH.to_string(),
        }
    }
}

impl OsReleaseFacts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read files relative to `root` instead of `/`
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Report `arch` (a Rust target architecture name) instead of the build's
    pub fn with_arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = arch.into();
        self
    }

    fn path(&self, absolute: &str) -> PathBuf {
        self.root.join(absolute.trim_start_matches('/'))
    }

    fn read_trimmed(&self, absolute: &str) -> Option<String> {
        fs::read_to_string(self.path(absolute))
            .ok()
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
    }
}

impl FactProvider for OsReleaseFacts {
    fn facts(&self) -> Result<Facts> {
        let os_release_path = self.path("/etc/os-release");
        let os_release = fs::read_to_string(&os_release_path)
            .or_else(|_| fs::read_to_string(self.path("/usr/lib/os-release")))
            .with_context(|| format!("Failed to read {}", os_release_path.display()))?;
        let release = parse_os_release(&os_release);

        let mut facts = Facts::new().with(keys::OS_ARCHITECTURE, debian_arch(&self.arch));

        if let Some(id) = release.get("ID") {
            let id_like = release.get("ID_LIKE").map_or("", String::as_str);
            facts = facts
                .with(keys::OS_NAME, capitalize(id))
                .with(keys::OS_FAMILY, os_family(id, id_like));
        }
        if let Some(version) = release.get("VERSION_ID") {
            let major = version.split('.').next().unwrap_or(version);
            facts = facts
                .with(keys::OS_RELEASE_FULL, version.as_str())
                .with(keys::OS_RELEASE_MAJOR, major);
        }
        if let Some(codename) = release
            .get("VERSION_CODENAME")
            .or_else(|| release.get("UBUNTU_CODENAME"))
        {
            facts = facts.with(keys::OS_CODENAME, codename.as_str());
        }
        if let Some(hostname) = self
            .read_trimmed("/etc/hostname")
            .or_else(|| self.read_trimmed("/proc/sys/kernel/hostname"))
        {
            facts = facts.with(keys::HOSTNAME, hostname);
        }
        if let Some(kernel) = self.read_trimmed("/proc/sys/kernel/osrelease") {
            facts = facts.with(keys::KERNEL_RELEASE, kernel);
        }

        log::debug!("Collected {} facts", facts.len());
        Ok(facts)
    }
}

/// Parse `KEY=value` lines, dropping comments and surrounding quotes
pub fn parse_os_release(text: &str) -> BTreeMap<String, String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| {
            let value = value.trim();
            let unquoted = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                .unwrap_or(value);
            (key.trim().to_string(), unquoted.to_string())
        })
        .collect()
}

/// OS family: Debian derivatives (Raspbian, Ubuntu) report `Debian`
pub fn os_family(id: &str, id_like: &str) -> String {
    if id == "debian" || id_like.split_whitespace().any(|like| like == "debian") {
        "Debian".to_string()
    } else {
        capitalize(id)
    }
}

/// Map a Rust target architecture to the Debian architecture name
pub fn debian_arch(arch: &str) -> &str {
    match arch {
        "aarch64" => "arm64",
        "x86_64" => "amd64",
        "arm" => "armhf",
        "x86" => "i386",
        other => other,
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    chars
        .next()
        .map(|first| first.to_uppercase().chain(chars).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    /// Write a minimal fake root for fact tests
    fn fake_root(os_release: &str, hostname: &str) -> tempfile::TempDir {
        let root = tempfile::tempdir().unwrap();
        let write = |path: &str, content: &str| {
            let full = root.path().join(path);
            fs::create_dir_all(full.parent().unwrap_or(Path::new("/"))).unwrap();
            fs::write(full, content).unwrap();
        };
        write("etc/os-release", os_release);
        write("etc/hostname", hostname);
        write("proc/sys/kernel/osrelease", "6.1.0-rpi7-rpi-v8\n");
        root
    }

    const BOOKWORM: &str = r#"PRETTY_NAME="Debian GNU/Linux 12 (bookworm)"
NAME="Debian GNU/Linux"
VERSION_ID="12"
VERSION="12 (bookworm)"
VERSION_CODENAME=bookworm
ID=debian
HOME_URL="https://www.debian.org/"
"#;

    const RASPBIAN: &str = r#"PRETTY_NAME="Raspbian GNU/Linux 11 (bullseye)"
VERSION_ID="11"
VERSION_CODENAME=bullseye
ID=raspbian
ID_LIKE=debian
"#;

    const JAMMY: &str = r#"NAME="Ubuntu"
VERSION_ID="22.04"
ID=ubuntu
ID_LIKE=debian
UBUNTU_CODENAME=jammy
"#;

    #[test]
    fn test_debian_bookworm_arm64() {
        let root = fake_root(BOOKWORM, "pi-worker-01\n");
        let facts = OsReleaseFacts::with_root(root.path())
            .with_arch("aarch64")
            .facts()
            .unwrap();

        assert_eq!(facts.os_family(), Some("Debian"));
        assert_eq!(facts.get(keys::OS_NAME), Some("Debian"));
        assert_eq!(facts.get(keys::OS_RELEASE_FULL), Some("12"));
        assert_eq!(facts.get(keys::OS_RELEASE_MAJOR), Some("12"));
        assert_eq!(facts.get(keys::OS_CODENAME), Some("bookworm"));
        assert_eq!(facts.get(keys::OS_ARCHITECTURE), Some("arm64"));
        assert_eq!(facts.get(keys::HOSTNAME), Some("pi-worker-01"));
        assert_eq!(facts.get(keys::KERNEL_RELEASE), Some("6.1.0-rpi7-rpi-v8"));
    }

    #[test]
    fn test_raspbian_is_debian_family() {
        let root = fake_root(RASPBIAN, "raspberrypi");
        let facts = OsReleaseFacts::with_root(root.path())
            .with_arch("arm")
            .facts()
            .unwrap();
        assert_eq!(facts.os_family(), Some("Debian"));
        assert_eq!(facts.get(keys::OS_NAME), Some("Raspbian"));
        assert_eq!(facts.get(keys::OS_ARCHITECTURE), Some("armhf"));
    }

    #[test]
    fn test_ubuntu_codename_and_major() {
        let root = fake_root(JAMMY, "k3s-server");
        let facts = OsReleaseFacts::with_root(root.path())
            .with_arch("x86_64")
            .facts()
            .unwrap();
        assert_eq!(facts.os_family(), Some("Debian"));
        assert_eq!(facts.get(keys::OS_RELEASE_MAJOR), Some("22"));
        assert_eq!(facts.get(keys::OS_CODENAME), Some("jammy"));
        assert_eq!(facts.get(keys::OS_ARCHITECTURE), Some("amd64"));
    }

    #[test]
    fn test_missing_os_release_is_error() {
        let root = tempfile::tempdir().unwrap();
        assert!(OsReleaseFacts::with_root(root.path()).facts().is_err());
    }

    #[test]
    fn test_non_debian_family() {
        assert_eq!(os_family("arch", ""), "Arch");
        assert_eq!(os_family("fedora", "rhel centos"), "Fedora");
    }

    #[test]
    fn test_parse_os_release_quotes_and_comments() {
        let parsed = parse_os_release("# comment\nID='debian'\nNAME=\"Debian\"\n\nBROKEN\n");
        assert_eq!(parsed.get("ID").map(String::as_str), Some("debian"));
        assert_eq!(parsed.get("NAME").map(String::as_str), Some("Debian"));
        assert_eq!(parsed.len(), 2);
    }
}
