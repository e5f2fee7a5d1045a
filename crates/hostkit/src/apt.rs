//! Debian package backend using `dpkg-query`, `apt-cache` and `apt-get`.

use crate::command::run_program;
use crate::error::{Error, Result};
use crate::retry::{RetryConfig, with_retry};
use declarative::{PackageProvider, PackageStatus};

const APT_ENV: &[(&str, &str)] = &[("DEBIAN_FRONTEND", "noninteractive")];

/// Package provider backed by apt
#[derive(Debug, Clone, Default)]
pub struct AptPackages {
    retry: RetryConfig,
}

impl AptPackages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retry(retry: RetryConfig) -> Self {
        Self { retry }
    }

    fn apt_get(&self, args: &[&str], package: &str) -> Result<()> {
        let mut full = vec![
            "-q",
            "-y",
            "-o",
            "Dpkg::Options::=--force-confdef",
            "-o",
            "Dpkg::Options::=--force-confold",
        ];
        full.extend_from_slice(args);

        with_retry(&self.retry, &format!("apt-get {}", args.join(" ")), || {
            let output = run_program("apt-get", &full, APT_ENV)?;
            if output.status.success() {
                Ok(())
            } else {
                Err(Error::from_apt_output(
                    &String::from_utf8_lossy(&output.stderr),
                    output.status.code(),
                    Some(package),
                ))
            }
        })
    }
}

impl PackageProvider for AptPackages {
    fn query(&self, name: &str) -> anyhow::Result<PackageStatus> {
        let output = run_program(
            "dpkg-query",
            &["-W", "-f", "${db:Status-Abbrev}\t${Version}\n", name],
            &[],
        )?;
        // dpkg-query exits 1 for packages it has never heard of
        if !output.status.success() {
            return Ok(PackageStatus::default());
        }
        Ok(parse_dpkg_query(&String::from_utf8_lossy(&output.stdout)))
    }

    fn candidate_version(&self, name: &str) -> anyhow::Result<Option<String>> {
        let output = run_program("apt-cache", &["policy", name], &[])?;
        if !output.status.success() {
            return Err(Error::from_apt_output(
                &String::from_utf8_lossy(&output.stderr),
                output.status.code(),
                Some(name),
            )
            .into());
        }
        Ok(parse_candidate(&String::from_utf8_lossy(&output.stdout)))
    }

    fn install(&self, name: &str, version: Option<&str>) -> anyhow::Result<()> {
        let target = match version {
            Some(version) => format!("{name}={version}"),
            None => name.to_string(),
        };
        log::info!("Installing {target}");
        self.apt_get(&["install", &target], name)?;
        Ok(())
    }

    fn remove(&self, name: &str, purge: bool) -> anyhow::Result<()> {
        let action = if purge { "purge" } else { "remove" };
        log::info!("Running apt-get {action} {name}");
        self.apt_get(&[action, name], name)?;
        Ok(())
    }
}

/// Package state from `dpkg-query -W -f '${db:Status-Abbrev}\t${Version}'`
///
/// Only the `ii` state counts as installed. `rc` means removed with its
/// config files left behind; half-installed states count as neither.
pub fn parse_dpkg_query(output: &str) -> PackageStatus {
    let Some((status, version)) = output.lines().next().and_then(|line| line.split_once('\t'))
    else {
        return PackageStatus::default();
    };
    let version = version.trim();
    match status.trim_end() {
        "ii" if !version.is_empty() => PackageStatus {
            installed: Some(version.to_string()),
            config_files_remain: false,
        },
        "rc" => PackageStatus {
            installed: None,
            config_files_remain: true,
        },
        _ => PackageStatus::default(),
    }
}

/// Candidate version from `apt-cache policy`
pub fn parse_candidate(output: &str) -> Option<String> {
    output
        .lines()
        .find_map(|line| line.trim().strip_prefix("Candidate:"))
        .map(str::trim)
        .filter(|candidate| !candidate.is_empty() && *candidate != "(none)")
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dpkg_query_installed() {
        let status = parse_dpkg_query("ii \t7.88.1-10+deb12u5\n");
        assert_eq!(status.installed.as_deref(), Some("7.88.1-10+deb12u5"));
        assert!(!status.config_files_remain);
    }

    #[test]
    fn test_parse_dpkg_query_config_files_only() {
        let status = parse_dpkg_query("rc \t2:9.2p1-2\n");
        assert_eq!(status.installed, None);
        assert!(status.config_files_remain);
    }

    #[test]
    fn test_parse_dpkg_query_not_installed() {
        assert_eq!(parse_dpkg_query("un \t\n"), PackageStatus::default());
        assert_eq!(parse_dpkg_query("iF \t1.0\n"), PackageStatus::default());
        assert_eq!(parse_dpkg_query(""), PackageStatus::default());
    }

    #[test]
    fn test_parse_candidate() {
        let policy = "\
curl:
  Installed: 7.88.1-10+deb12u4
  Candidate: 7.88.1-10+deb12u5
  Version table:
     7.88.1-10+deb12u5 500
        500 http://deb.debian.org/debian-security bookworm-security/main arm64 Packages
";
        assert_eq!(parse_candidate(policy).as_deref(), Some("7.88.1-10+deb12u5"));
    }

    #[test]
    fn test_parse_candidate_none() {
        let policy = "\
k3s:
  Installed: (none)
  Candidate: (none)
  Version table:
";
        assert_eq!(parse_candidate(policy), None);
        assert_eq!(parse_candidate(""), None);
    }
}
