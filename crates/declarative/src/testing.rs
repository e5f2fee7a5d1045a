//! In-memory host for tests
//!
//! [`FakeHost`] implements every capability trait over an in-memory model of
//! packages, services, files, and command stubs, and records each mutation so
//! tests can assert on what a run did.

use crate::context::{
    CommandPurpose, CommandRunner, CommandSpec, FileProvider, FileStatus, PackageProvider,
    PackageStatus, ServiceProvider, ServiceStatus,
};
use crate::diff::content_digest;
use crate::facts::{Facts, keys};
use crate::types::CommandResult;
use anyhow::{Result, anyhow, bail};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

const DEFAULT_VERSION: &str = "1.0.0";

#[derive(Debug, Clone)]
enum Entry {
    File { content: String, mode: u32 },
    Directory { mode: u32 },
    Link { target: PathBuf },
}

#[derive(Debug, Clone)]
struct CommandStub {
    pattern: String,
    status: i32,
    creates: Option<PathBuf>,
}

#[derive(Debug, Default)]
struct State {
    packages: BTreeMap<String, String>,
    config_remnants: BTreeSet<String>,
    candidates: BTreeMap<String, String>,
    failing_installs: BTreeSet<String>,
    silent_installs: BTreeSet<String>,
    services: BTreeMap<String, ServiceStatus>,
    broken_services: BTreeSet<String>,
    files: BTreeMap<PathBuf, Entry>,
    commands: Vec<CommandStub>,
    mutations: Vec<String>,
    commands_run: Vec<String>,
}

/// Simulated host state
///
/// Unknown packages are absent and unknown services are stopped and
/// disabled. Commands with no matching stub exit 0 when run as an action
/// and 1 when run as a guard.
#[derive(Debug, Default)]
pub struct FakeHost {
    state: Mutex<State>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_state(self, f: impl FnOnce(&mut State)) -> Self {
        f(&mut self.state());
        self
    }

    pub fn with_package(self, name: &str, version: &str) -> Self {
        self.with_state(|s| {
            s.packages.insert(name.to_string(), version.to_string());
        })
    }

    /// Package removed without purging: not installed, config files left
    pub fn with_config_remnants(self, name: &str) -> Self {
        self.with_state(|s| {
            s.packages.remove(name);
            s.config_remnants.insert(name.to_string());
        })
    }

    /// Version `latest` resolves to
    pub fn with_candidate(self, name: &str, version: &str) -> Self {
        self.with_state(|s| {
            s.candidates.insert(name.to_string(), version.to_string());
        })
    }

    /// Installing this package errors
    pub fn failing_install(self, name: &str) -> Self {
        self.with_state(|s| {
            s.failing_installs.insert(name.to_string());
        })
    }

    /// Installing this package reports success but installs nothing
    pub fn with_silent_install(self, name: &str) -> Self {
        self.with_state(|s| {
            s.silent_installs.insert(name.to_string());
        })
    }

    pub fn with_service(self, name: &str, running: bool, enabled: bool) -> Self {
        self.with_state(|s| {
            s.services
                .insert(name.to_string(), ServiceStatus { running, enabled });
        })
    }

    /// Querying this service errors
    pub fn with_broken_service(self, name: &str) -> Self {
        self.with_state(|s| {
            s.broken_services.insert(name.to_string());
        })
    }

    pub fn with_file(self, path: &str, content: &str, mode: u32) -> Self {
        self.with_state(|s| {
            s.files.insert(
                PathBuf::from(path),
                Entry::File {
                    content: content.to_string(),
                    mode,
                },
            );
        })
    }

    pub fn with_directory(self, path: &str, mode: u32) -> Self {
        self.with_state(|s| {
            s.files.insert(PathBuf::from(path), Entry::Directory { mode });
        })
    }

    pub fn with_link(self, path: &str, target: &str) -> Self {
        self.with_state(|s| {
            s.files.insert(
                PathBuf::from(path),
                Entry::Link {
                    target: PathBuf::from(target),
                },
            );
        })
    }

    /// Commands containing `pattern` exit with `status`
    pub fn with_command(self, pattern: &str, status: i32) -> Self {
        self.with_state(|s| {
            s.commands.push(CommandStub {
                pattern: pattern.to_string(),
                status,
                creates: None,
            });
        })
    }

    /// Like [`FakeHost::with_command`], and a successful run creates `path`
    pub fn with_command_creating(self, pattern: &str, status: i32, path: &str) -> Self {
        self.with_state(|s| {
            s.commands.push(CommandStub {
                pattern: pattern.to_string(),
                status,
                creates: Some(PathBuf::from(path)),
            });
        })
    }

    /// State-changing operations, in order
    pub fn mutations(&self) -> Vec<String> {
        self.state().mutations.clone()
    }

    /// Every command run, guards included, in order
    pub fn commands_run(&self) -> Vec<String> {
        self.state().commands_run.clone()
    }

    pub fn installed(&self, name: &str) -> Option<String> {
        self.state().packages.get(name).cloned()
    }

    pub fn service(&self, name: &str) -> ServiceStatus {
        self.state().services.get(name).copied().unwrap_or_default()
    }
}

impl PackageProvider for FakeHost {
    fn query(&self, name: &str) -> Result<PackageStatus> {
        let state = self.state();
        Ok(PackageStatus {
            installed: state.packages.get(name).cloned(),
            config_files_remain: state.config_remnants.contains(name),
        })
    }

    fn candidate_version(&self, name: &str) -> Result<Option<String>> {
        Ok(self.state().candidates.get(name).cloned())
    }

    fn install(&self, name: &str, version: Option<&str>) -> Result<()> {
        let mut state = self.state();
        if state.failing_installs.contains(name) {
            bail!("E: Unable to locate package {name}");
        }
        state.mutations.push(match version {
            Some(version) => format!("install {name}={version}"),
            None => format!("install {name}"),
        });
        if state.silent_installs.contains(name) {
            return Ok(());
        }
        let version = version
            .map(str::to_string)
            .or_else(|| state.candidates.get(name).cloned())
            .unwrap_or_else(|| DEFAULT_VERSION.to_string());
        state.config_remnants.remove(name);
        state.packages.insert(name.to_string(), version);
        Ok(())
    }

    fn remove(&self, name: &str, purge: bool) -> Result<()> {
        let mut state = self.state();
        state
            .mutations
            .push(format!("{} {name}", if purge { "purge" } else { "remove" }));
        let was_installed = state.packages.remove(name).is_some();
        if purge {
            state.config_remnants.remove(name);
        } else if was_installed {
            state.config_remnants.insert(name.to_string());
        }
        Ok(())
    }
}

impl FakeHost {
    fn update_service(&self, name: &str, action: &str, f: impl FnOnce(&mut ServiceStatus)) {
        let mut state = self.state();
        state.mutations.push(format!("{action} service {name}"));
        f(state.services.entry(name.to_string()).or_default());
    }
}

impl ServiceProvider for FakeHost {
    fn status(&self, name: &str) -> Result<ServiceStatus> {
        let state = self.state();
        if state.broken_services.contains(name) {
            bail!("Failed to get properties: Connection timed out");
        }
        Ok(state.services.get(name).copied().unwrap_or_default())
    }

    fn start(&self, name: &str) -> Result<()> {
        self.update_service(name, "start", |s| s.running = true);
        Ok(())
    }

    fn stop(&self, name: &str) -> Result<()> {
        self.update_service(name, "stop", |s| s.running = false);
        Ok(())
    }

    fn restart(&self, name: &str) -> Result<()> {
        self.update_service(name, "restart", |s| s.running = true);
        Ok(())
    }

    fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let action = if enabled { "enable" } else { "disable" };
        self.update_service(name, action, |s| s.enabled = enabled);
        Ok(())
    }
}

impl FileProvider for FakeHost {
    fn inspect(&self, path: &Path) -> Result<FileStatus> {
        Ok(match self.state().files.get(path) {
            None => FileStatus::Missing,
            Some(Entry::File { content, mode }) => FileStatus::File {
                digest: content_digest(content),
                mode: *mode,
            },
            Some(Entry::Directory { mode }) => FileStatus::Directory { mode: *mode },
            Some(Entry::Link { target }) => FileStatus::Link {
                target: target.clone(),
            },
        })
    }

    fn read_to_string(&self, path: &Path) -> Result<Option<String>> {
        Ok(match self.state().files.get(path) {
            Some(Entry::File { content, .. }) => Some(content.clone()),
            _ => None,
        })
    }

    fn write_file(&self, path: &Path, content: &str) -> Result<()> {
        let mut state = self.state();
        state.mutations.push(format!("write {}", path.display()));
        let mode = match state.files.get(path) {
            Some(Entry::File { mode, .. }) => *mode,
            _ => 0o644,
        };
        state.files.insert(
            path.to_path_buf(),
            Entry::File {
                content: content.to_string(),
                mode,
            },
        );
        Ok(())
    }

    fn create_dir(&self, path: &Path) -> Result<()> {
        let mut state = self.state();
        state.mutations.push(format!("mkdir {}", path.display()));
        state
            .files
            .insert(path.to_path_buf(), Entry::Directory { mode: 0o755 });
        Ok(())
    }

    fn symlink(&self, path: &Path, target: &Path) -> Result<()> {
        let mut state = self.state();
        if state.files.contains_key(path) {
            bail!("{} already exists", path.display());
        }
        state
            .mutations
            .push(format!("link {} -> {}", path.display(), target.display()));
        state.files.insert(
            path.to_path_buf(),
            Entry::Link {
                target: target.to_path_buf(),
            },
        );
        Ok(())
    }

    fn remove_path(&self, path: &Path) -> Result<()> {
        let mut state = self.state();
        state.mutations.push(format!("remove {}", path.display()));
        state.files.retain(|entry, _| !entry.starts_with(path));
        Ok(())
    }

    fn set_mode(&self, path: &Path, mode: u32) -> Result<()> {
        let mut state = self.state();
        let current = match state.files.get_mut(path) {
            Some(Entry::File { mode, .. } | Entry::Directory { mode }) => mode,
            Some(Entry::Link { .. }) => bail!("cannot chmod symlink {}", path.display()),
            None => return Err(anyhow!("{} does not exist", path.display())),
        };
        if *current == mode {
            return Ok(());
        }
        *current = mode;
        state
            .mutations
            .push(format!("chmod {mode:04o} {}", path.display()));
        Ok(())
    }
}

impl CommandRunner for FakeHost {
    fn run(&self, spec: &CommandSpec) -> Result<CommandResult> {
        let mut state = self.state();
        state.commands_run.push(spec.command.clone());

        let stub = state
            .commands
            .iter()
            .find(|stub| spec.command.contains(&stub.pattern))
            .cloned();
        let status = stub.as_ref().map_or(
            match spec.purpose {
                CommandPurpose::Guard => 1,
                CommandPurpose::Action => 0,
            },
            |stub| stub.status,
        );

        if spec.purpose == CommandPurpose::Action {
            state.mutations.push(format!("run {}", spec.command));
            if status == 0
                && let Some(path) = stub.and_then(|stub| stub.creates)
            {
                state.files.insert(
                    path,
                    Entry::File {
                        content: String::new(),
                        mode: 0o755,
                    },
                );
            }
        }

        Ok(CommandResult::exited(status))
    }
}

/// Facts of a Raspberry Pi 4 running Debian 12
pub fn debian_facts() -> Facts {
    Facts::new()
        .with(keys::OS_FAMILY, "Debian")
        .with(keys::OS_NAME, "Debian")
        .with(keys::OS_RELEASE_FULL, "12.5")
        .with(keys::OS_RELEASE_MAJOR, "12")
        .with(keys::OS_CODENAME, "bookworm")
        .with(keys::OS_ARCHITECTURE, "arm64")
        .with(keys::HOSTNAME, "pi-worker-01")
        .with(keys::KERNEL_RELEASE, "6.6.20+rpt-rpi-v8")
}

/// Facts for every supported platform, labelled `name-major-arch`
pub fn supported_os_facts() -> Vec<(String, Facts)> {
    let platforms = [
        ("Debian", "11.9", "11", "bullseye", "armhf"),
        ("Debian", "12.5", "12", "bookworm", "arm64"),
        ("Ubuntu", "22.04", "22", "jammy", "amd64"),
    ];

    platforms
        .into_iter()
        .map(|(name, full, major, codename, arch)| {
            let facts = debian_facts()
                .with(keys::OS_NAME, name)
                .with(keys::OS_RELEASE_FULL, full)
                .with(keys::OS_RELEASE_MAJOR, major)
                .with(keys::OS_CODENAME, codename)
                .with(keys::OS_ARCHITECTURE, arch);
            (format!("{}-{major}-{arch}", name.to_lowercase()), facts)
        })
        .collect()
}
