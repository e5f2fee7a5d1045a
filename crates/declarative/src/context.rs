//! Host capabilities and callback traits
//!
//! Everything the engine learns about, or changes on, the host goes through
//! these traits. Production code plugs in real backends; tests plug in
//! `testing::FakeHost`.

use crate::report::{Outcome, RunReport};
use crate::types::{CommandResult, ResourceId};
use anyhow::Result;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Why a command is being run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandPurpose {
    /// Guard evaluation (`onlyif`); must not change host state
    Guard,
    /// The body of an exec resource
    Action,
}

/// A command to run through a [`CommandRunner`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Shell command line
    pub command: String,
    pub cwd: Option<PathBuf>,
    pub environment: Vec<(String, String)>,
    /// Directories searched for executables, prepended to `PATH`
    pub path: Vec<String>,
    pub timeout: Option<Duration>,
    pub purpose: CommandPurpose,
}

impl CommandSpec {
    pub fn new(command: impl Into<String>, purpose: CommandPurpose) -> Self {
        Self {
            command: command.into(),
            cwd: None,
            environment: Vec::new(),
            path: Vec::new(),
            timeout: None,
            purpose,
        }
    }
}

/// Runs external commands
///
/// The returned exit status is the only thing the engine interprets.
pub trait CommandRunner: Send + Sync {
    fn run(&self, spec: &CommandSpec) -> Result<CommandResult>;
}

/// Installed state of a package
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PackageStatus {
    /// Installed version, `None` when not installed
    pub installed: Option<String>,
    /// Removed, but its configuration files are still on disk
    pub config_files_remain: bool,
}

/// Queries and changes installed packages
pub trait PackageProvider: Send + Sync {
    fn query(&self, name: &str) -> Result<PackageStatus>;

    /// Version the package manager would install, if known
    fn candidate_version(&self, name: &str) -> Result<Option<String>>;

    /// Install the package, optionally pinned to a version
    fn install(&self, name: &str, version: Option<&str>) -> Result<()>;

    fn remove(&self, name: &str, purge: bool) -> Result<()>;
}

/// Run and boot state of a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServiceStatus {
    pub running: bool,
    pub enabled: bool,
}

/// Queries and changes services
pub trait ServiceProvider: Send + Sync {
    fn status(&self, name: &str) -> Result<ServiceStatus>;
    fn start(&self, name: &str) -> Result<()>;
    fn stop(&self, name: &str) -> Result<()>;
    fn restart(&self, name: &str) -> Result<()>;
    fn set_enabled(&self, name: &str, enabled: bool) -> Result<()>;
}

/// What currently sits at a path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileStatus {
    Missing,
    File {
        /// BLAKE3 hex digest of the content, see [`crate::content_digest`]
        digest: String,
        mode: u32,
    },
    Directory {
        mode: u32,
    },
    Link {
        target: PathBuf,
    },
}

impl FileStatus {
    pub fn exists(&self) -> bool {
        !matches!(self, Self::Missing)
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Self::Missing => "absent",
            Self::File { .. } => "file",
            Self::Directory { .. } => "directory",
            Self::Link { .. } => "link",
        }
    }
}

/// Queries and changes the filesystem
pub trait FileProvider: Send + Sync {
    /// Inspect a path without following a final symlink
    fn inspect(&self, path: &Path) -> Result<FileStatus>;

    /// Read a regular file as text, `None` if missing or not UTF-8
    fn read_to_string(&self, path: &Path) -> Result<Option<String>>;

    fn write_file(&self, path: &Path, content: &str) -> Result<()>;
    fn create_dir(&self, path: &Path) -> Result<()>;
    fn symlink(&self, path: &Path, target: &Path) -> Result<()>;

    /// Remove a file or symlink; directories are removed recursively
    fn remove_path(&self, path: &Path) -> Result<()>;

    fn set_mode(&self, path: &Path, mode: u32) -> Result<()>;
}

/// The full set of host capabilities used during a run
#[derive(Clone, Copy)]
pub struct Providers<'a> {
    pub packages: &'a dyn PackageProvider,
    pub services: &'a dyn ServiceProvider,
    pub files: &'a dyn FileProvider,
    pub commands: &'a dyn CommandRunner,
}

impl<'a> Providers<'a> {
    pub fn new(
        packages: &'a dyn PackageProvider,
        services: &'a dyn ServiceProvider,
        files: &'a dyn FileProvider,
        commands: &'a dyn CommandRunner,
    ) -> Self {
        Self {
            packages,
            services,
            files,
            commands,
        }
    }

    /// Borrow every capability from one host object
    pub fn from_host<H>(host: &'a H) -> Self
    where
        H: PackageProvider + ServiceProvider + FileProvider + CommandRunner,
    {
        Self::new(host, host, host, host)
    }
}

/// Progress callback for convergence runs
///
/// Implement this trait to receive progress updates during a run.
/// Callbacks are invoked from the coordinating thread only.
pub trait ProgressCallback {
    /// Called once before the first resource is checked
    fn on_run_start(&mut self, total: usize, noop: bool);

    /// Called when a group of independent resources starts
    fn on_wave_start(&mut self, size: usize);

    /// Called when a resource reaches its final outcome
    fn on_resource_complete(&mut self, id: &ResourceId, outcome: &Outcome);

    /// Called once with the finished report
    fn on_run_complete(&mut self, report: &RunReport);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_run_start(&mut self, _total: usize, _noop: bool) {}
    fn on_wave_start(&mut self, _size: usize) {}
    fn on_resource_complete(&mut self, _id: &ResourceId, _outcome: &Outcome) {}
    fn on_run_complete(&mut self, _report: &RunReport) {}
}

/// Progress callback that logs through the `log` facade
pub struct LogProgress;

impl ProgressCallback for LogProgress {
    fn on_run_start(&mut self, total: usize, noop: bool) {
        log::info!(
            "Converging {} resources{}",
            total,
            if noop { " (noop)" } else { "" }
        );
    }

    fn on_wave_start(&mut self, size: usize) {
        log::debug!("Starting wave of {size} resources");
    }

    fn on_resource_complete(&mut self, id: &ResourceId, outcome: &Outcome) {
        match outcome {
            Outcome::Failed { error } => log::warn!("{id}: {error}"),
            Outcome::Blocked { error } => log::warn!("{error}"),
            other => log::info!("{id}: {}", other.label()),
        }
    }

    fn on_run_complete(&mut self, report: &RunReport) {
        log::info!("Run finished: {}", report.counts);
    }
}
