//! # Hostkit
//!
//! Real host backends for the `declarative` engine on Debian-family systems.
//!
//! - [`AptPackages`]: packages via `dpkg-query`, `apt-cache` and `apt-get`
//! - [`Systemd`]: services via `systemctl`
//! - [`LocalFiles`]: files, directories and symlinks on the local filesystem
//! - [`ShellRunner`]: exec bodies and guards via `/bin/sh -c`
//! - [`OsReleaseFacts`]: facts from `/etc/os-release` and `/proc`
//!
//! Transient apt failures (mirror unreachable, dpkg lock held by
//! unattended-upgrades) are retried with exponential backoff; see
//! [`retry::with_retry`].
//!
//! ## Example
//!
//! ```ignore
//! use hostkit::DebianHost;
//!
//! let host = DebianHost::new();
//! let report = declarative::apply(&catalog, &plan, &host.providers(), &opts, &mut progress);
//! ```

pub mod apt;
pub mod command;
pub mod error;
pub mod facts;
pub mod fs;
pub mod retry;
pub mod systemd;

pub use apt::AptPackages;
pub use command::ShellRunner;
pub use error::{Error, ErrorCategory, Result};
pub use facts::OsReleaseFacts;
pub use fs::LocalFiles;
pub use retry::{RetryConfig, with_retry};
pub use systemd::Systemd;

use declarative::Providers;

/// Every backend needed to converge a Debian host
#[derive(Debug, Clone, Default)]
pub struct DebianHost {
    pub packages: AptPackages,
    pub services: Systemd,
    pub files: LocalFiles,
    pub commands: ShellRunner,
}

impl DebianHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.packages = AptPackages::with_retry(retry);
        self
    }

    /// Borrow the backends as engine providers
    pub fn providers(&self) -> Providers<'_> {
        Providers::new(&self.packages, &self.services, &self.files, &self.commands)
    }
}
