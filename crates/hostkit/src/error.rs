//! Error types for host backend operations.
//!
//! Errors are categorized so transient failures (network hiccups, a dpkg
//! lock held by unattended-upgrades) can be retried while everything else
//! is surfaced immediately.

use thiserror::Error;

/// Categories of backend errors for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Mirror unreachable, DNS failure, download interrupted
    Network,
    /// The dpkg/apt lock is held by another process
    Locked,
    /// Package or unit does not exist
    NotFound,
    /// Not running as root
    Permission,
    Other,
}

impl ErrorCategory {
    /// Whether this error category is typically transient and worth retrying.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Network | Self::Locked)
    }

    /// Get actionable advice for resolving this error category.
    pub fn advice(self) -> &'static str {
        match self {
            Self::Network => "Check connectivity to the package mirror and try again",
            Self::Locked => "Wait for the other package manager process to finish",
            Self::NotFound => "Verify the name, or run apt-get update first",
            Self::Permission => "Run as root",
            Self::Other => "Check the error details for more information",
        }
    }
}

/// Errors raised by the host backends.
#[derive(Debug, Error)]
pub enum Error {
    #[error("network error: {message}")]
    Network { message: String },

    #[error("package manager is locked: {message}")]
    Locked { message: String },

    #[error("not found: {name}")]
    NotFound { name: String },

    #[error("permission denied: {message}")]
    Permission { message: String },

    /// A backend command exited nonzero
    #[error("{program} failed{}: {stderr}", .status.map(|code| format!(" with exit code {code}")).unwrap_or_default())]
    CommandFailed {
        program: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Get the error category for retry logic.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Network { .. } => ErrorCategory::Network,
            Self::Locked { .. } => ErrorCategory::Locked,
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::Permission { .. } => ErrorCategory::Permission,
            _ => ErrorCategory::Other,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Create an error from apt-get or dpkg output.
    ///
    /// Analyzes stderr to categorize the error appropriately.
    pub fn from_apt_output(stderr: &str, status: Option<i32>, package: Option<&str>) -> Self {
        let lower = stderr.to_lowercase();
        let message = stderr.trim().to_string();

        if lower.contains("could not get lock")
            || lower.contains("unable to acquire the dpkg frontend lock")
            || lower.contains("unable to lock")
        {
            return Self::Locked { message };
        }

        if lower.contains("temporary failure resolving")
            || lower.contains("could not resolve")
            || lower.contains("failed to fetch")
            || lower.contains("connection timed out")
            || lower.contains("connection refused")
            || lower.contains("network is unreachable")
        {
            return Self::Network { message };
        }

        if lower.contains("unable to locate package")
            || lower.contains("has no installation candidate")
            || (lower.contains("version '") && lower.contains("was not found"))
        {
            return Self::NotFound {
                name: package.unwrap_or("unknown").to_string(),
            };
        }

        if lower.contains("are you root") || lower.contains("permission denied") {
            return Self::Permission { message };
        }

        Self::CommandFailed {
            program: "apt-get".to_string(),
            status,
            stderr: message,
        }
    }
}

/// Result type for backend operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category_retryable() {
        assert!(ErrorCategory::Network.is_retryable());
        assert!(ErrorCategory::Locked.is_retryable());
        assert!(!ErrorCategory::NotFound.is_retryable());
        assert!(!ErrorCategory::Permission.is_retryable());
    }

    #[test]
    fn test_from_apt_output_lock() {
        let err = Error::from_apt_output(
            "E: Could not get lock /var/lib/dpkg/lock-frontend. It is held by process 812 (unattended-upgr)",
            Some(100),
            Some("curl"),
        );
        assert_eq!(err.category(), ErrorCategory::Locked);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_from_apt_output_network() {
        let err = Error::from_apt_output(
            "E: Failed to fetch http://deb.debian.org/debian/pool/main/c/curl/curl.deb  Temporary failure resolving 'deb.debian.org'",
            Some(100),
            Some("curl"),
        );
        assert_eq!(err.category(), ErrorCategory::Network);
    }

    #[test]
    fn test_from_apt_output_not_found() {
        let err = Error::from_apt_output("E: Unable to locate package nosuchpkg", Some(100), Some("nosuchpkg"));
        assert_eq!(err.category(), ErrorCategory::NotFound);
        assert_eq!(err.to_string(), "not found: nosuchpkg");
    }

    #[test]
    fn test_from_apt_output_permission() {
        let err = Error::from_apt_output(
            "E: Could not open lock file /var/lib/dpkg/lock-frontend - open (13: Permission denied)\nE: are you root?",
            Some(100),
            None,
        );
        assert_eq!(err.category(), ErrorCategory::Permission);
    }

    #[test]
    fn test_from_apt_output_fallback() {
        let err = Error::from_apt_output("dpkg: error processing package foo", Some(1), Some("foo"));
        assert_eq!(err.category(), ErrorCategory::Other);
        assert_eq!(
            err.to_string(),
            "apt-get failed with exit code 1: dpkg: error processing package foo"
        );
    }
}
