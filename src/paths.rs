//! Path resolution for edgeform
//!
//! # Environment Variables
//!
//! - `EDGEFORM_CONFIG` - Config file to use instead of the search below
//! - `EDGEFORM_STATE_DIR` - Override state directory
//!
//! # Config File Search
//!
//! 1. `EDGEFORM_CONFIG` environment variable (must exist)
//! 2. `/etc/edgeform/config.toml`
//! 3. `XDG_CONFIG_HOME/edgeform/config.toml`, else `~/.config/edgeform/config.toml`
//!
//! The first existing file wins. No file at all means built-in defaults.
//!
//! # State Directory
//!
//! 1. `EDGEFORM_STATE_DIR` environment variable
//! 2. `XDG_STATE_HOME/edgeform` (if set)
//! 3. `~/.local/state/edgeform`

use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};

/// Environment variable for the config file override
pub const ENV_CONFIG: &str = "EDGEFORM_CONFIG";

/// Environment variable for state directory override
pub const ENV_STATE_DIR: &str = "EDGEFORM_STATE_DIR";

const SYSTEM_CONFIG: &str = "/etc/edgeform/config.toml";

/// Find the config file to load, if any
///
/// An explicit path (from `--config` or `EDGEFORM_CONFIG`) must exist.
pub fn config_file(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        let path = expand(&path.to_string_lossy());
        if !path.is_file() {
            bail!("Config file not found: {}", path.display());
        }
        log::debug!("Using config file {}", path.display());
        return Ok(Some(path));
    }

    let found = config_candidates()
        .into_iter()
        .find(|candidate| candidate.is_file());
    match &found {
        Some(path) => log::debug!("Using config file {}", path.display()),
        None => log::debug!("No config file found, using defaults"),
    }
    Ok(found)
}

/// Config locations searched in order
pub fn config_candidates() -> Vec<PathBuf> {
    let mut candidates = vec![PathBuf::from(SYSTEM_CONFIG)];
    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        candidates.push(PathBuf::from(xdg_config).join("edgeform").join("config.toml"));
    } else if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".config").join("edgeform").join("config.toml"));
    }
    candidates
}

/// Get the edgeform state directory path
pub fn state_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
        let path = expand(&dir);
        log::debug!("Using state dir from {}: {}", ENV_STATE_DIR, path.display());
        return Ok(path);
    }

    if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
        let path = PathBuf::from(xdg_state).join("edgeform");
        log::debug!("Using XDG_STATE_HOME: {}", path.display());
        return Ok(path);
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".local").join("state").join("edgeform");
    log::debug!("Using default state dir: {}", path.display());
    Ok(path)
}

/// Expand ~ and environment variables in a path string.
///
/// Unknown variables are left as written.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    /// Run `f` with an environment variable temporarily set
    fn with_env_var<F, R>(key: &str, value: &str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let original = env::var(key).ok();
        // SAFETY: each test touches its own variable
        unsafe { env::set_var(key, value) };
        let result = f();
        match original {
            // SAFETY: as above
            Some(v) => unsafe { env::set_var(key, v) },
            None => unsafe { env::remove_var(key) },
        }
        result
    }

    #[test]
    fn test_state_dir_env_override() {
        with_env_var(ENV_STATE_DIR, "/custom/state/path", || {
            assert_eq!(state_dir().unwrap(), PathBuf::from("/custom/state/path"));
        });
    }

    #[test]
    fn test_explicit_config_must_exist() {
        let err = config_file(Some(Path::new("/nonexistent/edgeform.toml"))).unwrap_err();
        assert!(err.to_string().contains("Config file not found"));
    }

    #[test]
    fn test_explicit_config_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "role = \"roles::k3s_server\"\n").unwrap();
        assert_eq!(config_file(Some(&path)).unwrap(), Some(path));
    }

    #[test]
    fn test_system_config_searched_first() {
        assert_eq!(config_candidates()[0], PathBuf::from("/etc/edgeform/config.toml"));
    }

    #[test]
    fn test_expand_with_tilde() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(expand("~/test/path"), home.join("test").join("path"));
    }

    #[test]
    fn test_expand_with_env_var() {
        with_env_var("EDGEFORM_TEST_VAR", "test_value", || {
            assert_eq!(
                expand("/path/$EDGEFORM_TEST_VAR/file"),
                PathBuf::from("/path/test_value/file")
            );
        });
    }

    #[test]
    fn test_expand_unknown_env_var_unchanged() {
        assert_eq!(
            expand("/path/$NONEXISTENT_VAR_12345/file"),
            PathBuf::from("/path/$NONEXISTENT_VAR_12345/file")
        );
    }
}
