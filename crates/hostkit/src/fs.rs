//! Local filesystem backend

use anyhow::{Context, Result};
use declarative::{FileProvider, FileStatus};
use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

/// File provider over the local filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFiles;

impl LocalFiles {
    pub fn new() -> Self {
        Self
    }
}

fn mode_bits(metadata: &fs::Metadata) -> u32 {
    metadata.permissions().mode() & 0o7777
}

impl FileProvider for LocalFiles {
    fn inspect(&self, path: &Path) -> Result<FileStatus> {
        let metadata = match fs::symlink_metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(FileStatus::Missing),
            Err(e) => return Err(e).with_context(|| format!("Failed to inspect {}", path.display())),
        };

        let file_type = metadata.file_type();
        if file_type.is_symlink() {
            let target = fs::read_link(path)
                .with_context(|| format!("Failed to read link {}", path.display()))?;
            return Ok(FileStatus::Link { target });
        }
        if file_type.is_dir() {
            return Ok(FileStatus::Directory {
                mode: mode_bits(&metadata),
            });
        }

        let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        // Same digest as `declarative::content_digest` for UTF-8 content
        let digest = blake3::hash(&bytes).to_hex().to_string();
        Ok(FileStatus::File {
            digest,
            mode: mode_bits(&metadata),
        })
    }

    fn read_to_string(&self, path: &Path) -> Result<Option<String>> {
        match fs::read(path) {
            Ok(bytes) => Ok(String::from_utf8(bytes).ok()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    fn write_file(&self, path: &Path, content: &str) -> Result<()> {
        // Write beside the target and rename so readers never see a partial file
        let file_name = path
            .file_name()
            .with_context(|| format!("Not a file path: {}", path.display()))?;
        let staging = path.with_file_name(format!(".{}.edgeform-tmp", file_name.to_string_lossy()));

        fs::write(&staging, content)
            .with_context(|| format!("Failed to write {}", staging.display()))?;
        if let Ok(existing) = fs::metadata(path)
            && existing.is_file()
        {
            fs::set_permissions(&staging, existing.permissions())
                .with_context(|| format!("Failed to copy permissions to {}", staging.display()))?;
        }
        fs::rename(&staging, path).with_context(|| format!("Failed to replace {}", path.display()))
    }

    fn create_dir(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).with_context(|| format!("Failed to create {}", path.display()))
    }

    fn symlink(&self, path: &Path, target: &Path) -> Result<()> {
        if fs::symlink_metadata(path).is_ok_and(|m| m.file_type().is_symlink()) {
            fs::remove_file(path)
                .with_context(|| format!("Failed to replace link {}", path.display()))?;
        }
        std::os::unix::fs::symlink(target, path)
            .with_context(|| format!("Failed to link {} -> {}", path.display(), target.display()))
    }

    fn remove_path(&self, path: &Path) -> Result<()> {
        let metadata = match fs::symlink_metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e).with_context(|| format!("Failed to inspect {}", path.display())),
        };
        if metadata.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        }
        .with_context(|| format!("Failed to remove {}", path.display()))
    }

    fn set_mode(&self, path: &Path, mode: u32) -> Result<()> {
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
            .with_context(|| format!("Failed to chmod {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use declarative::content_digest;
    use tempfile::TempDir;

    #[test]
    fn test_inspect_missing() {
        let dir = TempDir::new().unwrap();
        let status = LocalFiles.inspect(&dir.path().join("nope")).unwrap();
        assert_eq!(status, FileStatus::Missing);
    }

    #[test]
    fn test_write_then_inspect_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("k3s.conf");

        LocalFiles.write_file(&path, "token: abc\n").unwrap();
        LocalFiles.set_mode(&path, 0o600).unwrap();

        let status = LocalFiles.inspect(&path).unwrap();
        assert_eq!(
            status,
            FileStatus::File {
                digest: content_digest("token: abc\n"),
                mode: 0o600,
            }
        );
        assert_eq!(
            LocalFiles.read_to_string(&path).unwrap().as_deref(),
            Some("token: abc\n")
        );
    }

    #[test]
    fn test_rewrite_keeps_mode() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config");
        LocalFiles.write_file(&path, "a").unwrap();
        LocalFiles.set_mode(&path, 0o640).unwrap();

        LocalFiles.write_file(&path, "b").unwrap();
        assert!(matches!(
            LocalFiles.inspect(&path).unwrap(),
            FileStatus::File { mode: 0o640, .. }
        ));
    }

    #[test]
    fn test_directory_and_link() {
        let dir = TempDir::new().unwrap();
        let kube = dir.path().join(".kube");
        LocalFiles.create_dir(&kube).unwrap();
        assert!(matches!(
            LocalFiles.inspect(&kube).unwrap(),
            FileStatus::Directory { .. }
        ));

        let link = kube.join("config");
        LocalFiles
            .symlink(&link, Path::new("/etc/rancher/k3s/k3s.yaml"))
            .unwrap();
        assert_eq!(
            LocalFiles.inspect(&link).unwrap(),
            FileStatus::Link {
                target: "/etc/rancher/k3s/k3s.yaml".into()
            }
        );

        // Relinking replaces the existing link
        LocalFiles.symlink(&link, Path::new("/tmp/other.yaml")).unwrap();
        assert_eq!(
            LocalFiles.inspect(&link).unwrap(),
            FileStatus::Link {
                target: "/tmp/other.yaml".into()
            }
        );
    }

    #[test]
    fn test_remove_path() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a/b");
        LocalFiles.create_dir(&nested).unwrap();
        LocalFiles.write_file(&nested.join("f"), "x").unwrap();

        LocalFiles.remove_path(&dir.path().join("a")).unwrap();
        assert_eq!(
            LocalFiles.inspect(&dir.path().join("a")).unwrap(),
            FileStatus::Missing
        );
        // Removing something already gone is fine
        LocalFiles.remove_path(&dir.path().join("a")).unwrap();
    }

    #[test]
    fn test_read_missing_is_none() {
        let dir = TempDir::new().unwrap();
        assert_eq!(LocalFiles.read_to_string(&dir.path().join("x")).unwrap(), None);
    }
}
