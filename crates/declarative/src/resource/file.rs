//! File resource: regular files, directories, and symlinks

use super::{AttrReader, Resource};
use crate::context::{FileStatus, Providers};
use crate::diff::{Change, CheckOutcome, content_digest, short_digest, unified_diff};
use crate::error::CompileError;
use crate::types::{Attributes, ResourceId, ResourceKind};
use anyhow::{Result, bail};
use std::fmt;
use std::path::{Path, PathBuf};

const ATTRIBUTES: &[&str] = &["ensure", "content", "target", "mode", "path"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEnsure {
    File,
    Directory,
    Link,
    Absent,
}

impl fmt::Display for FileEnsure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::File => "file",
            Self::Directory => "directory",
            Self::Link => "link",
            Self::Absent => "absent",
        })
    }
}

/// A path whose type, content, link target, and mode are managed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSpec {
    pub path: PathBuf,
    pub ensure: FileEnsure,
    /// Full content for `ensure = file`; unmanaged when `None`
    pub content: Option<String>,
    /// Link target for `ensure = link`
    pub target: Option<PathBuf>,
    /// Permission bits, e.g. `0o644`
    pub mode: Option<u32>,
}

fn parse_mode(value: &str) -> Option<u32> {
    let mode = u32::from_str_radix(value, 8).ok()?;
    (mode <= 0o7777).then_some(mode)
}

fn format_mode(mode: u32) -> String {
    format!("{:04o}", mode & 0o7777)
}

impl FileSpec {
    pub fn from_attributes(id: &ResourceId, attrs: &Attributes) -> Result<Self, CompileError> {
        let reader = AttrReader::new(id, attrs, ATTRIBUTES)?;

        let path = PathBuf::from(reader.name_or_title("path")?);
        if !path.is_absolute() {
            return Err(reader.invalid("path", format!("`{}` is not absolute", path.display())));
        }

        let content = reader.string("content")?;
        let target = reader.string("target")?.map(PathBuf::from);
        let mode = match reader.string("mode")? {
            None => None,
            Some(value) => Some(parse_mode(&value).ok_or_else(|| {
                reader.invalid("mode", format!("`{value}` is not an octal mode"))
            })?),
        };

        let ensure = match reader.string("ensure")?.as_deref() {
            None if target.is_some() => FileEnsure::Link,
            None | Some("file" | "present") => FileEnsure::File,
            Some("directory") => FileEnsure::Directory,
            Some("link") => FileEnsure::Link,
            Some("absent") => FileEnsure::Absent,
            Some(other) => {
                return Err(reader.invalid(
                    "ensure",
                    format!("`{other}` is not file, present, directory, link, or absent"),
                ));
            }
        };

        match ensure {
            FileEnsure::Link if target.is_none() => {
                return Err(reader.invalid("target", "required when ensure is link"));
            }
            FileEnsure::File => {}
            _ if content.is_some() => {
                return Err(reader.invalid("content", format!("not allowed with ensure {ensure}")));
            }
            _ => {}
        }
        if target.is_some() && ensure != FileEnsure::Link {
            return Err(reader.invalid("target", format!("not allowed with ensure {ensure}")));
        }

        Ok(Self {
            path,
            ensure,
            content,
            target,
            mode,
        })
    }

    fn mode_change(&self, current: u32) -> Option<Change> {
        let wanted = self.mode?;
        (current & 0o7777 != wanted).then(|| {
            Change::new("mode", format_mode(current), format_mode(wanted))
        })
    }

    fn content_change(&self, host: &Providers<'_>, digest: &str) -> Result<Option<Change>> {
        let Some(content) = &self.content else {
            return Ok(None);
        };
        let wanted = content_digest(content);
        if wanted == digest {
            return Ok(None);
        }

        let diff = host
            .files
            .read_to_string(&self.path)?
            .and_then(|current| unified_diff(&self.path.to_string_lossy(), &current, content));
        Ok(Some(
            Change::new(
                "content",
                format!("{{blake3}}{}", short_digest(digest)),
                format!("{{blake3}}{}", short_digest(&wanted)),
            )
            .with_diff(diff),
        ))
    }

    fn ensure_change(&self, status: &FileStatus) -> Change {
        Change::new("ensure", status.describe(), self.ensure.to_string())
    }

    fn link_target(&self) -> Result<&Path> {
        match &self.target {
            Some(target) => Ok(target),
            None => bail!("link without target"),
        }
    }
}

impl Resource for FileSpec {
    fn kind(&self) -> ResourceKind {
        ResourceKind::File
    }

    fn description(&self) -> String {
        match (&self.ensure, &self.target) {
            (FileEnsure::Link, Some(target)) => {
                format!("File {} -> {}", self.path.display(), target.display())
            }
            _ => format!("File {} ({})", self.path.display(), self.ensure),
        }
    }

    fn check(&self, host: &Providers<'_>) -> Result<CheckOutcome> {
        let status = host.files.inspect(&self.path)?;
        let mut changes = Vec::new();

        match (self.ensure, &status) {
            (FileEnsure::Absent, FileStatus::Missing) => {}
            (FileEnsure::Absent, _) => changes.push(self.ensure_change(&status)),
            (FileEnsure::File, FileStatus::File { digest, mode }) => {
                changes.extend(self.content_change(host, digest)?);
                changes.extend(self.mode_change(*mode));
            }
            (FileEnsure::Directory, FileStatus::Directory { mode }) => {
                changes.extend(self.mode_change(*mode));
            }
            (FileEnsure::Link, FileStatus::Link { target }) => {
                let wanted = self.link_target()?;
                if target != wanted {
                    changes.push(Change::new(
                        "target",
                        target.display().to_string(),
                        wanted.display().to_string(),
                    ));
                }
            }
            _ => changes.push(self.ensure_change(&status)),
        }

        Ok(CheckOutcome::from_changes(changes))
    }

    fn apply(&self, host: &Providers<'_>, changes: &[Change]) -> Result<()> {
        let files = host.files;
        let status = files.inspect(&self.path)?;

        match self.ensure {
            FileEnsure::Absent => {
                if status.exists() {
                    files.remove_path(&self.path)?;
                }
            }
            FileEnsure::Directory => {
                match status {
                    FileStatus::Directory { .. } => {}
                    FileStatus::Missing => files.create_dir(&self.path)?,
                    _ => {
                        files.remove_path(&self.path)?;
                        files.create_dir(&self.path)?;
                    }
                }
                if let Some(mode) = self.mode {
                    files.set_mode(&self.path, mode)?;
                }
            }
            FileEnsure::Link => {
                let target = self.link_target()?;
                match status {
                    FileStatus::Link { target: ref current } if current == target => {}
                    FileStatus::Directory { .. } => {
                        bail!("refusing to replace directory {} with a link", self.path.display())
                    }
                    FileStatus::Missing => files.symlink(&self.path, target)?,
                    _ => {
                        files.remove_path(&self.path)?;
                        files.symlink(&self.path, target)?;
                    }
                }
            }
            FileEnsure::File => {
                let must_write = match status {
                    FileStatus::Directory { .. } => {
                        bail!("refusing to replace directory {} with a file", self.path.display())
                    }
                    FileStatus::Link { .. } => {
                        files.remove_path(&self.path)?;
                        true
                    }
                    FileStatus::Missing => true,
                    FileStatus::File { .. } => changes.iter().any(|c| c.property == "content"),
                };
                if must_write {
                    files.write_file(&self.path, self.content.as_deref().unwrap_or_default())?;
                }
                if let Some(mode) = self.mode {
                    files.set_mode(&self.path, mode)?;
                }
            }
        }
        Ok(())
    }
}
