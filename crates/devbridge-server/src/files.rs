//! Path-scoped file access under the project root.

use std::path::{Component, Path, PathBuf};

use smol_str::SmolStr;
use thiserror::Error;

const MAX_FILE_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FileError {
    #[error("{0}")]
    InvalidInput(SmolStr),
    #[error("{0}")]
    Forbidden(SmolStr),
    #[error("{0}")]
    NotFound(SmolStr),
    #[error("{0}")]
    Internal(SmolStr),
}

impl FileError {
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::InvalidInput(_) => 400,
            Self::Forbidden(_) => 403,
            Self::NotFound(_) => 404,
            Self::Internal(_) => 500,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProjectFiles {
    root: PathBuf,
}

impl ProjectFiles {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Relative paths of every non-hidden file, sorted.
    pub fn list(&self) -> Result<Vec<String>, FileError> {
        let mut out = Vec::new();
        collect_files(&self.root, Path::new(""), &mut out)?;
        out.sort();
        Ok(out)
    }

    pub fn read(&self, path: &str) -> Result<String, FileError> {
        let resolved = self.resolve(path)?;
        if !resolved.is_file() {
            return Err(FileError::NotFound(format!("no such file '{path}'").into()));
        }
        let bytes = std::fs::read(&resolved)
            .map_err(|err| FileError::Internal(format!("read failed: {err}").into()))?;
        String::from_utf8(bytes)
            .map_err(|_| FileError::InvalidInput(format!("'{path}' is not UTF-8 text").into()))
    }

    pub fn write(&self, path: &str, content: &str) -> Result<(), FileError> {
        if content.len() > MAX_FILE_BYTES {
            return Err(FileError::InvalidInput("file too large".into()));
        }
        let resolved = self.resolve(path)?;
        std::fs::write(&resolved, content)
            .map_err(|err| FileError::Internal(format!("write failed: {err}").into()))
    }

    /// Maps a request path onto the project root, rejecting escapes.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, FileError> {
        let normalized = normalize_relative(path)?;
        let joined = self.root.join(&normalized);
        let canonical_root = self
            .root
            .canonicalize()
            .map_err(|_| FileError::NotFound("project root not found".into()))?;
        let canonical_parent = joined
            .parent()
            .ok_or_else(|| FileError::InvalidInput("invalid path".into()))?
            .canonicalize()
            .map_err(|_| FileError::NotFound("folder not found".into()))?;
        if !canonical_parent.starts_with(&canonical_root) {
            return Err(FileError::Forbidden("path escapes project root".into()));
        }
        // The leaf itself may be a symlink; dangling ones are refused too.
        if joined.symlink_metadata().is_ok() {
            let inside = joined
                .canonicalize()
                .is_ok_and(|target| target.starts_with(&canonical_root));
            if !inside {
                return Err(FileError::Forbidden("path escapes project root".into()));
            }
        }
        Ok(joined)
    }
}

fn normalize_relative(path: &str) -> Result<PathBuf, FileError> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(FileError::InvalidInput("path is required".into()));
    }
    let raw = Path::new(trimmed);
    let mut normalized = PathBuf::new();
    for component in raw.components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(FileError::Forbidden("path escapes project root".into()));
            }
        }
    }
    if normalized.as_os_str().is_empty() {
        return Err(FileError::InvalidInput("path is required".into()));
    }
    Ok(normalized)
}

fn collect_files(root: &Path, relative: &Path, out: &mut Vec<String>) -> Result<(), FileError> {
    let dir = root.join(relative);
    let entries = std::fs::read_dir(&dir)
        .map_err(|err| FileError::Internal(format!("read_dir failed: {err}").into()))?;
    for entry in entries.flatten() {
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();
        if file_name.starts_with('.') {
            continue;
        }
        let next_relative = relative.join(file_name.as_ref());
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            collect_files(root, &next_relative, out)?;
        } else if file_type.is_file() {
            out.push(next_relative.to_string_lossy().replace('\\', "/"));
        }
    }
    Ok(())
}
