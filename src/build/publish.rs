//! Content-addressed publishing.
//!
//! A [`Publisher`] streams bytes into a temporary file inside the output
//! directory while hashing them, then renames the file to
//! `<filename>.<digest>.<ext>`. The rename is the only operation that makes
//! an artifact visible, so readers never see a partial file at its final path.
//!
//! In placeholder mode the digest is replaced with [`DEV_VERSION`] and each
//! build overwrites the same path.

use crate::stream::{ByteStream, StreamError};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Version token used instead of a digest in dev mode.
pub const DEV_VERSION: &str = "dev";

/// How the version part of an artifact name is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VersionMode {
    /// Hex SHA-256 of the content
    #[default]
    Hashed,
    /// Fixed [`DEV_VERSION`] token
    Placeholder,
}

/// Error publishing an artifact.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PublishError {
    #[error("Failed to create output directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to publish {}: {source}", path.display())]
    Rename {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The content stream failed
    #[error(transparent)]
    Stream(#[from] StreamError),
}

/// A committed artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    /// Digest (or placeholder) in the artifact name
    pub version: String,
    pub path: PathBuf,
}

/// Publishes streams as `<dir>/<filename>.<version>.<extension>`.
#[derive(Debug, Clone)]
pub struct Publisher {
    dir: PathBuf,
    filename: String,
    extension: String,
    mode: VersionMode,
}

impl Publisher {
    pub fn new(dir: impl Into<PathBuf>, filename: impl Into<String>, extension: impl Into<String>) -> Self {
        Self { dir: dir.into(), filename: filename.into(), extension: extension.into(), mode: VersionMode::Hashed }
    }

    pub fn with_mode(mut self, mode: VersionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> VersionMode {
        self.mode
    }

    /// Final path for a given version.
    pub fn final_path(&self, version: &str) -> PathBuf {
        self.dir.join(format!("{}.{}.{}", self.filename, version, self.extension))
    }

    /// Write `stream` to a temporary file next to the final location.
    pub fn stage(&self, stream: ByteStream) -> Result<Staged, PublishError> {
        let file = staging_file(&self.dir, &self.filename)?;
        let temp_path = file.path().to_path_buf();
        let write_err = |source| PublishError::Write { path: temp_path.clone(), source };

        let mut file = file;
        let mut hasher = Sha256::new();
        for chunk in stream {
            let chunk = chunk?;
            hasher.update(&chunk);
            file.write_all(&chunk).map_err(write_err)?;
        }
        file.flush().map_err(write_err)?;

        let version = match self.mode {
            VersionMode::Hashed => format!("{:x}", hasher.finalize()),
            VersionMode::Placeholder => DEV_VERSION.to_string(),
        };
        let final_path = self.final_path(&version);
        Ok(Staged { file, version, final_path, mode: self.mode })
    }

    /// Stage and commit in one step.
    pub fn publish(&self, stream: ByteStream) -> Result<Published, PublishError> {
        self.stage(stream)?.commit()
    }
}

/// Content written and hashed but not yet visible at its final path.
#[derive(Debug)]
pub struct Staged {
    file: NamedTempFile,
    version: String,
    final_path: PathBuf,
    mode: VersionMode,
}

impl Staged {
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    pub fn temp_path(&self) -> &Path {
        self.file.path()
    }

    /// Append bytes that are not part of the digest.
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), PublishError> {
        self.file
            .write_all(bytes)
            .and_then(|_| self.file.flush())
            .map_err(|source| PublishError::Write { path: self.file.path().to_path_buf(), source })
    }

    /// Atomically move the staged file to its final path.
    ///
    /// A hashed artifact that already exists has identical content and is
    /// left untouched.
    pub fn commit(self) -> Result<Published, PublishError> {
        let Staged { file, version, final_path, mode } = self;

        if mode == VersionMode::Hashed && final_path.exists() {
            debug!(path = %final_path.display(), "artifact already published");
            return Ok(Published { version, path: final_path });
        }

        file.as_file()
            .sync_all()
            .map_err(|source| PublishError::Write { path: file.path().to_path_buf(), source })?;
        set_readable(&file).map_err(|source| PublishError::Write { path: file.path().to_path_buf(), source })?;
        file.persist(&final_path)
            .map_err(|e| PublishError::Rename { path: final_path.clone(), source: e.error })?;

        debug!(path = %final_path.display(), "published artifact");
        Ok(Published { version, path: final_path })
    }
}

/// Create a temporary file in `dir` for content destined for `dir`.
fn staging_file(dir: &Path, stem: &str) -> Result<NamedTempFile, PublishError> {
    fs::create_dir_all(dir).map_err(|source| PublishError::CreateDir { path: dir.to_path_buf(), source })?;
    tempfile::Builder::new()
        .prefix(&format!(".{}.", stem))
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|source| PublishError::Write { path: dir.to_path_buf(), source })
}

// Temporary files are created owner-only; published artifacts are served to others.
#[cfg(unix)]
fn set_readable(file: &NamedTempFile) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.as_file().set_permissions(fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn set_readable(_file: &NamedTempFile) -> io::Result<()> {
    Ok(())
}

/// Atomically replace `path` with the contents of `stream`.
///
/// Used for fixed-name outputs: single files, precompiled files, source maps.
pub fn write_atomic(path: &Path, stream: ByteStream) -> Result<u64, PublishError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let stem = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let mut file = staging_file(dir, &stem)?;

    let mut written = 0u64;
    for chunk in stream {
        let chunk = chunk?;
        file.write_all(&chunk)
            .map_err(|source| PublishError::Write { path: file.path().to_path_buf(), source })?;
        written += chunk.len() as u64;
    }
    file.flush()
        .map_err(|source| PublishError::Write { path: file.path().to_path_buf(), source })?;
    set_readable(&file).map_err(|source| PublishError::Write { path: file.path().to_path_buf(), source })?;
    file.persist(path)
        .map_err(|e| PublishError::Rename { path: path.to_path_buf(), source: e.error })?;
    debug!(path = %path.display(), bytes = written, "wrote file");
    Ok(written)
}
