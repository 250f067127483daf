//! Version registry.
//!
//! Maps bundle names to the digest of their last successful build. Debug
//! artifacts are recorded under `debug:<name>`. The registry is persisted as a
//! flat JSON object:
//!
//! ```json
//! {
//!   "app_js": "3f1c...e9",
//!   "debug:app_js": "a04b...17",
//!   "site_css": "dev"
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};

/// Key prefix for debug artifacts.
pub const DEBUG_PREFIX: &str = "debug:";

/// Error loading or saving the registry.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum RegistryError {
    /// IO error
    #[error("Failed to access version file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// JSON parsing error
    #[error("Invalid version file {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Registry key for a bundle's debug artifact.
pub fn debug_key(name: &str) -> String {
    format!("{}{}", DEBUG_PREFIX, name)
}

/// Bundle name -> digest of the current artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionRegistry {
    versions: BTreeMap<String, String>,
}

impl VersionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a registry; a missing file is an empty registry.
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let file = File::open(path).map_err(|source| RegistryError::Io { path: path.to_path_buf(), source })?;
        serde_json::from_reader(BufReader::new(file))
            .map_err(|source| RegistryError::Json { path: path.to_path_buf(), source })
    }

    /// Write the registry, replacing the previous file atomically.
    pub fn save(&self, path: &Path) -> Result<(), RegistryError> {
        let io_err = |source| RegistryError::Io { path: path.to_path_buf(), source };
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(io_err)?;

        let json = serde_json::to_vec_pretty(self)
            .map_err(|source| RegistryError::Json { path: path.to_path_buf(), source })?;
        let mut temp = tempfile::Builder::new().prefix(".versions.").tempfile_in(dir).map_err(io_err)?;
        temp.write_all(&json).map_err(io_err)?;
        temp.write_all(b"\n").map_err(io_err)?;
        temp.persist(path).map_err(|e| io_err(e.error))?;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.versions.get(name).map(String::as_str)
    }

    pub fn set(&mut self, name: impl Into<String>, digest: impl Into<String>) {
        self.versions.insert(name.into(), digest.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.versions.remove(name)
    }

    /// Version of a bundle's debug artifact.
    pub fn get_debug(&self, name: &str) -> Option<&str> {
        self.get(&debug_key(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.versions.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn clear(&mut self) {
        self.versions.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.versions.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
