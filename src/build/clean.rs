//! Removal of published outputs.
//!
//! Artifacts are located through the version file: only the artifact each
//! bundle's recorded version points at is removed, together with its source
//! map and debug artifact. Every removal is attempted; failures are collected
//! rather than aborting the rest.

use super::context::BuildSession;
use super::registry::debug_key;
use std::fmt;
use std::fs;
use std::io;
use std::path::PathBuf;
use tracing::debug;

/// What a removed path was.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Bundle,
    DebugBundle,
    SourceMap,
    VersionFile,
    SingleFile,
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputKind::Bundle => write!(f, "bundle"),
            OutputKind::DebugBundle => write!(f, "debug bundle"),
            OutputKind::SourceMap => write!(f, "source map"),
            OutputKind::VersionFile => write!(f, "version file"),
            OutputKind::SingleFile => write!(f, "single file"),
        }
    }
}

/// One attempted removal.
#[derive(Debug)]
pub struct Removal {
    pub kind: OutputKind,
    pub path: PathBuf,
    /// `None` when the path was removed
    pub error: Option<io::Error>,
}

/// Outcome of [`remove_outputs`].
#[derive(Debug, Default)]
pub struct CleanReport {
    pub removals: Vec<Removal>,
    /// Bundles without a recorded version
    pub skipped: Vec<String>,
}

impl CleanReport {
    fn attempt(&mut self, kind: OutputKind, path: PathBuf) {
        let error = fs::remove_file(&path).err();
        debug!(path = %path.display(), %kind, removed = error.is_none(), "remove output");
        self.removals.push(Removal { kind, path, error });
    }

    pub fn failures(&self) -> impl Iterator<Item = &Removal> {
        self.removals.iter().filter(|r| r.error.is_some())
    }

    pub fn failed_count(&self) -> usize {
        self.failures().count()
    }

    pub fn removed_count(&self) -> usize {
        self.removals.len() - self.failed_count()
    }

    pub fn is_success(&self) -> bool {
        self.failed_count() == 0
    }
}

/// Remove every output the session's version file knows about, the version
/// file itself and all single-file outputs.
///
/// A missing version file is not a failure; any other path that cannot be
/// removed is.
pub fn remove_outputs(session: &BuildSession) -> CleanReport {
    let mut report = CleanReport::default();

    for bundle in session.bundles().iter() {
        let Some(version) = session.version(&bundle.name) else {
            report.skipped.push(bundle.name.clone());
            continue;
        };
        report.attempt(OutputKind::Bundle, bundle.output_path(&version));
        if bundle.source_map.is_some() {
            report.attempt(OutputKind::SourceMap, bundle.source_map_path(&version));
        }
        if bundle.create_debug {
            if let Some(debug_version) = session.version(&debug_key(&bundle.name)) {
                report.attempt(OutputKind::DebugBundle, bundle.debug_output_path(&debug_version));
            }
        }
    }

    let version_file = session.version_file();
    if version_file.exists() {
        report.attempt(OutputKind::VersionFile, version_file);
    }

    for (_, output) in session.single_files() {
        report.attempt(OutputKind::SingleFile, output);
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::pipeline::BuildPipeline;
    use crate::config::parse_config;
    use tempfile::TempDir;

    const CONFIG: &str = r#"
[project]
name = "site"

[[bundles]]
name = "site_css"
type = "css"
files = ["a.css"]
create_debug = true

[[bundles]]
name = "never_built"
type = "css"
files = ["a.css"]

[[single_files]]
input = "a.css"
output = "dist/a.css"
"#;

    #[test]
    fn test_remove_outputs_after_build() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.css"), "A").unwrap();
        let session = BuildSession::new(parse_config(CONFIG).unwrap(), temp.path().to_path_buf()).unwrap();

        let result = BuildPipeline::new(&session).build();
        assert!(result.is_success(), "{}", result.summary());
        // Forget the second bundle so it has nothing to clean.
        let mut versions = session.versions();
        versions.remove("never_built");
        versions.save(&session.version_file()).unwrap();
        let artifact = session.bundles().get("site_css").unwrap().output_path(versions.get("site_css").unwrap());

        let session = BuildSession::new(parse_config(CONFIG).unwrap(), temp.path().to_path_buf()).unwrap();
        let report = remove_outputs(&session);

        assert!(report.is_success());
        assert_eq!(report.removed_count(), 4);
        assert_eq!(report.skipped, vec!["never_built"]);
        assert!(!artifact.exists());
        assert!(!session.version_file().exists());
        assert!(!temp.path().join("dist/a.css").exists());
        assert!(temp.path().join("a.css").exists());
    }

    #[test]
    fn test_missing_artifact_is_reported() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.css"), "A").unwrap();
        fs::write(temp.path().join("bundles_versions.json"), r#"{"site_css": "gone"}"#).unwrap();
        let session = BuildSession::new(parse_config(CONFIG).unwrap(), temp.path().to_path_buf()).unwrap();

        let report = remove_outputs(&session);
        let failed: Vec<OutputKind> = report.failures().map(|r| r.kind).collect();
        assert_eq!(failed, vec![OutputKind::Bundle, OutputKind::SingleFile]);
        assert!(!session.version_file().exists(), "version file is still removed");
    }
}
