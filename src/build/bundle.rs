//! Bundle (group) model.
//!
//! A [`Bundle`] is a named, ordered list of [`BundleFile`]s plus a post
//! chain. Bundles are resolved from configuration once per session and are
//! read-only afterwards.

use super::discovery::{DiscoveryError, ResolveError};
use crate::config::{FileConfig, LintConfig, SourceMapConfig};
use crate::pipeline::run_pipeline;
use crate::processor::{Processor, ProcessorLibrary};
use crate::stream::{ByteStream, StreamError};
use glob::{MatchOptions, Pattern};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// One input file of a bundle.
#[derive(Debug, Clone)]
pub struct BundleFile {
    /// Absolute (root-joined) path
    pub file_path: PathBuf,
    /// Path relative to the bundle's files root, `/`-separated
    pub name: String,
    pub file_url: String,
    pub file_type: String,
    /// Whether the file takes part in linting
    pub lint: bool,
    /// Pre chain
    pub processors: Vec<Processor>,
}

impl BundleFile {
    /// Stream the raw file contents.
    pub fn open(&self) -> Result<ByteStream, StreamError> {
        ByteStream::open(&self.file_path)
    }

    /// Stream the file through its pre chain.
    pub fn processed(&self) -> Result<ByteStream, StreamError> {
        run_pipeline(&self.processors, self.open()?)
    }

    pub fn has_preprocessors(&self) -> bool {
        !self.processors.is_empty()
    }

    /// Where watch mode writes this file's pre-chain output: `<file path>.<bundle type>`.
    pub fn precompile_path(&self, bundle_type: &str) -> PathBuf {
        let mut path: OsString = self.file_path.clone().into_os_string();
        path.push(".");
        path.push(bundle_type);
        PathBuf::from(path)
    }
}

/// A glob entry of a bundle, kept so newly created files can join the bundle.
#[derive(Debug, Clone)]
pub struct FilePattern {
    /// Pattern relative to the files root
    pub pattern: Pattern,
    pub overrides: FileConfig,
}

impl FilePattern {
    /// Whether a `/`-separated path relative to the files root matches.
    pub fn matches(&self, relative: &str) -> bool {
        let options = MatchOptions { require_literal_separator: true, ..MatchOptions::default() };
        self.pattern.matches_with(relative, options)
    }
}

/// A named group of files published as one artifact.
#[derive(Debug, Clone)]
pub struct Bundle {
    pub name: String,
    /// Output extension and key for default processors
    pub bundle_type: String,
    pub media: Option<String>,
    pub files_root: PathBuf,
    pub files_url_root: String,
    pub bundle_url_root: String,
    pub bundle_file_root: PathBuf,
    pub bundle_filename: String,
    /// Files in concatenation order
    pub files: Vec<BundleFile>,
    /// Post chain
    pub processors: Vec<Processor>,
    pub create_debug: bool,
    pub precompile_in_debug: bool,
    pub source_map: Option<SourceMapConfig>,
    pub patterns: Vec<FilePattern>,
}

impl Bundle {
    /// Create an empty bundle with the given roots.
    pub fn new(
        name: impl Into<String>,
        bundle_type: impl Into<String>,
        files_root: impl Into<PathBuf>,
        bundle_file_root: impl Into<PathBuf>,
    ) -> Self {
        let name = name.into();
        Self {
            bundle_filename: name.clone(),
            name,
            bundle_type: bundle_type.into(),
            media: None,
            files_root: files_root.into(),
            files_url_root: "/".to_string(),
            bundle_url_root: "/".to_string(),
            bundle_file_root: bundle_file_root.into(),
            files: Vec::new(),
            processors: Vec::new(),
            create_debug: false,
            precompile_in_debug: false,
            source_map: None,
            patterns: Vec::new(),
        }
    }

    /// Build a file of this bundle from a path relative to its files root.
    pub fn new_file(
        &self,
        relative: &str,
        overrides: &FileConfig,
        library: &ProcessorLibrary,
        linting: &BTreeMap<String, LintConfig>,
    ) -> Result<BundleFile, ResolveError> {
        let file_path = self.files_root.join(relative);
        let file_type = overrides
            .file_type
            .clone()
            .or_else(|| file_path.extension().map(|e| e.to_string_lossy().into_owned()))
            .unwrap_or_else(|| self.bundle_type.clone());

        let processors = match &overrides.processors {
            Some(refs) => library.resolve_all(refs),
            None => library.default_preprocessors(&file_type),
        }
        .map_err(|source| ResolveError::Processor { bundle: self.name.clone(), source })?;

        let lint = linting
            .get(&self.bundle_type)
            .map(|config| overrides.lint.unwrap_or(config.default))
            .unwrap_or(false);

        Ok(BundleFile {
            file_url: join_url(&self.files_url_root, relative),
            name: relative.to_string(),
            file_path,
            file_type,
            lint,
            processors,
        })
    }

    /// Record a glob entry for later growth.
    pub fn add_pattern(&mut self, pattern: &str, overrides: FileConfig) -> Result<(), ResolveError> {
        let pattern = Pattern::new(pattern).map_err(|e| ResolveError::Discovery {
            bundle: self.name.clone(),
            source: DiscoveryError::InvalidPattern(pattern.to_string(), e.to_string()),
        })?;
        self.patterns.push(FilePattern { pattern, overrides });
        Ok(())
    }

    /// Look up a file by its path.
    pub fn get_file(&self, path: &Path) -> Option<&BundleFile> {
        self.files.iter().find(|f| f.file_path == path)
    }

    /// First glob entry matching a path relative to the files root.
    pub fn matching_pattern(&self, relative: &str) -> Option<&FilePattern> {
        self.patterns.iter().find(|p| p.matches(relative))
    }

    /// `<filename>.<version>.<type>`
    pub fn artifact_name(&self, version: &str) -> String {
        format!("{}.{}.{}", self.bundle_filename, version, self.bundle_type)
    }

    pub fn output_path(&self, version: &str) -> PathBuf {
        self.bundle_file_root.join(self.artifact_name(version))
    }

    /// Filename stem of the debug artifact.
    pub fn debug_filename(&self) -> String {
        format!("{}.debug", self.bundle_filename)
    }

    pub fn debug_output_path(&self, version: &str) -> PathBuf {
        self.bundle_file_root.join(format!("{}.{}.{}", self.debug_filename(), version, self.bundle_type))
    }

    /// Companion source map of the artifact for `version`.
    pub fn source_map_path(&self, version: &str) -> PathBuf {
        self.bundle_file_root.join(format!("{}.map", self.artifact_name(version)))
    }

    /// Public URL of the artifact for `version`.
    pub fn url(&self, version: &str) -> String {
        join_url(&self.bundle_url_root, &self.artifact_name(version))
    }

    /// URLs a page should link: the bundle when bundling is on and a version
    /// is known, otherwise every input file.
    pub fn file_urls(&self, version: Option<&str>, use_bundles: bool) -> Vec<String> {
        match version {
            Some(version) if use_bundles => vec![self.url(version)],
            _ => self.files.iter().map(|f| f.file_url.clone()).collect(),
        }
    }
}

/// Join a URL root and a relative name.
pub fn join_url(root: &str, name: &str) -> String {
    if root.is_empty() {
        name.to_string()
    } else if root.ends_with('/') {
        format!("{}{}", root, name)
    } else {
        format!("{}/{}", root, name)
    }
}

/// All bundles of a session, in declared order.
///
/// Bundles that failed to resolve are kept as errors so that only their own
/// build fails.
#[derive(Debug, Clone, Default)]
pub struct Bundles {
    entries: Vec<Result<Bundle, ResolveError>>,
}

impl Bundles {
    pub fn new(entries: Vec<Result<Bundle, ResolveError>>) -> Self {
        Self { entries }
    }

    pub fn from_bundles(bundles: Vec<Bundle>) -> Self {
        Self { entries: bundles.into_iter().map(Ok).collect() }
    }

    pub fn entries(&self) -> &[Result<Bundle, ResolveError>] {
        &self.entries
    }

    /// Successfully resolved bundles.
    pub fn iter(&self) -> impl Iterator<Item = &Bundle> {
        self.entries.iter().filter_map(|e| e.as_ref().ok())
    }

    /// Resolution failures.
    pub fn errors(&self) -> impl Iterator<Item = &ResolveError> {
        self.entries.iter().filter_map(|e| e.as_ref().err())
    }

    pub fn get(&self, name: &str) -> Option<&Bundle> {
        self.iter().find(|b| b.name == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
