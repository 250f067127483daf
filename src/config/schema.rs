//! Configuration schema types for `bundles.toml`
//!
//! Defines the structure and validation rules for bundle definitions.

use crate::processor::INFILE;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

/// Placeholder for the space-separated list of bundle input paths.
pub const INFILE_LIST: &str = "{infile_list}";

/// Placeholder for the rendered source map options.
pub const SOURCE_MAP_OPTIONS: &str = "{source_map_options}";

/// Placeholder for the source map output path inside the options.
pub const MAP_FILE: &str = "{map_file}";

/// Project section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project name (required)
    pub name: String,
    /// Default root directory for bundle input files
    #[serde(default = "default_files_root")]
    pub files_root: PathBuf,
    /// Default URL root for bundle input files
    #[serde(default = "default_files_url_root")]
    pub files_url_root: String,
    /// Version registry location
    #[serde(default = "default_version_file")]
    pub version_file: PathBuf,
    /// Whether URL consumers should link bundles rather than individual files
    #[serde(default = "default_true")]
    pub use_bundles: bool,
}

fn default_files_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_files_url_root() -> String {
    "/".to_string()
}

fn default_version_file() -> PathBuf {
    PathBuf::from("bundles_versions.json")
}

fn default_true() -> bool {
    true
}

/// A reference to a processor: a registered name or an inline command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProcessorRef {
    /// Named processor (`"less"`)
    Name(String),
    /// Inline command (`{ command = "..." }`)
    Inline { command: String },
}

impl ProcessorRef {
    pub fn name(name: impl Into<String>) -> Self {
        ProcessorRef::Name(name.into())
    }
}

/// Named command processor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    pub command: String,
}

/// Default processor chains by type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// File type -> pre chain
    #[serde(default = "default_preprocessors")]
    pub preprocessors: BTreeMap<String, Vec<ProcessorRef>>,
    /// Bundle type -> post chain
    #[serde(default = "default_postprocessors")]
    pub postprocessors: BTreeMap<String, Vec<ProcessorRef>>,
}

fn default_preprocessors() -> BTreeMap<String, Vec<ProcessorRef>> {
    BTreeMap::from([("less".to_string(), vec![ProcessorRef::name("less")])])
}

fn default_postprocessors() -> BTreeMap<String, Vec<ProcessorRef>> {
    BTreeMap::from([("js".to_string(), vec![ProcessorRef::name("uglify")])])
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            preprocessors: default_preprocessors(),
            postprocessors: default_postprocessors(),
        }
    }
}

/// Lint command for one bundle type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LintConfig {
    /// Command, run with the file's pre-chain output as `{infile}` or stdin
    pub command: String,
    /// Whether files are linted unless they opt out
    #[serde(default = "default_true")]
    pub default: bool,
    /// Required trimmed stdout for a pass
    #[serde(default)]
    pub success_output: Option<String>,
}

/// Watch mode configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Debounce delay in milliseconds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u32,
    /// Clear terminal between rechecks
    #[serde(default)]
    pub clear_screen: bool,
}

fn default_debounce_ms() -> u32 {
    100
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { debounce_ms: 100, clear_screen: false }
    }
}

/// A bundle input entry: a path/pattern, or a table with per-file overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FileEntry {
    Path(String),
    Detailed(FileConfig),
}

impl FileEntry {
    pub fn pattern(&self) -> &str {
        match self {
            FileEntry::Path(path) => path,
            FileEntry::Detailed(config) => &config.path,
        }
    }

    /// Overrides carried by the entry.
    pub fn overrides(&self) -> FileConfig {
        match self {
            FileEntry::Path(path) => FileConfig { path: path.clone(), ..FileConfig::default() },
            FileEntry::Detailed(config) => config.clone(),
        }
    }
}

/// Per-file overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileConfig {
    pub path: String,
    /// File type (defaults to the extension)
    #[serde(default, rename = "type")]
    pub file_type: Option<String>,
    #[serde(default)]
    pub lint: Option<bool>,
    /// Pre chain (defaults to the file type's default chain)
    #[serde(default)]
    pub processors: Option<Vec<ProcessorRef>>,
}

/// Alternate publisher invocation producing a source map
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceMapConfig {
    /// Command with `{infile_list}` and `{source_map_options}`
    pub command: String,
    /// Options with `{map_file}`
    #[serde(default = "default_source_map_options")]
    pub options: String,
    /// Append a `sourceMappingURL` comment to the published bundle
    #[serde(default = "default_true")]
    pub append_reference: bool,
}

fn default_source_map_options() -> String {
    "--source-map {map_file}".to_string()
}

/// One `[[bundles]]` entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub bundle_type: String,
    pub files: Vec<FileEntry>,
    #[serde(default)]
    pub media: Option<String>,
    #[serde(default)]
    pub files_root: Option<PathBuf>,
    #[serde(default)]
    pub files_url_root: Option<String>,
    #[serde(default)]
    pub bundle_url_root: Option<String>,
    #[serde(default)]
    pub bundle_file_root: Option<PathBuf>,
    #[serde(default)]
    pub bundle_filename: Option<String>,
    /// Post chain (defaults to the bundle type's default chain)
    #[serde(default)]
    pub processors: Option<Vec<ProcessorRef>>,
    #[serde(default)]
    pub create_debug: bool,
    #[serde(default)]
    pub precompile_in_debug: bool,
    #[serde(default)]
    pub source_map: Option<SourceMapConfig>,
}

/// A standalone file processed outside any bundle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SingleFileConfig {
    pub input: PathBuf,
    pub output: PathBuf,
}

/// Complete bundles.toml configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundlesConfig {
    /// Project settings (required)
    pub project: ProjectConfig,
    /// Values exposed to templates as `settings`
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    /// Named command processors
    #[serde(default)]
    pub processors: BTreeMap<String, ProcessorConfig>,
    #[serde(default)]
    pub defaults: DefaultsConfig,
    /// Lint commands by bundle type
    #[serde(default)]
    pub linting: BTreeMap<String, LintConfig>,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub bundles: Vec<BundleConfig>,
    #[serde(default)]
    pub single_files: Vec<SingleFileConfig>,
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    /// Path to the invalid field (e.g., "bundles.site.type")
    pub field: String,
    /// Error message
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bundles.toml: '{}' {}", self.field, self.message)
    }
}

impl BundlesConfig {
    /// Validate the configuration and return any errors
    pub fn validate(&self) -> Vec<ConfigValidationError> {
        let mut errors = Vec::new();
        let mut error = |field: String, message: &str| {
            errors.push(ConfigValidationError { field, message: message.to_string() });
        };

        if self.project.name.is_empty() {
            error("project.name".to_string(), "must be a non-empty string");
        }

        for (name, processor) in &self.processors {
            if processor.command.trim().is_empty() {
                error(format!("processors.{}.command", name), "must be a non-empty command");
            }
        }

        for (bundle_type, lint) in &self.linting {
            if lint.command.trim().is_empty() {
                error(format!("linting.{}.command", bundle_type), "must be a non-empty command");
            }
        }

        let mut seen = HashSet::new();
        for (index, bundle) in self.bundles.iter().enumerate() {
            if bundle.name.is_empty() {
                error(format!("bundles[{}].name", index), "must be a non-empty string");
            } else if !seen.insert(bundle.name.as_str()) {
                error(format!("bundles.{}.name", bundle.name), "is defined more than once");
            }
            if bundle.bundle_type.is_empty() {
                error(format!("bundles.{}.type", bundle.name), "must be a non-empty string");
            }
            if let Some(source_map) = &bundle.source_map {
                if !source_map.command.contains(INFILE_LIST) {
                    error(
                        format!("bundles.{}.source_map.command", bundle.name),
                        "must contain {infile_list}",
                    );
                }
                if source_map.command.contains(INFILE) {
                    error(
                        format!("bundles.{}.source_map.command", bundle.name),
                        "takes {infile_list}, not {infile}",
                    );
                }
            }
        }

        for (index, single) in self.single_files.iter().enumerate() {
            if single.output.as_os_str().is_empty() {
                error(format!("single_files[{}].output", index), "must be a non-empty path");
            }
        }

        errors
    }

    /// Check if validation passed
    pub fn is_valid(&self) -> bool {
        self.validate().is_empty()
    }

    /// Look up a bundle definition by name.
    pub fn bundle(&self, name: &str) -> Option<&BundleConfig> {
        self.bundles.iter().find(|b| b.name == name)
    }
}
