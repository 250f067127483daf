//! Bundle resolution.
//!
//! Expands the file entries of each `[[bundles]]` definition and resolves
//! processor references, producing the session's [`Bundles`].

use super::bundle::{Bundle, Bundles};
use crate::config::{resolve_path, BundleConfig, BundlesConfig};
use crate::processor::{ProcessorError, ProcessorLibrary};
use glob::glob;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// Error during file pattern expansion.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DiscoveryError {
    /// Invalid glob pattern
    #[error("Invalid glob pattern '{0}': {1}")]
    InvalidPattern(String, String),
    /// The non-wildcard directory part of a pattern does not exist
    #[error("Directory not found: {}", .0.display())]
    MissingDirectory(PathBuf),
}

/// A bundle definition that could not be resolved.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResolveError {
    #[error("Bundle {bundle}: {source}")]
    Discovery {
        bundle: String,
        #[source]
        source: DiscoveryError,
    },
    #[error("Bundle {bundle}: could not find file(s) '{pattern}'")]
    MissingFiles { bundle: String, pattern: String },
    #[error("Bundle {bundle}: {source}")]
    Processor {
        bundle: String,
        #[source]
        source: ProcessorError,
    },
}

impl ResolveError {
    /// Name of the bundle that failed to resolve.
    pub fn bundle(&self) -> &str {
        match self {
            ResolveError::Discovery { bundle, .. }
            | ResolveError::MissingFiles { bundle, .. }
            | ResolveError::Processor { bundle, .. } => bundle,
        }
    }
}

/// Whether a file entry is a glob pattern.
pub fn has_wildcard(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

/// The directory part of a pattern before its first wildcard component.
fn literal_prefix(pattern: &str) -> PathBuf {
    let mut prefix = PathBuf::new();
    let components: Vec<Component> = Path::new(pattern).components().collect();
    let last = components.len().saturating_sub(1);
    for (i, component) in components.into_iter().enumerate() {
        let text = component.as_os_str().to_string_lossy();
        if i == last || has_wildcard(&text) {
            break;
        }
        prefix.push(component);
    }
    prefix
}

/// Expand a file entry into paths relative to `files_root`.
///
/// Plain entries are returned as given so that a missing file can be
/// reported. Wildcard entries are matched inside `files_root` and returned
/// sorted, `/`-separated.
pub fn expand_file_names(files_root: &Path, pattern: &str) -> Result<Vec<String>, DiscoveryError> {
    if !has_wildcard(pattern) {
        return Ok(vec![pattern.to_string()]);
    }

    let directory = files_root.join(literal_prefix(pattern));
    if !directory.is_dir() {
        return Err(DiscoveryError::MissingDirectory(directory));
    }

    let full_pattern = files_root.join(pattern);
    let paths = glob(&full_pattern.to_string_lossy())
        .map_err(|e| DiscoveryError::InvalidPattern(pattern.to_string(), e.to_string()))?;

    let mut names = Vec::new();
    for entry in paths {
        match entry {
            Ok(path) if path.is_file() => {
                if let Ok(relative) = path.strip_prefix(files_root) {
                    names.push(to_slash(relative));
                }
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "error reading path during discovery"),
        }
    }

    names.sort();
    Ok(names)
}

/// Whether `name` is watch-mode precompile output of a tracked file.
///
/// Precompiled files are written as `<file>.<bundle type>` next to their
/// source, so any name that reduces to a tracked name by stripping that
/// suffix (one or more times) is output, not input.
pub fn is_precompile_output(name: &str, bundle_type: &str, is_tracked: impl Fn(&str) -> bool) -> bool {
    let suffix = format!(".{}", bundle_type);
    let mut stem = name;
    while let Some(base) = stem.strip_suffix(suffix.as_str()) {
        if is_tracked(base) {
            return true;
        }
        stem = base;
    }
    false
}

/// Render a relative path with `/` separators.
pub fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Resolve one bundle definition.
pub fn resolve_bundle(
    definition: &BundleConfig,
    config: &BundlesConfig,
    project_root: &Path,
    library: &ProcessorLibrary,
) -> Result<Bundle, ResolveError> {
    let project = &config.project;
    let files_root = resolve_path(project_root, definition.files_root.as_ref().unwrap_or(&project.files_root));
    let bundle_file_root = match &definition.bundle_file_root {
        Some(root) => resolve_path(project_root, root),
        None => files_root.clone(),
    };

    let mut bundle = Bundle::new(&definition.name, &definition.bundle_type, files_root, bundle_file_root);
    bundle.media = definition.media.clone();
    bundle.files_url_root = definition
        .files_url_root
        .clone()
        .unwrap_or_else(|| project.files_url_root.clone());
    bundle.bundle_url_root = definition
        .bundle_url_root
        .clone()
        .unwrap_or_else(|| bundle.files_url_root.clone());
    if let Some(filename) = &definition.bundle_filename {
        bundle.bundle_filename = filename.clone();
    }
    bundle.create_debug = definition.create_debug;
    bundle.precompile_in_debug = definition.precompile_in_debug;
    bundle.source_map = definition.source_map.clone();

    bundle.processors = match &definition.processors {
        Some(refs) => library.resolve_all(refs),
        None => library.default_postprocessors(&definition.bundle_type),
    }
    .map_err(|source| ResolveError::Processor { bundle: definition.name.clone(), source })?;

    for entry in &definition.files {
        let pattern = entry.pattern();
        let overrides = entry.overrides();
        let names = expand_file_names(&bundle.files_root, pattern)
            .map_err(|source| ResolveError::Discovery { bundle: definition.name.clone(), source })?;

        if has_wildcard(pattern) {
            bundle.add_pattern(pattern, overrides.clone())?;
        } else if !bundle.files_root.join(pattern).is_file() {
            return Err(ResolveError::MissingFiles {
                bundle: definition.name.clone(),
                pattern: pattern.to_string(),
            });
        }

        for name in &names {
            let tracked = |base: &str| names.iter().any(|n| n == base) || bundle.files.iter().any(|f| f.name == base);
            if has_wildcard(pattern) && is_precompile_output(name, &bundle.bundle_type, tracked) {
                debug!(bundle = %bundle.name, file = %name, "skipping precompiled output");
                continue;
            }
            let file = bundle.new_file(name, &overrides, library, &config.linting)?;
            bundle.files.push(file);
        }
    }

    debug!(bundle = %bundle.name, files = bundle.files.len(), "resolved bundle");
    Ok(bundle)
}

/// Resolve every bundle definition, keeping failures per bundle.
pub fn resolve_bundles(config: &BundlesConfig, project_root: &Path, library: &ProcessorLibrary) -> Bundles {
    Bundles::new(
        config
            .bundles
            .iter()
            .map(|definition| resolve_bundle(definition, config, project_root, library))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use std::fs;
    use tempfile::TempDir;

    fn create_test_file(dir: &Path, relative: &str, content: &str) {
        let path = dir.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_has_wildcard() {
        assert!(has_wildcard("css/*.css"));
        assert!(has_wildcard("a?.js"));
        assert!(has_wildcard("[ab].js"));
        assert!(!has_wildcard("css/site.css"));
    }

    #[test]
    fn test_literal_prefix() {
        assert_eq!(literal_prefix("css/*.css"), PathBuf::from("css"));
        assert_eq!(literal_prefix("a/b/*/c.css"), PathBuf::from("a/b"));
        assert_eq!(literal_prefix("*.css"), PathBuf::new());
    }

    #[test]
    fn test_expand_literal() {
        let temp = TempDir::new().unwrap();
        let names = expand_file_names(temp.path(), "missing.css").unwrap();
        assert_eq!(names, vec!["missing.css"]);
    }

    #[test]
    fn test_expand_glob_sorted() {
        let temp = TempDir::new().unwrap();
        create_test_file(temp.path(), "css/b.css", "B");
        create_test_file(temp.path(), "css/a.css", "A");
        create_test_file(temp.path(), "css/c.txt", "C");
        create_test_file(temp.path(), "css/sub/d.css", "D");

        let names = expand_file_names(temp.path(), "css/*.css").unwrap();
        assert_eq!(names, vec!["css/a.css", "css/b.css"]);
    }

    #[test]
    fn test_expand_glob_missing_directory() {
        let temp = TempDir::new().unwrap();
        let err = expand_file_names(temp.path(), "nope/*.css").unwrap_err();
        assert!(matches!(err, DiscoveryError::MissingDirectory(_)));
    }

    #[test]
    fn test_expand_glob_invalid_pattern() {
        let temp = TempDir::new().unwrap();
        let err = expand_file_names(temp.path(), "[*.css").unwrap_err();
        assert!(matches!(err, DiscoveryError::InvalidPattern(..)));
        assert!(err.to_string().starts_with("Invalid glob pattern '[*.css'"));
        let copy = ResolveError::Discovery { bundle: "site".to_string(), source: err }.clone();
        assert_eq!(copy.bundle(), "site");
    }

    #[test]
    fn test_resolve_bundles() {
        let temp = TempDir::new().unwrap();
        create_test_file(temp.path(), "static/css/a.css", "A");
        create_test_file(temp.path(), "static/css/b.css", "B");
        create_test_file(temp.path(), "static/js/app.js", "app");

        let config = parse_config(
            r#"
[project]
name = "site"
files_root = "static"
files_url_root = "/static/"

[[bundles]]
name = "site_css"
type = "css"
files = ["css/*.css"]
bundle_file_root = "dist"

[[bundles]]
name = "broken"
type = "css"
files = ["css/missing.css"]

[[bundles]]
name = "app_js"
type = "js"
files = ["js/app.js"]
processors = [{ command = "cat" }]
bundle_filename = "app"
"#,
        )
        .unwrap();

        let bundles = resolve_bundles(&config, temp.path(), &ProcessorLibrary::new());
        assert_eq!(bundles.len(), 3);

        let css = bundles.get("site_css").unwrap();
        let names: Vec<&str> = css.files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["css/a.css", "css/b.css"]);
        assert_eq!(css.bundle_file_root, temp.path().join("dist"));
        assert_eq!(css.bundle_url_root, "/static/");
        assert_eq!(css.patterns.len(), 1);
        assert!(css.processors.is_empty());

        let err = bundles.errors().next().unwrap();
        assert_eq!(err.bundle(), "broken");
        assert!(matches!(err, ResolveError::MissingFiles { .. }));

        let js = bundles.get("app_js").unwrap();
        assert_eq!(js.bundle_filename, "app");
        assert_eq!(js.processors.len(), 1);
        assert_eq!(js.files[0].file_url, "/static/js/app.js");
    }

    #[test]
    fn test_is_precompile_output() {
        let tracked = |name: &str| name == "js/app.js";
        assert!(is_precompile_output("js/app.js.js", "js", tracked));
        assert!(is_precompile_output("js/app.js.js.js", "js", tracked));
        assert!(!is_precompile_output("js/app.js", "js", tracked));
        assert!(!is_precompile_output("js/other.js.js", "js", tracked));
        assert!(!is_precompile_output("js/app.js.css", "js", tracked));
    }

    #[test]
    fn test_resolve_skips_precompiled_outputs() {
        let temp = TempDir::new().unwrap();
        create_test_file(temp.path(), "js/app.js", "app");
        create_test_file(temp.path(), "js/app.js.js", "APP");
        create_test_file(temp.path(), "js/app.js.js.js", "APP");
        create_test_file(temp.path(), "js/util.js", "util");

        let config = parse_config(
            r#"
[project]
name = "site"

[[bundles]]
name = "app"
type = "js"
files = ["js/*.js"]
"#,
        )
        .unwrap();

        let bundles = resolve_bundles(&config, temp.path(), &ProcessorLibrary::new());
        let names: Vec<&str> = bundles.get("app").unwrap().files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["js/app.js", "js/util.js"]);
    }

    #[test]
    fn test_resolve_unknown_post_processor() {
        let temp = TempDir::new().unwrap();
        create_test_file(temp.path(), "a.css", "A");

        let config = parse_config(
            r#"
[project]
name = "site"

[[bundles]]
name = "site_css"
type = "css"
files = ["a.css"]
processors = ["minify-everything"]
"#,
        )
        .unwrap();

        let bundles = resolve_bundles(&config, temp.path(), &ProcessorLibrary::new());
        let err = bundles.errors().next().unwrap();
        assert!(matches!(err, ResolveError::Processor { .. }));
    }
}
