//! Configuration loading and discovery for `bundles.toml`
//!
//! Provides functions to find and load configuration.

use super::schema::{BundlesConfig, DefaultsConfig, ProjectConfig, WatchConfig};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Configuration file name looked up by [`find_config`].
pub const CONFIG_FILENAME: &str = "bundles.toml";

/// Configuration loading error
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// File I/O error
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// TOML parsing error
    #[error("Failed to parse bundles.toml: {0}")]
    Parse(#[from] toml::de::Error),
    /// Validation error
    #[error("Config validation failed:\n{}", .0.iter().map(|e| format!("  - {}", e)).collect::<Vec<_>>().join("\n"))]
    Validation(Vec<String>),
}

/// Find bundles.toml by walking up from the current working directory.
pub fn find_config() -> Option<PathBuf> {
    env::current_dir().ok().and_then(find_config_from)
}

/// Find bundles.toml by walking up from a specific directory.
pub fn find_config_from(start: PathBuf) -> Option<PathBuf> {
    let mut current = start;

    loop {
        let config_path = current.join(CONFIG_FILENAME);
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            return None;
        }
    }
}

/// Load configuration from a bundles.toml file.
///
/// If a path is provided, loads from that file. Otherwise, uses `find_config()`
/// to locate the config file. Returns the configuration together with the
/// path it was loaded from; when no file is found a default configuration is
/// returned with no path.
///
/// # Example
/// ```ignore
/// let (config, path) = load_config(None)?;
/// ```
pub fn load_config(path: Option<&Path>) -> Result<(BundlesConfig, Option<PathBuf>), ConfigError> {
    let config_path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => find_config(),
    };

    match config_path {
        Some(p) => Ok((load_config_file(&p)?, Some(p))),
        None => Ok((default_config(), None)),
    }
}

/// Load configuration from a specific file path.
fn load_config_file(path: &Path) -> Result<BundlesConfig, ConfigError> {
    let contents =
        fs::read_to_string(path).map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
    parse_config(&contents)
}

/// Parse and validate configuration text.
pub fn parse_config(contents: &str) -> Result<BundlesConfig, ConfigError> {
    let config: BundlesConfig = toml::from_str(contents)?;

    let errors = config.validate();
    if !errors.is_empty() {
        return Err(ConfigError::Validation(errors.into_iter().map(|e| e.to_string()).collect()));
    }

    Ok(config)
}

/// Create a default configuration when no bundles.toml is found.
///
/// The project name is the current directory name and no bundles are defined.
pub fn default_config() -> BundlesConfig {
    let project_name = env::current_dir()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "unnamed".to_string());

    BundlesConfig {
        project: ProjectConfig {
            name: project_name,
            files_root: PathBuf::from("."),
            files_url_root: "/".to_string(),
            version_file: PathBuf::from("bundles_versions.json"),
            use_bundles: true,
        },
        context: BTreeMap::new(),
        processors: BTreeMap::new(),
        defaults: DefaultsConfig::default(),
        linting: BTreeMap::new(),
        watch: WatchConfig::default(),
        bundles: Vec::new(),
        single_files: Vec::new(),
    }
}

/// Get the project root directory from a config file path.
///
/// Returns the parent directory of the bundles.toml file.
pub fn project_root(config_path: &Path) -> Option<&Path> {
    config_path.parent()
}

/// Resolve a path relative to the project root.
///
/// If the path is absolute, returns it unchanged.
/// If relative, joins it with the project root.
/// `.` components are dropped, so the default `files_root = "."` resolves to
/// the project root itself.
pub fn resolve_path(project_root: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        project_root.join(path)
    };
    let resolved: PathBuf = joined.components().filter(|c| !matches!(c, Component::CurDir)).collect();
    if resolved.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_config(dir: &Path, contents: &str) -> PathBuf {
        let config_path = dir.join(CONFIG_FILENAME);
        File::create(&config_path)
            .expect("should create config file")
            .write_all(contents.as_bytes())
            .expect("should write config content");
        config_path
    }

    #[test]
    fn test_find_config_in_current_dir() {
        let temp = TempDir::new().expect("should create temp dir");
        let config_path = write_config(temp.path(), "[project]\nname = \"test\"");

        let found = find_config_from(temp.path().to_path_buf());
        assert_eq!(found, Some(config_path));
    }

    #[test]
    fn test_find_config_in_parent_dir() {
        let temp = TempDir::new().expect("should create temp dir");
        let config_path = write_config(temp.path(), "[project]\nname = \"test\"");

        let subdir = temp.path().join("static").join("css");
        fs::create_dir_all(&subdir).expect("should create subdirectories");

        let found = find_config_from(subdir);
        assert_eq!(found, Some(config_path));
    }

    #[test]
    fn test_find_config_not_found() {
        let temp = TempDir::new().expect("should create temp dir");
        let found = find_config_from(temp.path().to_path_buf());
        assert_eq!(found, None);
    }

    #[test]
    fn test_load_config_from_file() {
        let temp = TempDir::new().expect("should create temp dir");
        let config_path = write_config(
            temp.path(),
            r#"
[project]
name = "test-project"
files_root = "static"

[[bundles]]
name = "site_css"
type = "css"
files = ["css/*.css"]
"#,
        );

        let (config, path) = load_config(Some(&config_path)).expect("should load valid config");
        assert_eq!(path.as_deref(), Some(config_path.as_path()));
        assert_eq!(config.project.name, "test-project");
        assert_eq!(config.bundles.len(), 1);
    }

    #[test]
    fn test_load_config_missing_file_errors() {
        let temp = TempDir::new().expect("should create temp dir");
        let config_path = temp.path().join("nonexistent.toml");

        let result = load_config(Some(&config_path));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_default_config() {
        let config = default_config();
        assert!(!config.project.name.is_empty());
        assert!(config.bundles.is_empty());
        assert!(config.is_valid());
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let temp = TempDir::new().expect("should create temp dir");
        let config_path = write_config(temp.path(), "this is not valid toml {{{");

        let result = load_config(Some(&config_path));
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_config_validation_error() {
        let result = parse_config("[project]\nname = \"\"\n");
        match result {
            Err(ConfigError::Validation(errors)) => assert_eq!(errors.len(), 1),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_resolve_path() {
        let root = Path::new("/project");
        assert_eq!(resolve_path(root, Path::new("static")), PathBuf::from("/project/static"));
        assert_eq!(resolve_path(root, Path::new("/abs")), PathBuf::from("/abs"));
    }

    #[test]
    fn test_resolve_path_drops_current_dir() {
        let root = Path::new("/project");
        assert_eq!(resolve_path(root, Path::new(".")), PathBuf::from("/project"));
        assert_eq!(resolve_path(root, Path::new("./static/./css")), PathBuf::from("/project/static/css"));
        assert_eq!(resolve_path(Path::new("."), Path::new("static")), PathBuf::from("static"));
        assert_eq!(resolve_path(Path::new("."), Path::new(".")), PathBuf::from("."));

        let files_root = resolve_path(root, Path::new("."));
        assert_eq!(files_root.join("css/a.css"), PathBuf::from("/project/css/a.css"));
    }

    #[test]
    fn test_project_root() {
        let path = Path::new("/project/bundles.toml");
        assert_eq!(project_root(path), Some(Path::new("/project")));
    }

    #[test]
    #[serial]
    fn test_load_config_discovers_from_cwd() {
        let temp = TempDir::new().expect("should create temp dir");
        let config_path = write_config(temp.path(), "[project]\nname = \"found\"");
        let subdir = temp.path().join("static");
        fs::create_dir_all(&subdir).expect("should create subdirectory");

        let original_dir = env::current_dir().expect("should read cwd");
        env::set_current_dir(&subdir).expect("should change cwd");
        let result = load_config(None);
        env::set_current_dir(original_dir).expect("should restore cwd");

        let (config, path) = result.expect("should load discovered config");
        assert_eq!(config.project.name, "found");
        let found = path.expect("config path").canonicalize().expect("should canonicalize");
        assert_eq!(found, config_path.canonicalize().expect("should canonicalize"));
    }
}
