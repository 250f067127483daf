//! Build session containing configuration and state for a build.

use super::bundle::{join_url, Bundles};
use super::discovery::resolve_bundles;
use super::publish::VersionMode;
use super::registry::{RegistryError, VersionRegistry};
use crate::config::{resolve_path, BundlesConfig};
use crate::processor::{ContextProvider, ProcessorLibrary};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

/// Where a bundle's artifact is served from.
#[derive(Debug, Clone)]
struct BundleLink {
    name: String,
    url_root: String,
    filename: String,
    bundle_type: String,
}

/// Values seen by the `template` processor.
///
/// Every resolved bundle has an entry under `bundles`. It stays `null` until
/// the bundle has a recorded version, so templates can test for it.
#[derive(Debug)]
pub struct TemplateContext {
    settings: BTreeMap<String, String>,
    links: OnceLock<Vec<BundleLink>>,
    versions: Arc<Mutex<VersionRegistry>>,
}

impl ContextProvider for TemplateContext {
    fn template_context(&self) -> Value {
        let versions = lock(&self.versions);
        let mut bundles = Map::new();
        for link in self.links.get().map(Vec::as_slice).unwrap_or_default() {
            let entry = match versions.get(&link.name) {
                Some(version) => {
                    let url = join_url(&link.url_root, &format!("{}.{}.{}", link.filename, version, link.bundle_type));
                    json!({ "url": url, "version": version })
                }
                None => Value::Null,
            };
            bundles.insert(link.name.clone(), entry);
        }
        json!({ "settings": self.settings, "bundles": bundles })
    }
}

fn lock(versions: &Mutex<VersionRegistry>) -> MutexGuard<'_, VersionRegistry> {
    versions.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owned context passed to every build component.
///
/// Holds the configuration, the resolved bundles and the version registry.
/// The registry sits behind a single mutex; it is the only state shared
/// between concurrently building bundles.
#[derive(Debug)]
pub struct BuildSession {
    /// The loaded configuration
    config: BundlesConfig,
    /// Project root directory (where bundles.toml is located)
    project_root: PathBuf,
    library: ProcessorLibrary,
    bundles: Bundles,
    versions: Arc<Mutex<VersionRegistry>>,
    mode: VersionMode,
}

impl BuildSession {
    /// Create a session, resolving bundles and loading the version file.
    pub fn new(config: BundlesConfig, project_root: PathBuf) -> Result<Self, RegistryError> {
        let version_file = resolve_path(&project_root, &config.project.version_file);
        let versions = Arc::new(Mutex::new(VersionRegistry::load(&version_file)?));

        let context = Arc::new(TemplateContext {
            settings: config.context.clone(),
            links: OnceLock::new(),
            versions: Arc::clone(&versions),
        });
        let library = ProcessorLibrary::from_config(&config, context.clone());
        let bundles = resolve_bundles(&config, &project_root, &library);

        let links = bundles
            .iter()
            .map(|b| BundleLink {
                name: b.name.clone(),
                url_root: b.bundle_url_root.clone(),
                filename: b.bundle_filename.clone(),
                bundle_type: b.bundle_type.clone(),
            })
            .collect();
        let _ = context.links.set(links);

        Ok(Self {
            config,
            project_root,
            library,
            bundles,
            versions,
            mode: VersionMode::Hashed,
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &BundlesConfig {
        &self.config
    }

    /// Get the project root directory.
    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn bundles(&self) -> &Bundles {
        &self.bundles
    }

    pub fn library(&self) -> &ProcessorLibrary {
        &self.library
    }

    pub fn mode(&self) -> VersionMode {
        self.mode
    }

    /// Whether artifacts use the placeholder version.
    pub fn is_dev(&self) -> bool {
        self.mode == VersionMode::Placeholder
    }

    /// Select placeholder versions instead of digests.
    pub fn with_dev(mut self, dev: bool) -> Self {
        self.mode = if dev { VersionMode::Placeholder } else { VersionMode::Hashed };
        self
    }

    /// Resolve a path relative to the project root.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        resolve_path(&self.project_root, path)
    }

    /// Location of the version registry.
    pub fn version_file(&self) -> PathBuf {
        self.resolve_path(&self.config.project.version_file)
    }

    /// Recorded version of a bundle (or `debug:` key).
    pub fn version(&self, name: &str) -> Option<String> {
        lock(&self.versions).get(name).map(str::to_string)
    }

    pub fn record_version(&self, name: &str, version: &str) {
        lock(&self.versions).set(name, version);
    }

    /// Snapshot of the registry.
    pub fn versions(&self) -> VersionRegistry {
        lock(&self.versions).clone()
    }

    /// Forget every recorded version.
    pub fn reset_versions(&self) {
        lock(&self.versions).clear();
    }

    /// Persist the registry to the version file.
    pub fn save_versions(&self) -> Result<(), RegistryError> {
        let snapshot = self.versions();
        snapshot.save(&self.version_file())
    }

    /// URL of a bundle's current artifact, if it has been built.
    pub fn bundle_url(&self, name: &str) -> Option<String> {
        let bundle = self.bundles.get(name)?;
        self.version(name).map(|v| bundle.url(&v))
    }

    /// URLs a page should include for a bundle.
    pub fn bundle_file_urls(&self, name: &str) -> Option<Vec<String>> {
        let bundle = self.bundles.get(name)?;
        let version = self.version(name);
        Some(bundle.file_urls(version.as_deref(), self.config.project.use_bundles))
    }

    /// Standalone files as (input, output) paths.
    pub fn single_files(&self) -> Vec<(PathBuf, PathBuf)> {
        self.config
            .single_files
            .iter()
            .map(|s| (self.resolve_path(&s.input), self.resolve_path(&s.output)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{default_config, parse_config};
    use crate::stream::ByteStream;
    use std::fs;
    use tempfile::TempDir;

    fn create_test_session(toml: &str) -> (TempDir, BuildSession) {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("static/css")).unwrap();
        fs::write(temp.path().join("static/css/a.css"), "A").unwrap();
        let config = parse_config(toml).unwrap();
        let session = BuildSession::new(config, temp.path().to_path_buf()).unwrap();
        (temp, session)
    }

    const SITE: &str = r#"
[project]
name = "site"
files_root = "static"
files_url_root = "/static/"

[context]
CDN = "https://cdn.example.com"

[[bundles]]
name = "site_css"
type = "css"
files = ["css/a.css"]
"#;

    #[test]
    fn test_build_session_new() {
        let temp = TempDir::new().unwrap();
        let session = BuildSession::new(default_config(), temp.path().to_path_buf()).unwrap();

        assert_eq!(session.project_root(), temp.path());
        assert!(!session.is_dev());
        assert!(session.bundles().is_empty());
        assert_eq!(session.version_file(), temp.path().join("bundles_versions.json"));
    }

    #[test]
    fn test_build_session_with_dev() {
        let temp = TempDir::new().unwrap();
        let session = BuildSession::new(default_config(), temp.path().to_path_buf())
            .unwrap()
            .with_dev(true);
        assert!(session.is_dev());
        assert_eq!(session.mode(), VersionMode::Placeholder);
    }

    #[test]
    fn test_versions_round_trip() {
        let (_temp, session) = create_test_session(SITE);
        assert!(session.bundle_url("site_css").is_none());

        session.record_version("site_css", "abc");
        assert_eq!(session.version("site_css").as_deref(), Some("abc"));
        assert_eq!(session.bundle_url("site_css").as_deref(), Some("/static/site_css.abc.css"));
        assert_eq!(session.bundle_file_urls("site_css").unwrap(), vec!["/static/site_css.abc.css"]);

        session.save_versions().unwrap();
        let loaded = VersionRegistry::load(&session.version_file()).unwrap();
        assert_eq!(loaded.get("site_css"), Some("abc"));

        session.reset_versions();
        assert!(session.versions().is_empty());
        assert_eq!(session.bundle_file_urls("site_css").unwrap(), vec!["/static/css/a.css"]);
    }

    #[test]
    fn test_loads_existing_version_file() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("bundles_versions.json"), r#"{"old": "123"}"#).unwrap();
        let session = BuildSession::new(default_config(), temp.path().to_path_buf()).unwrap();
        assert_eq!(session.version("old").as_deref(), Some("123"));
    }

    #[test]
    fn test_template_sees_unbuilt_bundles_as_null() {
        let (_temp, session) = create_test_session(SITE);
        let template = session.library().get("template").unwrap().clone();
        let render = |source: &str| {
            let output = template.apply(ByteStream::from_bytes(source.to_string())).unwrap();
            String::from_utf8(output.into_bytes().unwrap()).unwrap()
        };

        assert_eq!(render("{{ settings.CDN }}"), "https://cdn.example.com");
        assert_eq!(render("{% if bundles.site_css %}yes{% else %}no{% endif %}"), "no");

        session.record_version("site_css", "v1");
        assert_eq!(render("{% if bundles.site_css %}yes{% else %}no{% endif %}"), "yes");
        assert_eq!(render("{{ bundles.site_css.url }}"), "/static/site_css.v1.css");
    }

    #[test]
    fn test_single_files_resolve_against_root() {
        let toml = format!("{}\n[[single_files]]\ninput = \"a.js\"\noutput = \"dist/a.min.js\"\n", SITE);
        let (temp, session) = create_test_session(&toml);
        let singles = session.single_files();
        assert_eq!(singles, vec![(temp.path().join("a.js"), temp.path().join("dist/a.min.js"))]);
    }
}
