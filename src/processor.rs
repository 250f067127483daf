//! Processors: single transformation steps.
//!
//! A [`Processor`] is either an in-process [`Transform`] or an external
//! [`CommandTemplate`]. Command templates may name `{infile}` and `{outfile}`
//! placeholders; without them the command streams through stdin/stdout.
//!
//! Symbolic processor names used in `bundles.toml` are resolved through a
//! [`ProcessorLibrary`] when the configuration is loaded.

use crate::config::{BundlesConfig, ProcessorRef};
use crate::process::ProcessRunner;
use crate::stream::{temp_file, ByteStream, StreamError};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Placeholder replaced with the path of the processor's input.
pub const INFILE: &str = "{infile}";

/// Placeholder replaced with the path the command must write its output to.
pub const OUTFILE: &str = "{outfile}";

/// Name of the in-process template processor.
pub const TEMPLATE_PROCESSOR: &str = "template";

/// Error resolving processor references.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProcessorError {
    /// A name that resolves to nothing
    #[error("Unknown processor '{0}'")]
    Unknown(String),
    /// An inline command with no text
    #[error("Processor command cannot be empty")]
    EmptyCommand,
}

/// An in-process transformation over a byte stream.
pub trait Transform: Send + Sync + fmt::Debug {
    /// Name used in diagnostics.
    fn name(&self) -> &str;

    /// Transform `input` into a new stream.
    fn apply(&self, input: ByteStream) -> Result<ByteStream, StreamError>;
}

/// One transformation step.
#[derive(Clone, Debug)]
pub enum Processor {
    /// In-process transform
    Transform(Arc<dyn Transform>),
    /// External command
    Command(CommandTemplate),
}

impl Processor {
    /// An external-command processor.
    pub fn command(template: impl Into<String>) -> Self {
        Processor::Command(CommandTemplate::new(template))
    }

    /// An in-process processor.
    pub fn transform<T: Transform + 'static>(transform: T) -> Self {
        Processor::Transform(Arc::new(transform))
    }

    /// Whether the processor needs its input at a real path on disk.
    pub fn requires_file(&self) -> bool {
        match self {
            Processor::Command(command) => command.reads_file(),
            Processor::Transform(_) => false,
        }
    }

    /// Apply this step to `input`.
    pub fn apply(&self, input: ByteStream) -> Result<ByteStream, StreamError> {
        match self {
            Processor::Transform(transform) => transform.apply(input),
            Processor::Command(command) => command.run(input),
        }
    }
}

impl fmt::Display for Processor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Processor::Transform(transform) => write!(f, "{}", transform.name()),
            Processor::Command(command) => write!(f, "{}", command.template()),
        }
    }
}

/// A shell command line with optional `{infile}` / `{outfile}` slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    template: String,
}

impl CommandTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self { template: template.into() }
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Whether the command reads its input from a file.
    pub fn reads_file(&self) -> bool {
        self.template.contains(INFILE)
    }

    /// Whether the command writes its output to a file.
    pub fn writes_file(&self) -> bool {
        self.template.contains(OUTFILE)
    }

    /// Substitute placeholders with shell-quoted paths.
    pub fn render(&self, infile: Option<&Path>, outfile: Option<&Path>) -> String {
        let mut command = self.template.clone();
        if let Some(infile) = infile {
            command = command.replace(INFILE, &shell_quote(infile));
        }
        if let Some(outfile) = outfile {
            command = command.replace(OUTFILE, &shell_quote(outfile));
        }
        command
    }

    /// Run the command over `input`.
    ///
    /// Input is materialized when the command names `{infile}`; file-backed
    /// input is used in place. With `{outfile}` the command's stdout is
    /// discarded and the output file is streamed once the command exits.
    pub fn run(&self, input: ByteStream) -> Result<ByteStream, StreamError> {
        let (stdin, infile) = if self.reads_file() {
            (None, Some(input.materialize()?))
        } else {
            (Some(input), None)
        };
        let outfile = if self.writes_file() { Some(temp_file()?) } else { None };

        let command = self.render(
            infile.as_ref().map(|m| m.path()),
            outfile.as_ref().map(|f| f.path()),
        );
        debug!(%command, "running processor command");

        let mut runner = ProcessRunner::new(command);
        if let Some(stdin) = stdin {
            runner = runner.stdin(stdin);
        }
        if let Some(infile) = infile {
            runner = runner.release_on_exit(Box::new(infile));
        }
        let output = runner.spawn()?;

        match outfile {
            Some(outfile) => {
                for chunk in output {
                    chunk?;
                }
                ByteStream::from_temp(outfile)
            }
            None => Ok(ByteStream::new(output)),
        }
    }
}

/// Quote a path for interpolation into a shell command line.
pub fn shell_quote(path: &Path) -> String {
    let raw = path.to_string_lossy();
    let safe = !raw.is_empty()
        && raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | ':' | '\\' | '+' | ','));
    if safe {
        raw.into_owned()
    } else if cfg!(windows) {
        format!("\"{}\"", raw)
    } else {
        format!("'{}'", raw.replace('\'', r"'\''"))
    }
}

/// Supplies the values a template is rendered against.
pub trait ContextProvider: Send + Sync + fmt::Debug {
    fn template_context(&self) -> serde_json::Value;
}

/// Renders its input as an `upon` template.
#[derive(Debug, Clone)]
pub struct TemplateTransform {
    context: Arc<dyn ContextProvider>,
}

impl TemplateTransform {
    pub fn new(context: Arc<dyn ContextProvider>) -> Self {
        Self { context }
    }

    fn failure(&self, message: impl fmt::Display) -> StreamError {
        StreamError::Transform { processor: TEMPLATE_PROCESSOR.to_string(), message: message.to_string() }
    }
}

impl Transform for TemplateTransform {
    fn name(&self) -> &str {
        TEMPLATE_PROCESSOR
    }

    fn apply(&self, input: ByteStream) -> Result<ByteStream, StreamError> {
        let source = String::from_utf8(input.into_bytes()?).map_err(|e| self.failure(e))?;
        let engine = upon::Engine::new();
        let template = engine.compile(source).map_err(|e| self.failure(e))?;
        let rendered = template
            .render(&engine, self.context.template_context())
            .to_string()
            .map_err(|e| self.failure(e))?;
        Ok(ByteStream::from_bytes(rendered))
    }
}

/// Builtin command processors.
pub const BUILTIN_COMMANDS: &[(&str, &str)] = &[
    ("less", "lessc {infile}"),
    ("uglify", "uglifyjs"),
    ("cleancss", "cleancss"),
];

/// Maps symbolic names to processors and holds the per-type default chains.
#[derive(Debug, Clone, Default)]
pub struct ProcessorLibrary {
    named: HashMap<String, Processor>,
    default_pre: HashMap<String, Vec<ProcessorRef>>,
    default_post: HashMap<String, Vec<ProcessorRef>>,
}

impl ProcessorLibrary {
    /// A library holding only the builtin command processors.
    pub fn new() -> Self {
        let mut library = Self::default();
        for (name, command) in BUILTIN_COMMANDS {
            library.register(*name, Processor::command(*command));
        }
        library
    }

    /// Build the library described by a configuration.
    ///
    /// The `template` processor renders against `context`.
    pub fn from_config(config: &BundlesConfig, context: Arc<dyn ContextProvider>) -> Self {
        let mut library = Self::new();
        library.register(TEMPLATE_PROCESSOR, Processor::transform(TemplateTransform::new(context)));
        for (name, processor) in &config.processors {
            library.register(name.clone(), Processor::command(processor.command.clone()));
        }
        library.default_pre = config
            .defaults
            .preprocessors
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        library.default_post = config
            .defaults
            .postprocessors
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        library
    }

    /// Register (or replace) a named processor.
    pub fn register(&mut self, name: impl Into<String>, processor: Processor) {
        self.named.insert(name.into(), processor);
    }

    pub fn get(&self, name: &str) -> Option<&Processor> {
        self.named.get(name)
    }

    /// Set the default pre chain for a file type.
    pub fn set_default_preprocessors(&mut self, file_type: impl Into<String>, refs: Vec<ProcessorRef>) {
        self.default_pre.insert(file_type.into(), refs);
    }

    /// Set the default post chain for a bundle type.
    pub fn set_default_postprocessors(&mut self, bundle_type: impl Into<String>, refs: Vec<ProcessorRef>) {
        self.default_post.insert(bundle_type.into(), refs);
    }

    /// Resolve one reference.
    pub fn resolve(&self, reference: &ProcessorRef) -> Result<Processor, ProcessorError> {
        match reference {
            ProcessorRef::Name(name) => {
                self.named.get(name).cloned().ok_or_else(|| ProcessorError::Unknown(name.clone()))
            }
            ProcessorRef::Inline { command } if command.trim().is_empty() => {
                Err(ProcessorError::EmptyCommand)
            }
            ProcessorRef::Inline { command } => Ok(Processor::command(command.clone())),
        }
    }

    /// Resolve a chain of references, in order.
    pub fn resolve_all(&self, refs: &[ProcessorRef]) -> Result<Vec<Processor>, ProcessorError> {
        refs.iter().map(|r| self.resolve(r)).collect()
    }

    /// Default pre chain for files of `file_type`.
    pub fn default_preprocessors(&self, file_type: &str) -> Result<Vec<Processor>, ProcessorError> {
        match self.default_pre.get(file_type) {
            Some(refs) => self.resolve_all(refs),
            None => Ok(Vec::new()),
        }
    }

    /// Default post chain for bundles of `bundle_type`.
    pub fn default_postprocessors(&self, bundle_type: &str) -> Result<Vec<Processor>, ProcessorError> {
        match self.default_post.get(bundle_type) {
            Some(refs) => self.resolve_all(refs),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[derive(Debug)]
    struct FixedContext(serde_json::Value);

    impl ContextProvider for FixedContext {
        fn template_context(&self) -> serde_json::Value {
            self.0.clone()
        }
    }

    #[derive(Debug)]
    struct Uppercase;

    impl Transform for Uppercase {
        fn name(&self) -> &str {
            "uppercase"
        }

        fn apply(&self, input: ByteStream) -> Result<ByteStream, StreamError> {
            Ok(ByteStream::from_bytes(input.into_bytes()?.to_ascii_uppercase()))
        }
    }

    fn run(processor: &Processor, input: &str) -> String {
        let output = processor.apply(ByteStream::from_bytes(input)).unwrap();
        String::from_utf8(output.into_bytes().unwrap()).unwrap()
    }

    #[test]
    fn test_stream_command() {
        assert_eq!(run(&Processor::command("tr a-z A-Z"), "abc"), "ABC");
    }

    #[test]
    fn test_transform_processor() {
        let processor = Processor::transform(Uppercase);
        assert!(!processor.requires_file());
        assert_eq!(processor.to_string(), "uppercase");
        assert_eq!(run(&processor, "shout"), "SHOUT");
    }

    #[test]
    fn test_infile_command_reads_materialized_input() {
        let processor = Processor::command("cat {infile}");
        assert!(processor.requires_file());
        assert_eq!(run(&processor, "from memory"), "from memory");
    }

    #[test]
    fn test_infile_uses_backing_file_directly() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("source.less");
        std::fs::write(&path, "x").unwrap();

        let output = Processor::command("printf %s {infile}")
            .apply(ByteStream::open(&path).unwrap())
            .unwrap()
            .into_bytes()
            .unwrap();
        assert_eq!(PathBuf::from(String::from_utf8(output).unwrap()), path);
        assert!(path.exists(), "source file must not be removed");
    }

    #[test]
    fn test_infile_temp_file_removed_after_run() {
        let output = Processor::command("printf %s {infile}")
            .apply(ByteStream::from_bytes("data"))
            .unwrap()
            .into_bytes()
            .unwrap();
        let temp_path = PathBuf::from(String::from_utf8(output).unwrap());
        assert!(!temp_path.exists());
    }

    #[test]
    fn test_outfile_command() {
        let processor = Processor::command("tr a-z A-Z < {infile} > {outfile}; echo ignored");
        assert_eq!(run(&processor, "quiet"), "QUIET");
    }

    #[test]
    fn test_outfile_command_failure() {
        let processor = Processor::command("cat {infile} > {outfile}; exit 4");
        let err = processor.apply(ByteStream::from_bytes("x")).unwrap_err();
        assert_eq!(err.process_failure().and_then(|f| f.exit_code), Some(4));
    }

    #[test]
    fn test_render_quotes_paths() {
        let template = CommandTemplate::new("lessc {infile} {outfile}");
        let rendered = template.render(Some(Path::new("/tmp/a b.less")), Some(Path::new("/tmp/out.css")));
        assert_eq!(rendered, "lessc '/tmp/a b.less' /tmp/out.css");
    }

    #[test]
    fn test_shell_quote_escapes_single_quote() {
        assert_eq!(shell_quote(Path::new("it's")), r"'it'\''s'");
        assert_eq!(shell_quote(Path::new("plain/path.css")), "plain/path.css");
    }

    #[test]
    fn test_template_transform() {
        let context = FixedContext(json!({
            "settings": { "CDN": "https://cdn.example.com" },
            "bundles": { "site": { "url": "/b/site.abc.css", "version": "abc" } }
        }));
        let processor = Processor::transform(TemplateTransform::new(Arc::new(context)));
        let output = run(&processor, "{{ settings.CDN }}|{{ bundles.site.url }}");
        assert_eq!(output, "https://cdn.example.com|/b/site.abc.css");
    }

    #[test]
    fn test_template_transform_reports_errors() {
        let processor = Processor::transform(TemplateTransform::new(Arc::new(FixedContext(json!({})))));
        let err = processor.apply(ByteStream::from_bytes("{{ missing.value }}")).unwrap_err();
        assert!(err.to_string().starts_with("template failed"));
    }

    #[test]
    fn test_library_builtins() {
        let library = ProcessorLibrary::new();
        assert!(library.get("less").unwrap().requires_file());
        assert!(library.get("uglify").is_some());
        assert!(library.get("template").is_none());
    }

    #[test]
    fn test_library_resolve() {
        let library = ProcessorLibrary::new();
        assert!(library.resolve(&ProcessorRef::Name("cleancss".into())).is_ok());
        assert_eq!(
            library.resolve(&ProcessorRef::Name("nope".into())).unwrap_err(),
            ProcessorError::Unknown("nope".into())
        );
        assert_eq!(
            library.resolve(&ProcessorRef::Inline { command: " ".into() }).unwrap_err(),
            ProcessorError::EmptyCommand
        );
    }

    #[test]
    fn test_library_defaults() {
        let mut library = ProcessorLibrary::new();
        library.set_default_preprocessors("less", vec![ProcessorRef::Name("less".into())]);
        library.set_default_postprocessors("js", vec![ProcessorRef::Inline { command: "cat".into() }]);

        assert_eq!(library.default_preprocessors("less").unwrap().len(), 1);
        assert!(library.default_preprocessors("css").unwrap().is_empty());
        assert_eq!(library.default_postprocessors("js").unwrap()[0].to_string(), "cat");
    }

    #[test]
    fn test_library_from_config() {
        let config: BundlesConfig = toml::from_str(
            r#"
            [project]
            name = "site"

            [processors.less]
            command = "lessc --strict {infile}"
            "#,
        )
        .unwrap();
        let library = ProcessorLibrary::from_config(&config, Arc::new(FixedContext(json!({}))));
        assert_eq!(library.get("less").unwrap().to_string(), "lessc --strict {infile}");
        assert_eq!(library.get("template").unwrap().to_string(), "template");
        assert_eq!(library.default_postprocessors("js").unwrap()[0].to_string(), "uglifyjs");
    }
}
