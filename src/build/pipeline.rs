//! Build pipeline orchestration.
//!
//! Each bundle is built as a single streaming pass: the pre-chain output of
//! every file is concatenated (each followed by a newline), run through the
//! bundle's post chain and handed to the [`Publisher`]. Nothing is buffered
//! whole in memory.

use super::bundle::{Bundle, BundleFile};
use super::context::BuildSession;
use super::discovery::ResolveError;
use super::progress::{NullProgress, ProgressEvent, ProgressReporter};
use super::publish::{write_atomic, PublishError, Published, Publisher, VersionMode};
use super::registry::{debug_key, RegistryError};
use super::result::{BuildResult, ErrorKind, GroupResult};
use super::sourcemap::publish_with_source_map;
use crate::pipeline::run_pipeline;
use crate::processor::{ProcessorError, ProcessorLibrary};
use crate::stream::{ByteStream, Chunk, StreamError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Error building a bundle or single file.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum BuildError {
    /// The bundle definition could not be resolved
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Processor(#[from] ProcessorError),
    /// A single-file input does not exist
    #[error("Input file not found: {}", .0.display())]
    MissingInput(PathBuf),
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error(transparent)]
    Publish(#[from] PublishError),
    #[error("Invalid source map for bundle {bundle}: {message}")]
    SourceMap { bundle: String, message: String },
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl BuildError {
    /// Classify the failure for reporting.
    pub fn kind(&self) -> ErrorKind {
        match self {
            BuildError::Resolve(_) | BuildError::Processor(_) | BuildError::MissingInput(_) => {
                ErrorKind::Configuration
            }
            BuildError::Stream(e) | BuildError::Publish(PublishError::Stream(e)) => stream_error_kind(e),
            BuildError::SourceMap { .. } => ErrorKind::Process,
            BuildError::Publish(_) | BuildError::Registry(_) => ErrorKind::Filesystem,
        }
    }
}

fn stream_error_kind(error: &StreamError) -> ErrorKind {
    match error.root() {
        StreamError::Io(_) | StreamError::Read { .. } => ErrorKind::Filesystem,
        _ => ErrorKind::Process,
    }
}

/// Concatenation of every file's pre-chain output, each followed by `\n`.
///
/// Files are opened lazily, one at a time. The first error is attributed to
/// its file and ends the stream.
pub struct ConcatStream {
    files: std::vec::IntoIter<BundleFile>,
    current: Option<(PathBuf, ByteStream)>,
    finished: bool,
}

impl ConcatStream {
    pub fn new(files: Vec<BundleFile>) -> Self {
        Self { files: files.into_iter(), current: None, finished: false }
    }

    fn fail(&mut self, path: PathBuf, error: StreamError) -> Option<Chunk> {
        self.finished = true;
        self.current = None;
        Some(Err(StreamError::in_file(path, error)))
    }
}

impl Iterator for ConcatStream {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.finished {
            return None;
        }
        loop {
            if let Some((path, stream)) = self.current.as_mut() {
                match stream.next() {
                    Some(Ok(chunk)) => return Some(Ok(chunk)),
                    Some(Err(e)) => {
                        let path = path.clone();
                        return self.fail(path, e);
                    }
                    None => {
                        self.current = None;
                        return Some(Ok(b"\n".to_vec()));
                    }
                }
            }

            let Some(file) = self.files.next() else {
                self.finished = true;
                return None;
            };
            match file.processed() {
                Ok(stream) => self.current = Some((file.file_path, stream)),
                Err(e) => return self.fail(file.file_path, e),
            }
        }
    }
}

/// Stream the concatenated pre-chain output of `files`.
pub fn concat_files(files: &[BundleFile]) -> ByteStream {
    ByteStream::new(ConcatStream::new(files.to_vec()))
}

/// Everything a successful bundle build wrote.
#[derive(Debug, Clone)]
pub struct BundleOutput {
    pub version: String,
    pub path: PathBuf,
    pub debug: Option<Published>,
    pub source_map: Option<PathBuf>,
}

impl BundleOutput {
    pub fn outputs(&self) -> Vec<PathBuf> {
        let mut outputs = vec![self.path.clone()];
        outputs.extend(self.source_map.clone());
        outputs.extend(self.debug.as_ref().map(|d| d.path.clone()));
        outputs
    }
}

/// Build and publish one bundle.
pub fn build_bundle(bundle: &Bundle, mode: VersionMode) -> Result<BundleOutput, BuildError> {
    let debug = if bundle.create_debug { Some(build_debug(bundle, mode)?) } else { None };

    if let Some(source_map) = &bundle.source_map {
        let output = publish_with_source_map(bundle, source_map, mode)?;
        return Ok(BundleOutput {
            version: output.artifact.version,
            path: output.artifact.path,
            debug,
            source_map: Some(output.map_path),
        });
    }

    let stream = run_pipeline(&bundle.processors, concat_files(&bundle.files))?;
    let published = Publisher::new(&bundle.bundle_file_root, &bundle.bundle_filename, &bundle.bundle_type)
        .with_mode(mode)
        .publish(stream)?;

    Ok(BundleOutput { version: published.version, path: published.path, debug, source_map: None })
}

/// Publish the concatenated pre-chain output without the post chain.
pub fn build_debug(bundle: &Bundle, mode: VersionMode) -> Result<Published, BuildError> {
    let published = Publisher::new(&bundle.bundle_file_root, bundle.debug_filename(), &bundle.bundle_type)
        .with_mode(mode)
        .publish(concat_files(&bundle.files))?;
    Ok(published)
}

/// Write a file's pre-chain output next to it as `<file>.<bundle type>`.
pub fn precompile_file(bundle: &Bundle, file: &BundleFile) -> Result<PathBuf, BuildError> {
    let path = file.precompile_path(&bundle.bundle_type);
    let stream = file.processed().map_err(|e| StreamError::in_file(&file.file_path, e))?;
    write_atomic(&path, stream)?;
    debug!(file = %file.name, path = %path.display(), "precompiled file");
    Ok(path)
}

/// Process a standalone file with the default chains for its types.
///
/// The pre chain is chosen by the input extension and the post chain by the
/// output extension.
pub fn build_single_file(library: &ProcessorLibrary, input: &Path, output: &Path) -> Result<u64, BuildError> {
    if !input.is_file() {
        return Err(BuildError::MissingInput(input.to_path_buf()));
    }

    let extension = |p: &Path| p.extension().map(|e| e.to_string_lossy().into_owned()).unwrap_or_default();
    let pre = library.default_preprocessors(&extension(input))?;
    let post = library.default_postprocessors(&extension(output))?;

    let stream = run_pipeline(&pre, ByteStream::open(input)?)?;
    let stream = run_pipeline(&post, stream)?;
    Ok(write_atomic(output, stream)?)
}

fn report_completed(reporter: &dyn ProgressReporter, result: &GroupResult) {
    reporter.report(ProgressEvent::GroupCompleted {
        name: result.name.clone(),
        status: result.status.clone(),
        duration_ms: result.duration.as_millis() as u64,
    });
}

/// Build one bundle entry and record its version on success.
pub(crate) fn execute_entry(
    session: &BuildSession,
    entry: &Result<Bundle, ResolveError>,
    reporter: &dyn ProgressReporter,
) -> GroupResult {
    let name = match entry {
        Ok(bundle) => bundle.name.clone(),
        Err(e) => e.bundle().to_string(),
    };
    reporter.report(ProgressEvent::GroupStarted { name: name.clone() });
    let start = Instant::now();

    let outcome = match entry {
        Ok(bundle) => build_bundle(bundle, session.mode()),
        Err(e) => Err(BuildError::Resolve(e.clone())),
    };

    let result = match outcome {
        Ok(output) => {
            session.record_version(&name, &output.version);
            if let Some(debug) = &output.debug {
                session.record_version(&debug_key(&name), &debug.version);
            }
            info!(bundle = %name, version = %output.version, "built bundle");
            GroupResult::success(&name, Some(output.version.clone()), output.outputs(), start.elapsed())
        }
        Err(e) => {
            warn!(bundle = %name, error = %e, "bundle failed");
            GroupResult::failed(&name, e.kind(), e.to_string(), start.elapsed())
        }
    };
    report_completed(reporter, &result);
    result
}

/// Build one standalone file.
pub(crate) fn execute_single_file(
    session: &BuildSession,
    input: &Path,
    output: &Path,
    reporter: &dyn ProgressReporter,
) -> GroupResult {
    let name = output.display().to_string();
    reporter.report(ProgressEvent::GroupStarted { name: name.clone() });
    let start = Instant::now();

    let result = match build_single_file(session.library(), input, output) {
        Ok(bytes) => {
            info!(input = %input.display(), output = %name, bytes, "built single file");
            GroupResult::success(&name, None, vec![output.to_path_buf()], start.elapsed())
        }
        Err(e) => {
            warn!(output = %name, error = %e, "single file failed");
            GroupResult::failed(&name, e.kind(), e.to_string(), start.elapsed())
        }
    };
    report_completed(reporter, &result);
    result
}

/// Save the version file and report completion.
pub(crate) fn finish_build(
    session: &BuildSession,
    mut result: BuildResult,
    start: Instant,
    reporter: &dyn ProgressReporter,
) -> BuildResult {
    if let Err(e) = session.save_versions() {
        let error = BuildError::from(e);
        warn!(error = %error, "failed to save version file");
        result.add_result(GroupResult::failed(
            session.version_file().display().to_string(),
            error.kind(),
            error.to_string(),
            std::time::Duration::ZERO,
        ));
    }

    let result = result.with_duration(start.elapsed());
    reporter.report(ProgressEvent::BuildCompleted {
        success: result.is_success(),
        duration_ms: result.total_duration.as_millis() as u64,
        succeeded: result.success_count(),
        failed: result.failed_count(),
    });
    result
}

/// Sequential build of every bundle followed by the single files.
pub struct BuildPipeline<'a> {
    session: &'a BuildSession,
    /// Whether to stop on first error
    fail_fast: bool,
    reporter: Arc<dyn ProgressReporter>,
}

impl<'a> BuildPipeline<'a> {
    /// Create a new build pipeline.
    pub fn new(session: &'a BuildSession) -> Self {
        Self { session, fail_fast: false, reporter: Arc::new(NullProgress::new()) }
    }

    /// Set fail-fast mode (stop on first error).
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Run the build.
    ///
    /// Versions are recorded from scratch; a group that fails has no entry in
    /// the version file afterwards.
    pub fn build(&self) -> BuildResult {
        let start = Instant::now();
        let reporter = self.reporter.as_ref();
        let entries = self.session.bundles().entries();
        let singles = self.session.single_files();

        reporter.report(ProgressEvent::BuildStarted { total_groups: entries.len() + singles.len() });
        self.session.reset_versions();

        let mut result = BuildResult::new();
        let mut stopped = false;
        for entry in entries {
            let group = execute_entry(self.session, entry, reporter);
            let failed = !group.is_success();
            result.add_result(group);
            if failed && self.fail_fast {
                stopped = true;
                break;
            }
        }

        if !stopped {
            for (input, output) in &singles {
                let group = execute_single_file(self.session, input, output, reporter);
                let failed = !group.is_success();
                result.add_result(group);
                if failed && self.fail_fast {
                    break;
                }
            }
        }

        finish_build(self.session, result, start, reporter)
    }
}
