//! Watch mode for incremental rechecks on file changes
//!
//! Provides file system watching with debouncing for the `bundles watch` and
//! `bundles build --watch` commands. A change to a bundle input re-runs only
//! that file's pre chain (precompiling it when the bundle asks for it) and
//! its lint check; bundle artifacts are not rebuilt.

use notify::RecursiveMode;
use notify_debouncer_mini::new_debouncer;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::build::bundle::{Bundle, BundleFile, Bundles};
use crate::build::context::BuildSession;
use crate::build::discovery::{is_precompile_output, to_slash};
use crate::build::lint::{lint_file, LintOutcome};
use crate::build::pipeline::precompile_file;
use crate::config::LintConfig;
use crate::processor::ProcessorLibrary;

/// Number of recent results kept for display.
pub const LOG_LINES: usize = 10;

/// How often the event loop checks for cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Error during watch mode
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// Failed to initialize file watcher
    #[error("Failed to initialize file watcher: {0}")]
    WatcherInit(#[source] notify::Error),
    /// Failed to add watch path
    #[error("Failed to watch {}: {source}", path.display())]
    WatchPath {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
    /// Channel receive error
    #[error("Watch channel error: {0}")]
    ChannelError(String),
    /// A bundle's files root does not exist
    #[error("Directory not found: {}", .0.display())]
    RootNotFound(PathBuf),
    #[error("Failed to install interrupt handler: {0}")]
    Signal(#[source] std::io::Error),
}

/// Where the engine is in handling a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Idle,
    DetectingChange,
    ResolvingOwner,
    Rechecking,
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

#[derive(Debug)]
struct IndexedBundle {
    bundle: Bundle,
    /// Canonical files root
    root: PathBuf,
    /// Canonical file path -> index into `bundle.files`
    files: HashMap<PathBuf, usize>,
}

impl IndexedBundle {
    fn new(bundle: Bundle) -> Self {
        let root = canonical(&bundle.files_root);
        let files = bundle.files.iter().enumerate().map(|(i, f)| (canonical(&f.file_path), i)).collect();
        Self { bundle, root, files }
    }
}

/// Lookup from changed paths to the bundle file that owns them.
///
/// Bundles are grouped by their files root, which is also what gets watched.
/// The index only grows: files created under a bundle's glob entries are
/// added, deleted files are left in place.
#[derive(Debug)]
pub struct WatchIndex {
    bundles: Vec<IndexedBundle>,
    /// Watched directory -> bundles rooted there, in declared order
    roots: Vec<(PathBuf, Vec<usize>)>,
}

impl WatchIndex {
    /// Index every resolved bundle.
    pub fn new(bundles: &Bundles) -> Self {
        let bundles: Vec<IndexedBundle> = bundles.iter().cloned().map(IndexedBundle::new).collect();

        let mut roots: Vec<(PathBuf, Vec<usize>)> = Vec::new();
        for (i, indexed) in bundles.iter().enumerate() {
            match roots.iter_mut().find(|(root, _)| *root == indexed.root) {
                Some((_, members)) => members.push(i),
                None => roots.push((indexed.root.clone(), vec![i])),
            }
        }
        Self { bundles, roots }
    }

    /// Directories to watch.
    pub fn roots(&self) -> impl Iterator<Item = &Path> {
        self.roots.iter().map(|(root, _)| root.as_path())
    }

    pub fn bundle(&self, index: usize) -> &Bundle {
        &self.bundles[index].bundle
    }

    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }

    /// Candidate bundles for a canonical path, in declared order.
    fn candidates<'a>(&'a self, path: &'a Path) -> impl Iterator<Item = usize> + 'a {
        self.roots
            .iter()
            .filter(move |(root, _)| path.starts_with(root))
            .flat_map(|(_, members)| members.iter().copied())
    }

    /// Owning (bundle, file) of a tracked path. The first bundle wins when a
    /// file belongs to several.
    pub fn resolve(&self, path: &Path) -> Option<(usize, usize)> {
        let path = canonical(path);
        let owner = self
            .candidates(&path)
            .find_map(|b| self.bundles[b].files.get(&path).map(|&f| (b, f)));
        owner
    }

    /// Add an untracked file that matches one of a bundle's glob entries.
    ///
    /// Precompile outputs of tracked files are never added.
    pub fn discover(
        &mut self,
        path: &Path,
        library: &ProcessorLibrary,
        linting: &BTreeMap<String, LintConfig>,
    ) -> Option<(usize, usize)> {
        if !path.is_file() {
            return None;
        }
        let path = canonical(path);
        let candidates: Vec<usize> = self.candidates(&path).collect();

        for b in candidates {
            let indexed = &mut self.bundles[b];
            let Ok(relative) = path.strip_prefix(&indexed.root) else {
                continue;
            };
            let relative = to_slash(relative);
            let bundle = &indexed.bundle;
            let tracked = |base: &str| bundle.files.iter().any(|f| f.name == base);
            if is_precompile_output(&relative, &bundle.bundle_type, tracked) {
                debug!(bundle = %bundle.name, file = %relative, "ignoring precompiled output");
                continue;
            }
            let Some(pattern) = indexed.bundle.matching_pattern(&relative) else {
                continue;
            };
            let overrides = pattern.overrides.clone();
            match indexed.bundle.new_file(&relative, &overrides, library, linting) {
                Ok(file) => {
                    debug!(bundle = %indexed.bundle.name, file = %relative, "tracking new file");
                    let f = indexed.bundle.files.len();
                    indexed.bundle.files.push(file);
                    indexed.files.insert(path.clone(), f);
                    return Some((b, f));
                }
                Err(e) => warn!(error = %e, "could not track new file"),
            }
        }
        None
    }
}

/// Tracks files with errors across rechecks for recovery detection
#[derive(Debug, Default)]
pub struct ErrorTracker {
    errors: BTreeMap<PathBuf, String>,
}

impl ErrorTracker {
    /// Create a new error tracker
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_failure(&mut self, path: &Path, message: impl Into<String>) {
        self.errors.insert(path.to_path_buf(), message.into());
    }

    /// Clear a file's error. Returns whether it had one.
    pub fn record_success(&mut self, path: &Path) -> bool {
        self.errors.remove(path).is_some()
    }

    pub fn get(&self, path: &Path) -> Option<&str> {
        self.errors.get(path).map(String::as_str)
    }

    /// Check if there are any tracked errors
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Get the number of files with errors
    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Path, &str)> {
        self.errors.iter().map(|(p, m)| (p.as_path(), m.as_str()))
    }
}

/// What handling one change event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
    /// The path belongs to no tracked file
    Ignored,
    Rechecked {
        bundle: String,
        file: PathBuf,
        /// Precompile output path, or the failure message
        precompiled: Option<Result<PathBuf, String>>,
        lint: Option<LintOutcome>,
    },
}

/// Shared flag that stops the watch loop.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Set the flag when the process receives Ctrl+C.
    pub fn cancel_on_ctrl_c(&self) -> Result<(), WatchError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(WatchError::Signal)?;
        let flag = self.clone();
        std::thread::Builder::new()
            .name("ctrl-c".to_string())
            .spawn(move || {
                if runtime.block_on(tokio::signal::ctrl_c()).is_ok() {
                    flag.cancel();
                }
            })
            .map_err(WatchError::Signal)?;
        Ok(())
    }
}

/// Clear the terminal screen
fn clear_screen() {
    // ANSI escape code to clear screen and move cursor to top-left
    print!("\x1B[2J\x1B[1;1H");
}

/// Get current timestamp for logging
fn timestamp() -> String {
    use std::time::SystemTime;
    let now = SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default();
    let secs = now.as_secs() % 86400; // seconds since midnight
    let hours = (secs / 3600) % 24;
    let minutes = (secs / 60) % 60;
    let seconds = secs % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

/// Incremental recheck engine.
pub struct WatchEngine<'a> {
    session: &'a BuildSession,
    index: WatchIndex,
    state: WatchState,
    errors: ErrorTracker,
    log: VecDeque<String>,
}

impl<'a> WatchEngine<'a> {
    /// Build the index from the session's resolved bundles.
    pub fn new(session: &'a BuildSession) -> Self {
        for error in session.bundles().errors() {
            warn!(error = %error, "bundle not watched");
        }
        Self {
            session,
            index: WatchIndex::new(session.bundles()),
            state: WatchState::Idle,
            errors: ErrorTracker::new(),
            log: VecDeque::with_capacity(LOG_LINES),
        }
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    pub fn index(&self) -> &WatchIndex {
        &self.index
    }

    pub fn errors(&self) -> &ErrorTracker {
        &self.errors
    }

    /// Most recent result lines, oldest first.
    pub fn log_lines(&self) -> impl Iterator<Item = &str> {
        self.log.iter().map(String::as_str)
    }

    fn log(&mut self, line: String) {
        if self.log.len() == LOG_LINES {
            self.log.pop_front();
        }
        self.log.push_back(line);
    }

    /// Precompile every file that has a pre chain, once per path.
    ///
    /// Returns the number of files precompiled.
    pub fn initial_pass(&mut self) -> usize {
        let mut seen = std::collections::HashSet::new();
        let mut count = 0;
        for b in 0..self.index.len() {
            for f in 0..self.index.bundle(b).files.len() {
                let path = self.index.bundle(b).files[f].file_path.clone();
                if !seen.insert(path) {
                    continue;
                }
                if self.precompile(b, f).is_some() {
                    count += 1;
                }
            }
        }
        count
    }

    fn precompile(&mut self, b: usize, f: usize) -> Option<Result<PathBuf, String>> {
        let bundle = self.index.bundle(b);
        let file = &bundle.files[f];
        if !bundle.precompile_in_debug || !file.has_preprocessors() {
            return None;
        }

        let result = precompile_file(bundle, file).map_err(|e| e.to_string());
        let line = match &result {
            Ok(_) => format!("PRECOMPILED\t\t{}", file.file_path.display()),
            Err(_) => format!("PRECOMPILE FAILED\t\t{}", file.file_path.display()),
        };
        let path = file.file_path.clone();
        if let Err(message) = &result {
            self.errors.record_failure(&path, message.clone());
        }
        self.log(line);
        Some(result)
    }

    fn lint(&mut self, b: usize, f: usize) -> Option<LintOutcome> {
        let session = self.session;
        let bundle = self.index.bundle(b);
        let file: &BundleFile = &bundle.files[f];
        if !file.lint {
            return None;
        }
        let config = session.config().linting.get(&bundle.bundle_type)?;

        let outcome = lint_file(file, config);
        let path = file.file_path.clone();
        match &outcome {
            LintOutcome::Passed => self.log(format!("OK\t\t{}", path.display())),
            LintOutcome::Failed(output) => {
                self.errors.record_failure(&path, output.clone());
                self.log(format!("FAIL\t\t{}", path.display()));
            }
        }
        Some(outcome)
    }

    /// Handle a create or modify notification for `path`.
    pub fn handle_change(&mut self, path: &Path) -> WatchOutcome {
        self.state = WatchState::DetectingChange;
        if !path.is_file() {
            self.state = WatchState::Idle;
            return WatchOutcome::Ignored;
        }

        self.state = WatchState::ResolvingOwner;
        let owner = self.index.resolve(path).or_else(|| {
            self.index
                .discover(path, self.session.library(), &self.session.config().linting)
        });
        let Some((b, f)) = owner else {
            debug!(path = %path.display(), "change ignored");
            self.state = WatchState::Idle;
            return WatchOutcome::Ignored;
        };

        self.state = WatchState::Rechecking;
        let file = self.index.bundle(b).files[f].file_path.clone();
        let precompiled = self.precompile(b, f);
        let lint = self.lint(b, f);

        let precompile_ok = !matches!(precompiled, Some(Err(_)));
        let lint_ok = lint.as_ref().map_or(true, LintOutcome::is_passed);
        if precompile_ok && lint_ok && self.errors.record_success(&file) {
            self.log(format!("FIXED\t\t{}", file.display()));
        }

        self.state = WatchState::Idle;
        WatchOutcome::Rechecked { bundle: self.index.bundle(b).name.clone(), file, precompiled, lint }
    }

    /// Status screen: files to fix with their errors, then recent results.
    pub fn status(&self) -> String {
        let mut out = String::from("Watching files for changes...\n");
        match self.errors.error_count() {
            0 => out.push_str("No files to fix\n"),
            n => out.push_str(&format!("{} file{} to fix\n", n, if n > 1 { "s" } else { "" })),
        }
        out.push('\n');

        for (path, message) in self.errors.iter() {
            out.push_str(&format!("\t{}\n", path.display()));
            for line in message.trim_end().lines() {
                out.push_str(&format!("\t\t{}\n", line));
            }
            out.push('\n');
        }

        for line in self.log.iter().rev() {
            out.push_str(&format!("\t{}\n", line));
        }
        out
    }

    fn draw(&self, clear: bool) {
        if clear {
            clear_screen();
        }
        println!("[{}]", timestamp());
        print!("{}", self.status());
    }

    /// Watch every bundle root until `cancel` is set.
    ///
    /// Runs the initial precompile pass first. Changes handled while the flag
    /// is being set finish before the loop returns.
    pub fn run(&mut self, cancel: &CancelFlag) -> Result<(), WatchError> {
        let watch_config = self.session.config().watch.clone();
        for root in self.index.roots() {
            if !root.is_dir() {
                return Err(WatchError::RootNotFound(root.to_path_buf()));
            }
        }

        // Create channel for debounced events
        let (tx, rx) = channel();
        let debounce_duration = Duration::from_millis(u64::from(watch_config.debounce_ms));
        let mut debouncer = new_debouncer(debounce_duration, tx).map_err(WatchError::WatcherInit)?;
        for root in self.index.roots() {
            debouncer
                .watcher()
                .watch(root, RecursiveMode::Recursive)
                .map_err(|source| WatchError::WatchPath { path: root.to_path_buf(), source })?;
        }

        self.initial_pass();
        self.draw(watch_config.clear_screen);

        while !cancel.is_cancelled() {
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(Ok(events)) => {
                    let mut changed = false;
                    for event in events {
                        if let WatchOutcome::Rechecked { .. } = self.handle_change(&event.path) {
                            changed = true;
                        }
                    }
                    if changed {
                        self.draw(watch_config.clear_screen);
                    }
                }
                Ok(Err(error)) => {
                    // Watch error (non-fatal) - log but continue watching
                    warn!(error = ?error, "watch error");
                    eprintln!("[{}] Watch error: {:?}", timestamp(), error);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(WatchError::ChannelError("event channel closed".to_string()));
                }
            }
        }

        debug!("watch cancelled");
        Ok(())
    }
}
