//! Parallel build execution.
//!
//! Bundles are independent of each other, so they are handed out to a fixed
//! number of scoped worker threads. Each worker pulls the next bundle index
//! from a shared counter until none remain. Results are reordered to the
//! declared bundle order before being returned.
//!
//! Single files run after all bundles, sequentially, so a `template`
//! processor sees every bundle built in this session.
//!
//! # Example
//!
//! ```ignore
//! use bundlepipe::build::{BuildSession, ParallelBuild};
//!
//! let session = BuildSession::new(config, project_root)?;
//! let result = ParallelBuild::new(&session)
//!     .with_jobs(4)  // Use 4 parallel workers
//!     .run();
//!
//! println!("Built {} groups in {:?}", result.success_count(), result.total_duration);
//! ```

use super::context::BuildSession;
use super::pipeline::{execute_entry, execute_single_file, finish_build};
use super::progress::{NullProgress, ProgressEvent, ProgressReporter};
use super::result::{BuildResult, GroupResult};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::debug;

/// Default number of parallel jobs (uses available parallelism).
pub fn default_jobs() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

/// Parallel build executor.
pub struct ParallelBuild<'a> {
    session: &'a BuildSession,
    /// Number of parallel jobs
    jobs: usize,
    /// Whether to stop on first error
    fail_fast: bool,
    reporter: Arc<dyn ProgressReporter>,
}

impl<'a> ParallelBuild<'a> {
    /// Create a new parallel build.
    pub fn new(session: &'a BuildSession) -> Self {
        Self { session, jobs: default_jobs(), fail_fast: false, reporter: Arc::new(NullProgress::new()) }
    }

    /// Set the number of parallel jobs.
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
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

    /// Get the number of parallel jobs.
    pub fn jobs(&self) -> usize {
        self.jobs
    }

    /// Run the parallel build.
    pub fn run(&self) -> BuildResult {
        let start = Instant::now();
        let reporter = self.reporter.as_ref();
        let singles = self.session.single_files();
        let total = self.session.bundles().len();

        reporter.report(ProgressEvent::BuildStarted { total_groups: total + singles.len() });
        self.session.reset_versions();

        let failed = AtomicBool::new(false);
        let mut result = BuildResult::new();
        for group in self.execute_bundles(&failed) {
            result.add_result(group);
        }

        for (input, output) in &singles {
            if self.fail_fast && failed.load(Ordering::SeqCst) {
                break;
            }
            let group = execute_single_file(self.session, input, output, reporter);
            if !group.is_success() {
                failed.store(true, Ordering::SeqCst);
            }
            result.add_result(group);
        }

        finish_build(self.session, result, start, reporter)
    }

    /// Build every bundle across the worker threads.
    fn execute_bundles(&self, failed: &AtomicBool) -> Vec<GroupResult> {
        let entries = self.session.bundles().entries();
        if entries.is_empty() {
            return vec![];
        }

        let num_workers = self.jobs.min(entries.len());
        debug!(bundles = entries.len(), workers = num_workers, "parallel build");

        let results: Mutex<Vec<(usize, GroupResult)>> = Mutex::new(Vec::with_capacity(entries.len()));
        let next_idx = AtomicUsize::new(0);
        let session = self.session;
        let reporter = self.reporter.as_ref();
        let fail_fast = self.fail_fast;

        std::thread::scope(|s| {
            for _ in 0..num_workers {
                let results = &results;
                let next_idx = &next_idx;

                s.spawn(move || loop {
                    if fail_fast && failed.load(Ordering::SeqCst) {
                        break;
                    }

                    let idx = next_idx.fetch_add(1, Ordering::SeqCst);
                    if idx >= entries.len() {
                        break;
                    }

                    let result = execute_entry(session, &entries[idx], reporter);
                    if !result.is_success() {
                        failed.store(true, Ordering::SeqCst);
                    }
                    results.lock().unwrap_or_else(PoisonError::into_inner).push((idx, result));
                });
            }
        });

        // Sort results by original index to maintain deterministic order
        let mut results = results.into_inner().unwrap_or_else(PoisonError::into_inner);
        results.sort_by_key(|(idx, _)| *idx);
        results.into_iter().map(|(_, r)| r).collect()
    }
}
