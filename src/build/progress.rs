//! Build progress reporting.
//!
//! # Example
//!
//! ```ignore
//! use bundlepipe::build::progress::{ProgressReporter, ConsoleProgress, ProgressEvent};
//!
//! let reporter = ConsoleProgress::new();
//! reporter.report(ProgressEvent::BuildStarted { total_groups: 2 });
//! reporter.report(ProgressEvent::GroupCompleted {
//!     name: "site_css".to_string(),
//!     status: BuildStatus::Success,
//!     duration_ms: 150,
//! });
//! ```

use super::result::BuildStatus;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Events that can be reported during a build.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Build process started
    BuildStarted {
        /// Total number of groups to build
        total_groups: usize,
    },
    /// A group build started
    GroupStarted { name: String },
    /// A group build completed
    GroupCompleted {
        name: String,
        status: BuildStatus,
        /// Duration in milliseconds
        duration_ms: u64,
    },
    /// Build process completed
    BuildCompleted {
        /// Whether the overall build succeeded
        success: bool,
        /// Total duration in milliseconds
        duration_ms: u64,
        succeeded: usize,
        failed: usize,
    },
    /// A warning was generated
    Warning {
        /// Group that generated the warning (if applicable)
        name: Option<String>,
        message: String,
    },
}

/// Trait for progress reporters.
pub trait ProgressReporter: Send + Sync {
    /// Report a progress event.
    fn report(&self, event: ProgressEvent);

    /// Check if this reporter wants verbose output.
    fn is_verbose(&self) -> bool {
        false
    }
}

/// A progress reporter that discards all events.
#[derive(Debug, Default)]
pub struct NullProgress;

impl NullProgress {
    pub fn new() -> Self {
        Self
    }
}

impl ProgressReporter for NullProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Console progress reporter with optional colors.
pub struct ConsoleProgress {
    use_colors: bool,
    verbose: bool,
    current: AtomicUsize,
    total: AtomicUsize,
    /// Output writer (for testing)
    output: Mutex<Box<dyn Write + Send>>,
}

impl std::fmt::Debug for ConsoleProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleProgress")
            .field("use_colors", &self.use_colors)
            .field("verbose", &self.verbose)
            .field("current", &self.current)
            .field("total", &self.total)
            .finish()
    }
}

impl ConsoleProgress {
    /// Create a console progress reporter writing to stdout.
    pub fn new() -> Self {
        Self {
            use_colors: true,
            verbose: false,
            current: AtomicUsize::new(0),
            total: AtomicUsize::new(0),
            output: Mutex::new(Box::new(std::io::stdout())),
        }
    }

    /// Create a console progress reporter that writes to a custom output.
    pub fn with_output<W: Write + Send + 'static>(output: W) -> Self {
        Self {
            use_colors: false,
            verbose: false,
            current: AtomicUsize::new(0),
            total: AtomicUsize::new(0),
            output: Mutex::new(Box::new(output)),
        }
    }

    pub fn with_colors(mut self, use_colors: bool) -> Self {
        self.use_colors = use_colors;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    fn color(&self, text: &str, color: &str) -> String {
        if self.use_colors {
            format!("{}{}\x1b[0m", color, text)
        } else {
            text.to_string()
        }
    }

    fn green(&self, text: &str) -> String {
        self.color(text, "\x1b[32m")
    }

    fn yellow(&self, text: &str) -> String {
        self.color(text, "\x1b[33m")
    }

    fn red(&self, text: &str) -> String {
        self.color(text, "\x1b[31m")
    }

    fn cyan(&self, text: &str) -> String {
        self.color(text, "\x1b[36m")
    }

    fn bold(&self, text: &str) -> String {
        self.color(text, "\x1b[1m")
    }

    fn writeln(&self, line: &str) {
        if let Ok(mut output) = self.output.lock() {
            let _ = writeln!(output, "{}", line);
        }
    }
}

impl Default for ConsoleProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for ConsoleProgress {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::BuildStarted { total_groups } => {
                self.total.store(total_groups, Ordering::SeqCst);
                self.current.store(0, Ordering::SeqCst);
                if total_groups > 0 {
                    self.writeln(&format!(
                        "{} Building {} bundle{}...",
                        self.cyan("[build]"),
                        total_groups,
                        if total_groups == 1 { "" } else { "s" }
                    ));
                }
            }
            ProgressEvent::GroupStarted { name } => {
                if self.verbose {
                    let current = self.current.load(Ordering::SeqCst) + 1;
                    let total = self.total.load(Ordering::SeqCst);
                    self.writeln(&format!("{} [{}/{}] Building {}...", self.cyan("[build]"), current, total, name));
                }
            }
            ProgressEvent::GroupCompleted { name, status, duration_ms } => {
                let current = self.current.fetch_add(1, Ordering::SeqCst) + 1;
                let total = self.total.load(Ordering::SeqCst).max(current);

                let status_str = match &status {
                    BuildStatus::Success => self.green("ok"),
                    BuildStatus::Failed { .. } => self.red("FAILED"),
                };

                self.writeln(&format!(
                    "{} [{}/{}] {} {} ({})",
                    self.cyan("[build]"),
                    current,
                    total,
                    status_str,
                    name,
                    format_duration(duration_ms)
                ));

                if let BuildStatus::Failed { .. } = status {
                    for line in status.to_string().lines() {
                        self.writeln(&format!("        {}", self.red(line)));
                    }
                }
            }
            ProgressEvent::BuildCompleted { success, duration_ms, succeeded, failed } => {
                let duration_str = format_duration(duration_ms);

                if success {
                    self.writeln(&format!(
                        "\n{} {} {} built in {}",
                        self.green("[done]"),
                        self.bold(&succeeded.to_string()),
                        if succeeded == 1 { "bundle" } else { "bundles" },
                        duration_str
                    ));
                } else {
                    self.writeln(&format!(
                        "\n{} Build failed: {} succeeded, {} {} in {}",
                        self.red("[error]"),
                        succeeded,
                        failed,
                        if failed == 1 { "failure" } else { "failures" },
                        duration_str
                    ));
                }
            }
            ProgressEvent::Warning { name, message } => {
                let prefix = match name {
                    Some(name) => format!("{}: ", name),
                    None => String::new(),
                };
                self.writeln(&format!("{} {}{}", self.yellow("[warn]"), prefix, message));
            }
        }
    }

    fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Format a duration in milliseconds to a human-readable string.
pub fn format_duration(ms: u64) -> String {
    if ms < 1000 {
        format!("{}ms", ms)
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        let minutes = ms / 60_000;
        let seconds = (ms % 60_000) / 1000;
        format!("{}m {}s", minutes, seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::result::ErrorKind;
    use std::sync::Arc;

    struct TestWriter(Arc<Mutex<Vec<u8>>>);

    impl Write for TestWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn capture() -> (ConsoleProgress, Arc<Mutex<Vec<u8>>>) {
        let output = Arc::new(Mutex::new(Vec::new()));
        let reporter = ConsoleProgress::with_output(TestWriter(Arc::clone(&output)));
        (reporter, output)
    }

    fn text(output: &Arc<Mutex<Vec<u8>>>) -> String {
        String::from_utf8(output.lock().unwrap().clone()).unwrap()
    }

    #[test]
    fn test_null_progress() {
        let reporter = NullProgress::new();
        reporter.report(ProgressEvent::BuildStarted { total_groups: 10 });
        reporter.report(ProgressEvent::GroupStarted { name: "test".to_string() });
        assert!(!reporter.is_verbose());
    }

    #[test]
    fn test_console_progress_build_started() {
        let (reporter, output) = capture();
        reporter.report(ProgressEvent::BuildStarted { total_groups: 5 });
        assert!(text(&output).contains("Building 5 bundles..."));
    }

    #[test]
    fn test_console_progress_group_started_only_when_verbose() {
        let (reporter, output) = capture();
        reporter.report(ProgressEvent::GroupStarted { name: "site_css".to_string() });
        assert!(text(&output).is_empty());

        let (reporter, output) = capture();
        let reporter = reporter.with_verbose(true);
        reporter.report(ProgressEvent::BuildStarted { total_groups: 1 });
        reporter.report(ProgressEvent::GroupStarted { name: "site_css".to_string() });
        assert!(text(&output).contains("[1/1] Building site_css..."));
    }

    #[test]
    fn test_console_progress_group_failed() {
        let (reporter, output) = capture();
        reporter.report(ProgressEvent::BuildStarted { total_groups: 2 });
        reporter.report(ProgressEvent::GroupCompleted {
            name: "app_js".to_string(),
            status: BuildStatus::Failed { kind: ErrorKind::Process, message: "uglifyjs exited".to_string() },
            duration_ms: 12,
        });

        let out = text(&output);
        assert!(out.contains("[1/2] FAILED app_js (12ms)"));
        assert!(out.contains("process failure: uglifyjs exited"));
    }

    #[test]
    fn test_console_progress_build_completed() {
        let (reporter, output) = capture();
        reporter.report(ProgressEvent::BuildCompleted { success: false, duration_ms: 1500, succeeded: 3, failed: 1 });
        assert!(text(&output).contains("Build failed: 3 succeeded, 1 failure in 1.5s"));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(500), "500ms");
        assert_eq!(format_duration(1500), "1.5s");
        assert_eq!(format_duration(125_000), "2m 5s");
    }
}
