//! Build result types.
//!
//! Contains types for representing the outcome of build operations.

use std::path::PathBuf;
use std::time::Duration;

/// Classification of a build failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed declaration or missing input
    Configuration,
    /// External command failed
    Process,
    /// Unreadable input or unwritable output
    Filesystem,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Configuration => write!(f, "configuration error"),
            ErrorKind::Process => write!(f, "process failure"),
            ErrorKind::Filesystem => write!(f, "filesystem error"),
        }
    }
}

/// Status of a single group build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildStatus {
    /// Build succeeded
    Success,
    /// Build failed with error
    Failed { kind: ErrorKind, message: String },
}

impl BuildStatus {
    /// Check if the status indicates success.
    pub fn is_success(&self) -> bool {
        matches!(self, BuildStatus::Success)
    }

    /// Check if the status indicates failure.
    pub fn is_failure(&self) -> bool {
        matches!(self, BuildStatus::Failed { .. })
    }

    /// The failure kind, if failed.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            BuildStatus::Failed { kind, .. } => Some(*kind),
            BuildStatus::Success => None,
        }
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildStatus::Success => write!(f, "success"),
            BuildStatus::Failed { kind, message } => write!(f, "{}: {}", kind, message),
        }
    }
}

/// Result of building a single group (or single file).
#[derive(Debug, Clone)]
pub struct GroupResult {
    /// Group name
    pub name: String,
    /// Build status
    pub status: BuildStatus,
    /// Published version, when the group is versioned
    pub version: Option<String>,
    /// Output files produced
    pub outputs: Vec<PathBuf>,
    /// Build duration
    pub duration: Duration,
}

impl GroupResult {
    /// Create a successful result.
    pub fn success(name: impl Into<String>, version: Option<String>, outputs: Vec<PathBuf>, duration: Duration) -> Self {
        Self { name: name.into(), status: BuildStatus::Success, version, outputs, duration }
    }

    /// Create a failed result.
    pub fn failed(name: impl Into<String>, kind: ErrorKind, message: impl Into<String>, duration: Duration) -> Self {
        Self {
            name: name.into(),
            status: BuildStatus::Failed { kind, message: message.into() },
            version: None,
            outputs: vec![],
            duration,
        }
    }

    /// Check if this result is successful.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Result of a complete build run.
#[derive(Debug, Default)]
pub struct BuildResult {
    /// Results in declared group order, followed by single files
    pub groups: Vec<GroupResult>,
    /// Total build duration
    pub total_duration: Duration,
}

impl BuildResult {
    /// Create a new empty build result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a group result.
    pub fn add_result(&mut self, result: GroupResult) {
        self.groups.push(result);
    }

    /// Set the total duration.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.total_duration = duration;
        self
    }

    /// Result for a named group.
    pub fn get(&self, name: &str) -> Option<&GroupResult> {
        self.groups.iter().find(|r| r.name == name)
    }

    /// Get the number of successful groups.
    pub fn success_count(&self) -> usize {
        self.groups.iter().filter(|r| r.status.is_success()).count()
    }

    /// Get the number of failed groups.
    pub fn failed_count(&self) -> usize {
        self.groups.iter().filter(|r| r.status.is_failure()).count()
    }

    /// Check if the overall build succeeded (no failures).
    pub fn is_success(&self) -> bool {
        self.failed_count() == 0
    }

    /// Get all outputs produced.
    pub fn all_outputs(&self) -> Vec<&PathBuf> {
        self.groups.iter().flat_map(|r| r.outputs.iter()).collect()
    }

    /// Get failed results.
    pub fn failures(&self) -> Vec<&GroupResult> {
        self.groups.iter().filter(|r| r.status.is_failure()).collect()
    }

    /// Format a summary of the build result.
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();

        let success = self.success_count();
        let failed = self.failed_count();
        let total = self.groups.len();

        if failed > 0 {
            lines.push(format!("Build failed: {} succeeded, {} failed ({} total)", success, failed, total));
            for group in self.failures() {
                lines.push(format!("  - {}: {}", group.name, group.status));
            }
        } else {
            lines.push(format!("Build succeeded: {} built ({} total) in {:?}", success, total, self.total_duration));
        }

        lines.join("\n")
    }
}
