//! Per-file lint checks.
//!
//! Each lintable file's pre-chain output is fed to the lint command configured
//! for its bundle type, either on stdin or through `{infile}`. A file passes
//! when the command exits 0 and, if `success_output` is set, its trimmed
//! stdout equals that value.

use super::bundle::BundleFile;
use super::context::BuildSession;
use crate::config::LintConfig;
use crate::process::ProcessRunner;
use crate::processor::CommandTemplate;
use crate::stream::StreamError;
use rayon::prelude::*;
use regex::Regex;
use std::io::{self, Write};
use std::path::PathBuf;
use tracing::{debug, warn};

/// Error setting up a lint run.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum LintError {
    #[error("Invalid file pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("No lint command configured for type '{0}'")]
    NotConfigured(String),
}

/// Outcome of linting one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LintOutcome {
    Passed,
    /// Output explaining the failure
    Failed(String),
}

impl LintOutcome {
    pub fn is_passed(&self) -> bool {
        matches!(self, LintOutcome::Passed)
    }
}

/// Lint one file with the given configuration.
pub fn lint_file(file: &BundleFile, config: &LintConfig) -> LintOutcome {
    let mut stdout = Vec::new();
    match run_lint(file, config, &mut stdout) {
        Ok(()) => {
            let output = String::from_utf8_lossy(&stdout);
            match &config.success_output {
                Some(expected) if output.trim() != expected.trim() => LintOutcome::Failed(output.into_owned()),
                _ => LintOutcome::Passed,
            }
        }
        Err(e) => {
            let mut output = String::from_utf8_lossy(&stdout).into_owned();
            if !output.is_empty() && !output.ends_with('\n') {
                output.push('\n');
            }
            output.push_str(&e.to_string());
            LintOutcome::Failed(output)
        }
    }
}

fn run_lint(file: &BundleFile, config: &LintConfig, stdout: &mut Vec<u8>) -> Result<(), StreamError> {
    let input = file.processed()?;
    let template = CommandTemplate::new(&config.command);

    let runner = if template.reads_file() {
        let infile = input.materialize()?;
        let command = template.render(Some(infile.path()), None);
        ProcessRunner::new(command).release_on_exit(Box::new(infile))
    } else {
        ProcessRunner::new(template.render(None, None)).stdin(input)
    };
    debug!(file = %file.file_path.display(), command = runner.command(), "linting file");

    for chunk in runner.spawn()? {
        stdout.extend_from_slice(&chunk?);
    }
    Ok(())
}

/// Options for [`lint_session`].
#[derive(Debug, Clone, Default)]
pub struct LintOptions {
    /// Only lint files whose path matches
    pub pattern: Option<Regex>,
    pub failures_only: bool,
    pub parallel: bool,
}

impl LintOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter files by a regular expression on their path.
    pub fn with_pattern(mut self, pattern: Option<&str>) -> Result<Self, LintError> {
        self.pattern = pattern
            .map(|p| Regex::new(p).map_err(|source| LintError::Pattern { pattern: p.to_string(), source }))
            .transpose()?;
        Ok(self)
    }

    pub fn with_failures_only(mut self, failures_only: bool) -> Self {
        self.failures_only = failures_only;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }
}

/// Lint result for one file.
#[derive(Debug, Clone)]
pub struct FileLint {
    pub path: PathBuf,
    pub outcome: LintOutcome,
}

/// Results of a lint run, in bundle and file order.
#[derive(Debug, Clone, Default)]
pub struct LintReport {
    pub files: Vec<FileLint>,
}

impl LintReport {
    pub fn failed_count(&self) -> usize {
        self.files.iter().filter(|f| !f.outcome.is_passed()).count()
    }

    pub fn is_success(&self) -> bool {
        self.failed_count() == 0
    }

    /// Write `OK`/`FAIL` lines followed by the summary.
    pub fn write_to<W: Write>(&self, out: &mut W, failures_only: bool) -> io::Result<()> {
        for file in &self.files {
            match &file.outcome {
                LintOutcome::Passed if failures_only => {}
                LintOutcome::Passed => writeln!(out, "OK\t\t{}", file.path.display())?,
                LintOutcome::Failed(output) => {
                    writeln!(out, "FAIL\t\t{}", file.path.display())?;
                    if !output.is_empty() {
                        write!(out, "{}", output)?;
                        if !output.ends_with('\n') {
                            writeln!(out)?;
                        }
                    }
                }
            }
        }

        let failures = self.failed_count();
        if failures > 0 {
            writeln!(out, "\n{} FILE{} FAILED", failures, if failures > 1 { "S" } else { "" })
        } else {
            writeln!(out, "\nSUCCESS")
        }
    }
}

/// Lint every lintable file of the session's bundles.
pub fn lint_session(session: &BuildSession, options: &LintOptions) -> Result<LintReport, LintError> {
    for error in session.bundles().errors() {
        warn!(error = %error, "skipping bundle that failed to resolve");
    }

    let mut targets: Vec<(&BundleFile, &LintConfig)> = Vec::new();
    for bundle in session.bundles().iter() {
        for file in bundle.files.iter().filter(|f| f.lint) {
            if let Some(pattern) = &options.pattern {
                if !pattern.is_match(&file.file_path.to_string_lossy()) {
                    continue;
                }
            }
            let config = session
                .config()
                .linting
                .get(&bundle.bundle_type)
                .ok_or_else(|| LintError::NotConfigured(bundle.bundle_type.clone()))?;
            targets.push((file, config));
        }
    }

    let lint = |(file, config): &(&BundleFile, &LintConfig)| FileLint {
        path: file.file_path.clone(),
        outcome: lint_file(file, config),
    };
    let files = if options.parallel {
        targets.par_iter().map(lint).collect()
    } else {
        targets.iter().map(lint).collect()
    };

    Ok(LintReport { files })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn test_file(path: &Path) -> BundleFile {
        BundleFile {
            file_path: path.to_path_buf(),
            name: "a.js".to_string(),
            file_url: "/a.js".to_string(),
            file_type: "js".to_string(),
            lint: true,
            processors: vec![],
        }
    }

    fn lint_config(command: &str, success_output: Option<&str>) -> LintConfig {
        LintConfig { command: command.to_string(), default: true, success_output: success_output.map(String::from) }
    }

    #[test]
    fn test_lint_file_exit_status() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.js");
        fs::write(&path, "var a = 1;\n").unwrap();
        let file = test_file(&path);

        assert_eq!(lint_file(&file, &lint_config("cat > /dev/null", None)), LintOutcome::Passed);

        let outcome = lint_file(&file, &lint_config("echo 'line 1: bad'; exit 1", None));
        match outcome {
            LintOutcome::Failed(output) => {
                assert!(output.contains("line 1: bad"));
                assert!(output.contains("exited with status 1"));
            }
            LintOutcome::Passed => panic!("expected failure"),
        }
    }

    #[test]
    fn test_lint_file_success_output() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.js");
        fs::write(&path, "OK").unwrap();
        let file = test_file(&path);

        assert!(lint_file(&file, &lint_config("cat {infile}", Some("OK"))).is_passed());
        fs::write(&path, "1 warning").unwrap();
        assert_eq!(
            lint_file(&file, &lint_config("cat {infile}", Some("OK"))),
            LintOutcome::Failed("1 warning".to_string())
        );
    }

    #[test]
    fn test_report_output() {
        let report = LintReport {
            files: vec![
                FileLint { path: PathBuf::from("/a.js"), outcome: LintOutcome::Passed },
                FileLint { path: PathBuf::from("/b.js"), outcome: LintOutcome::Failed("bad".into()) },
            ],
        };

        let mut out = Vec::new();
        report.write_to(&mut out, false).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "OK\t\t/a.js\nFAIL\t\t/b.js\nbad\n\n1 FILE FAILED\n");

        let mut out = Vec::new();
        report.write_to(&mut out, true).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "FAIL\t\t/b.js\nbad\n\n1 FILE FAILED\n");

        let mut out = Vec::new();
        LintReport::default().write_to(&mut out, false).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "\nSUCCESS\n");
    }

    #[test]
    fn test_lint_session() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("js")).unwrap();
        fs::write(temp.path().join("js/good.js"), "good").unwrap();
        fs::write(temp.path().join("js/bad.js"), "bad").unwrap();
        fs::write(temp.path().join("js/skip.js"), "bad").unwrap();

        let config = parse_config(
            r#"
[project]
name = "site"

[linting.js]
command = "grep -q good"

[[bundles]]
name = "app"
type = "js"
files = ["js/bad.js", "js/good.js", { path = "js/skip.js", lint = false }]
"#,
        )
        .unwrap();
        let session = BuildSession::new(config, temp.path().to_path_buf()).unwrap();

        for parallel in [false, true] {
            let options = LintOptions::new().with_parallel(parallel);
            let report = lint_session(&session, &options).unwrap();
            assert_eq!(report.files.len(), 2);
            assert!(report.files[0].path.ends_with("bad.js"));
            assert_eq!(report.failed_count(), 1);
        }

        let options = LintOptions::new().with_pattern(Some("good")).unwrap();
        let report = lint_session(&session, &options).unwrap();
        assert_eq!(report.files.len(), 1);
        assert!(report.is_success());
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(matches!(LintOptions::new().with_pattern(Some("(")), Err(LintError::Pattern { .. })));
    }
}
