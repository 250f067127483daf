//! Lint command implementation

use std::io::{self, Write};
use std::path::Path;
use std::process::ExitCode;

use super::{open_session, EXIT_ERROR, EXIT_INVALID_ARGS, EXIT_SUCCESS};
use crate::build::{lint_session, LintOptions};

/// Run the lint command
pub fn run_lint(
    config: Option<&Path>,
    verbose: bool,
    pattern: Option<&str>,
    failures_only: bool,
    parallel: bool,
) -> ExitCode {
    let options = match LintOptions::new().with_pattern(pattern) {
        Ok(options) => options.with_failures_only(failures_only).with_parallel(parallel),
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(EXIT_INVALID_ARGS);
        }
    };

    let session = match open_session(config, verbose) {
        Ok(session) => session,
        Err(code) => return code,
    };

    let report = match lint_session(&session, &options) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(EXIT_ERROR);
        }
    };

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if let Err(e) = report.write_to(&mut out, options.failures_only).and_then(|()| out.flush()) {
        eprintln!("Error writing report: {}", e);
        return ExitCode::from(EXIT_ERROR);
    }

    if report.is_success() {
        ExitCode::from(EXIT_SUCCESS)
    } else {
        ExitCode::from(EXIT_ERROR)
    }
}
