//! Clean command implementation

use std::path::Path;
use std::process::ExitCode;

use super::{open_session, EXIT_ERROR, EXIT_SUCCESS};
use crate::build::remove_outputs;

/// Run the clean command
pub fn run_clean(config: Option<&Path>, verbose: bool) -> ExitCode {
    let session = match open_session(config, verbose) {
        Ok(session) => session,
        Err(code) => return code,
    };

    let report = remove_outputs(&session);

    if verbose {
        for name in &report.skipped {
            println!("Skipping {}: no recorded version", name);
        }
    }
    for removal in &report.removals {
        match &removal.error {
            None => println!("Removing {}: {}", removal.kind, removal.path.display()),
            Some(e) => eprintln!("Could not remove {} {}: {}", removal.kind, removal.path.display(), e),
        }
    }

    if report.is_success() {
        println!("Done.");
        ExitCode::from(EXIT_SUCCESS)
    } else {
        let failed = report.failed_count();
        eprintln!("{} file{} could not be removed", failed, if failed == 1 { "" } else { "s" });
        ExitCode::from(EXIT_ERROR)
    }
}
