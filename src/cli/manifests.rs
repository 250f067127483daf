//! Manifests command implementation

use std::path::Path;
use std::process::ExitCode;

use super::{open_session, EXIT_ERROR, EXIT_SUCCESS};
use crate::build::write_manifests;

/// Run the manifests command
pub fn run_manifests(config: Option<&Path>, verbose: bool, target_directory: &Path) -> ExitCode {
    let session = match open_session(config, verbose) {
        Ok(session) => session,
        Err(code) => return code,
    };

    let mut failed = false;
    for error in session.bundles().errors() {
        eprintln!("Error: {}", error);
        failed = true;
    }

    match write_manifests(session.bundles(), target_directory) {
        Ok(written) => {
            for path in written {
                println!("Wrote {}", path.display());
            }
        }
        Err(e) => {
            eprintln!("Error writing manifests to {}: {}", target_directory.display(), e);
            return ExitCode::from(EXIT_ERROR);
        }
    }

    if failed {
        ExitCode::from(EXIT_ERROR)
    } else {
        ExitCode::from(EXIT_SUCCESS)
    }
}
