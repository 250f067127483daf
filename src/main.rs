//! Bundles - Command-line tool for building asset bundles

use std::process::ExitCode;

use bundlepipe::cli;

fn main() -> ExitCode {
    cli::run()
}
