//! Build command implementations (build, watch)

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use super::{open_session, EXIT_ERROR, EXIT_SUCCESS};
use crate::build::{BuildPipeline, BuildSession, ConsoleProgress, ParallelBuild, ProgressReporter};
use crate::watch::{CancelFlag, WatchEngine};

/// Flags of the build command.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    pub dev: bool,
    pub parallel: bool,
    pub jobs: Option<usize>,
    pub fail_fast: bool,
    pub watch: bool,
}

/// Run the build command
pub fn run_build(config: Option<&Path>, verbose: bool, options: &BuildOptions) -> ExitCode {
    let session = match open_session(config, verbose) {
        Ok(session) => session.with_dev(options.dev),
        Err(code) => return code,
    };

    if options.dev {
        println!("Building with placeholder version \"{}\"", crate::build::DEV_VERSION);
    }

    let reporter: Arc<dyn ProgressReporter> = Arc::new(ConsoleProgress::new().with_verbose(verbose));
    let result = if options.parallel {
        let mut scheduler = ParallelBuild::new(&session).with_fail_fast(options.fail_fast).with_reporter(reporter);
        if let Some(jobs) = options.jobs {
            scheduler = scheduler.with_jobs(jobs);
        }
        if verbose {
            println!("Using {} workers", scheduler.jobs());
        }
        scheduler.run()
    } else {
        BuildPipeline::new(&session).with_fail_fast(options.fail_fast).with_reporter(reporter).build()
    };

    if verbose {
        for output in result.all_outputs() {
            println!("  {}", output.display());
        }
    }

    if options.watch {
        return watch_session(&session);
    }

    if result.is_success() {
        ExitCode::from(EXIT_SUCCESS)
    } else {
        ExitCode::from(EXIT_ERROR)
    }
}

/// Run the watch command
pub fn run_watch(config: Option<&Path>, verbose: bool) -> ExitCode {
    match open_session(config, verbose) {
        Ok(session) => watch_session(&session),
        Err(code) => code,
    }
}

fn watch_session(session: &BuildSession) -> ExitCode {
    let cancel = CancelFlag::new();
    if let Err(e) = cancel.cancel_on_ctrl_c() {
        eprintln!("Watch error: {}", e);
        return ExitCode::from(EXIT_ERROR);
    }

    println!("Starting watch mode...");
    println!("Press Ctrl+C to stop");
    println!();

    let mut engine = WatchEngine::new(session);
    match engine.run(&cancel) {
        Ok(()) => {
            println!("\nStopped watching");
            ExitCode::from(EXIT_SUCCESS)
        }
        Err(e) => {
            eprintln!("Watch error: {}", e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}
