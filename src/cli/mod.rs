//! Command-line interface implementation
//!
//! This module provides the CLI entry point and dispatches to submodules
//! for specific command implementations.

mod build;
mod clean;
mod lint;
mod manifests;

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use crate::build::BuildSession;
use crate::config::load_config;

/// Exit codes
pub(crate) const EXIT_SUCCESS: u8 = 0;
pub(crate) const EXIT_ERROR: u8 = 1;
pub(crate) const EXIT_INVALID_ARGS: u8 = 2;

/// Bundles - build, lint and watch streamed asset bundles
#[derive(Parser)]
#[command(name = "bundles")]
#[command(about = "Build content-addressed asset bundles from bundles.toml")]
#[command(version)]
pub struct Cli {
    /// Path to bundles.toml (default: search upwards from the current directory)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build every bundle and single file
    Build {
        /// Publish under the fixed "dev" version instead of a content digest
        #[arg(long)]
        dev: bool,

        /// Build bundles on a worker pool
        #[arg(short, long)]
        parallel: bool,

        /// Number of workers for --parallel (default: available cores)
        #[arg(short, long, value_name = "N", value_parser = clap::value_parser!(u16).range(1..))]
        jobs: Option<u16>,

        /// Stop scheduling bundles after the first failure
        #[arg(long)]
        fail_fast: bool,

        /// Watch for changes after building
        #[arg(short, long)]
        watch: bool,
    },

    /// Run the configured lint command over every lintable file
    Lint {
        /// Only lint files whose path matches this regular expression
        #[arg(long, value_name = "REGEX")]
        pattern: Option<String>,

        /// Only print failing files
        #[arg(long)]
        failures_only: bool,

        /// Lint files in parallel
        #[arg(short, long)]
        parallel: bool,
    },

    /// Remove published bundles, source maps, the version file and single-file outputs
    Clean,

    /// Write a `<bundle>.manifest` file listing each bundle's input files
    Manifests {
        /// Directory the manifests are written to
        target_directory: PathBuf,
    },

    /// Precompile and lint files as they change
    Watch,
}

/// Run the CLI application
pub fn run() -> ExitCode {
    let cli = Cli::parse();
    crate::logging::init(cli.verbose);

    let config = cli.config.as_deref();
    let verbose = cli.verbose;

    match cli.command {
        Commands::Build { dev, parallel, jobs, fail_fast, watch } => {
            let options = build::BuildOptions {
                dev,
                parallel: parallel || jobs.is_some(),
                jobs: jobs.map(usize::from),
                fail_fast,
                watch,
            };
            build::run_build(config, verbose, &options)
        }
        Commands::Lint { pattern, failures_only, parallel } => {
            lint::run_lint(config, verbose, pattern.as_deref(), failures_only, parallel)
        }
        Commands::Clean => clean::run_clean(config, verbose),
        Commands::Manifests { target_directory } => manifests::run_manifests(config, verbose, &target_directory),
        Commands::Watch => build::run_watch(config, verbose),
    }
}

/// Load the configuration and open a build session for it.
///
/// The project root is the directory holding `bundles.toml`, or the current
/// directory when none was found. Errors are printed and turned into the
/// exit code to return.
pub(crate) fn open_session(config: Option<&Path>, verbose: bool) -> Result<BuildSession, ExitCode> {
    let (config, config_path) = match load_config(config) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            return Err(ExitCode::from(EXIT_ERROR));
        }
    };

    let project_root = match &config_path {
        Some(path) => {
            if verbose {
                println!("Using config: {}", path.display());
            }
            path.parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| std::env::current_dir().unwrap_or_default())
        }
        None => {
            if verbose {
                println!("No bundles.toml found, using defaults");
            }
            std::env::current_dir().unwrap_or_default()
        }
    };

    match BuildSession::new(config, project_root) {
        Ok(session) => Ok(session),
        Err(e) => {
            eprintln!("Error loading version file: {}", e);
            Err(ExitCode::from(EXIT_ERROR))
        }
    }
}
