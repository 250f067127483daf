//! Bundlepipe - Library for building streamed, content-addressed asset bundles
//!
//! This library provides functionality to:
//! - Load bundle definitions from `bundles.toml`
//! - Stream files through chains of external commands without deadlocking
//! - Publish bundles atomically under a digest of their contents
//! - Watch source files and recheck them incrementally

pub mod build;
pub mod cli;
pub mod config;
pub mod logging;
pub mod pipeline;
pub mod process;
pub mod processor;
pub mod stream;
pub mod watch;
