//! Configuration module for the bundle pipeline
//!
//! Provides types and parsing for `bundles.toml` project configuration.

pub mod loader;
pub mod schema;

pub use loader::{
    default_config, find_config, find_config_from, load_config, parse_config, project_root, resolve_path,
    ConfigError, CONFIG_FILENAME,
};
pub use schema::*;
