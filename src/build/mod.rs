//! Build pipeline module for bundlepipe
//!
//! Turns the bundle definitions of `bundles.toml` into published,
//! content-addressed artifacts.
//!
//! # Overview
//!
//! The build pipeline consists of:
//! - **Resolution**: Expand file patterns and resolve processor references
//! - **Execution**: Stream each bundle through its pre chains, concatenation
//!   and post chain into the publisher
//! - **Recording**: Store each bundle's version in the version file
//!
//! # Example
//!
//! ```ignore
//! use bundlepipe::build::{BuildPipeline, BuildSession};
//! use bundlepipe::config::load_config;
//!
//! let (config, path) = load_config(None)?;
//! let session = BuildSession::new(config, project_root)?;
//! let result = BuildPipeline::new(&session).build();
//! println!("{}", result.summary());
//! ```

pub mod bundle;
pub mod clean;
pub mod context;
pub mod discovery;
pub mod lint;
pub mod manifests;
pub mod parallel;
pub mod pipeline;
pub mod progress;
pub mod publish;
pub mod registry;
pub mod result;
pub mod sourcemap;

pub use bundle::*;
pub use clean::*;
pub use context::*;
pub use discovery::*;
pub use lint::*;
pub use manifests::*;
pub use parallel::*;
pub use pipeline::*;
pub use progress::*;
pub use publish::*;
pub use registry::*;
pub use result::*;
pub use sourcemap::*;
