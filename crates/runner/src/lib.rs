//! Batch driver for the SPH engine.
//!
//! Loads a JSON [`RunConfig`], builds the dam-break scene, calibrates mass
//! and steps the engine to the configured end time.
//!
//! # Modules
//! - [`config`] -- Run configuration and validation.
//! - [`scene`] -- Dam-break particle layout.
//! - [`kernels`] -- Loading numeric kernel WGSL from disk.
//! - [`runner`] -- Engine construction and the step/report loop.

#![warn(missing_docs)]

pub mod config;
pub mod kernels;
pub mod runner;
pub mod scene;

use std::path::PathBuf;

use thiserror::Error;

pub use config::{RunConfig, SceneConfig};
pub use runner::{build_engine, run, Report, RunSummary};

/// Anything that ends a run.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// A file could not be read.
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration is not valid JSON for a [`RunConfig`].
    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        /// Config file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// The configuration parsed but is inconsistent.
    #[error("invalid run configuration: {0}")]
    Invalid(String),

    /// The engine failed.
    #[error(transparent)]
    Engine(#[from] engine::EngineError),
}
