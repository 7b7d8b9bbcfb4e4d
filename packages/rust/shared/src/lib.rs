//! Shared types, error model, and configuration for pagetitles.
//!
//! This crate is the foundation depended on by all other pagetitles crates.
//! It provides:
//! - [`PageTitlesError`]: the unified error type
//! - Domain types ([`WorkItem`], [`Outcome`], [`FetchResult`], [`OutputRow`])
//! - Configuration ([`AppConfig`], [`RunConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, FailureTitles, FetchConfig, OutputConfig, PipelineConfig, RunConfig, config_dir,
    config_file_path, init_config, load_config, load_config_from,
};
pub use error::{PageTitlesError, Result};
pub use types::{
    FailureKind, FetchResult, OUTPUT_HEADER, Outcome, OutputRow, WorkItem, format_timestamp,
};
