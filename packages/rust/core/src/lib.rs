//! Core pipeline orchestration for pagetitles.
//!
//! This crate ties together the URL source, the page fetcher, and the result
//! sink into one run: every input URL produces exactly one output row.

pub mod pipeline;
mod writer;

pub use pipeline::{Pipeline, ProgressReporter, RunSummary, SilentProgress, TitleJob, extract_titles};
