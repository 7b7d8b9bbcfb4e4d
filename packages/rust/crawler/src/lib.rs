//! Page fetching and title extraction.
//!
//! This crate provides:
//! - [`fetcher`]: shared HTTP client with timeout and bounded retry
//! - [`extract`]: first-`title`-element extraction over parsed HTML

pub mod extract;
pub mod fetcher;

pub use extract::{extract_title, first_title};
pub use fetcher::{FetchedPage, Fetcher};
