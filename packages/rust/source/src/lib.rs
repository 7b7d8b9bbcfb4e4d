//! Source adapters: where the list of URLs comes from.
//!
//! Every adapter produces the same thing, an ordered `Vec<WorkItem>`. Any
//! failure to obtain the list is a [`PageTitlesError::SourceUnavailable`],
//! which aborts the run before a single page is fetched.

mod parser;

use std::path::{Path, PathBuf};
use std::time::Duration;

use pagetitles_shared::{FetchConfig, PageTitlesError, Result, WorkItem};
use reqwest::Client;
use tracing::{debug, info, instrument};
use url::Url;

pub use parser::ColumnSpec;

/// User-Agent string for source requests.
const USER_AGENT: &str = concat!("pagetitles/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// UrlSource
// ---------------------------------------------------------------------------

/// A bounded, ordered list of URLs to process.
#[derive(Debug, Clone)]
pub enum UrlSource {
    /// Text file with one URL per line.
    Lines { path: PathBuf },
    /// Local CSV file, one column of which holds URLs.
    Csv { path: PathBuf, column: ColumnSpec },
    /// Spreadsheet exported as CSV over HTTP, downloaded under the same
    /// timeout, redirect, and size limits as page fetches.
    Sheet {
        url: Url,
        column: ColumnSpec,
        limits: FetchConfig,
    },
}

impl UrlSource {
    /// A spreadsheet export downloaded under `limits`.
    pub fn sheet(url: Url, column: ColumnSpec, limits: &FetchConfig) -> Self {
        Self::Sheet {
            url,
            column,
            limits: limits.clone(),
        }
    }

    /// Short label for logs.
    pub fn describe(&self) -> String {
        match self {
            Self::Lines { path } => format!("lines:{}", path.display()),
            Self::Csv { path, column } => format!("csv:{}#{}", path.display(), column.column),
            Self::Sheet { url, column, .. } => format!("sheet:{url}#{}", column.column),
        }
    }

    /// Read the full URL list.
    #[instrument(skip_all, fields(source = %self.describe()))]
    pub async fn load(&self) -> Result<Vec<WorkItem>> {
        let urls = match self {
            Self::Lines { path } => parser::parse_lines(&read_file(path).await?),
            Self::Csv { path, column } => parser::parse_csv_column(&read_file(path).await?, *column)?,
            Self::Sheet {
                url,
                column,
                limits,
            } => {
                let body = fetch_export(url, limits).await?;
                parser::parse_csv_column(&body, *column)?
            }
        };

        info!(count = urls.len(), "url list loaded");
        Ok(WorkItem::enumerate(urls))
    }
}

/// CSV export URL for a Google Sheets document id and tab gid.
pub fn google_sheet_export_url(sheet_id: &str, gid: u64) -> Result<Url> {
    let raw = format!("https://docs.google.com/spreadsheets/d/{sheet_id}/export?format=csv&gid={gid}");
    Url::parse(&raw).map_err(|e| PageTitlesError::validation(format!("invalid sheet id '{sheet_id}': {e}")))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn read_file(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path).await.map_err(|e| {
        PageTitlesError::source_unavailable(format!("cannot read {}: {e}", path.display()))
    })
}

/// Build a reqwest client with appropriate settings.
fn build_client(limits: &FetchConfig) -> Result<Client> {
    Client::builder()
        .user_agent(limits.user_agent.as_deref().unwrap_or(USER_AGENT))
        .redirect(reqwest::redirect::Policy::limited(limits.max_redirects))
        .timeout(Duration::from_secs(limits.timeout_secs))
        .build()
        .map_err(|e| PageTitlesError::Network(format!("failed to build HTTP client: {e}")))
}

/// Download a CSV export, insisting on a successful, non-HTML response.
async fn fetch_export(url: &Url, limits: &FetchConfig) -> Result<String> {
    let client = build_client(limits)?;

    let response = client
        .get(url.as_str())
        .send()
        .await
        .map_err(|e| PageTitlesError::source_unavailable(format!("{url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(PageTitlesError::source_unavailable(format!(
            "{url}: HTTP {status}"
        )));
    }

    // Private sheets redirect to a sign-in page instead of failing.
    let is_html = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("text/html"));
    if is_html {
        return Err(PageTitlesError::source_unavailable(format!(
            "{url}: received HTML instead of CSV (is the sheet shared or published?)"
        )));
    }

    if let Some(len) = response.content_length() {
        if len > limits.max_body_bytes {
            return Err(PageTitlesError::source_unavailable(format!(
                "{url}: export too large ({len} bytes, max {})",
                limits.max_body_bytes
            )));
        }
    }

    let body = response
        .text()
        .await
        .map_err(|e| PageTitlesError::source_unavailable(format!("{url}: failed to read body: {e}")))?;

    debug!(bytes = body.len(), "sheet export downloaded");
    Ok(body)
}
