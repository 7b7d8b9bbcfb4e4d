//! Core domain types for a title-extraction run.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::config::FailureTitles;

/// Column header written once at the top of every output table.
pub const OUTPUT_HEADER: [&str; 3] = ["URL", "Title", "Datetime"];

// ---------------------------------------------------------------------------
// WorkItem
// ---------------------------------------------------------------------------

/// One URL to be processed, together with its position in the input list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    /// Zero-based position in the source list.
    pub index: usize,
    /// The URL exactly as the source supplied it (trimmed, non-empty).
    pub url: String,
}

impl WorkItem {
    /// Number a list of URL strings into work items, preserving order.
    pub fn enumerate<I, S>(urls: I) -> Vec<WorkItem>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        urls.into_iter()
            .enumerate()
            .map(|(index, url)| WorkItem {
                index,
                url: url.into(),
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Outcome / FetchResult
// ---------------------------------------------------------------------------

/// Classification of a per-item failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Transport-level failure reaching the URL.
    Fetch,
    /// Response received, but no title element in it.
    Parse,
    /// Abandoned because the run deadline elapsed first.
    DeadlineExceeded,
}

impl FailureKind {
    /// Stable label used in logs and failure rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fetch => "fetch_error",
            Self::Parse => "parse_error",
            Self::DeadlineExceeded => "deadline_exceeded",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a worker learned about one URL, before it is timestamped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The text of the first title element.
    Title(String),
    /// The item failed and will be recorded as a failure row.
    Failed { kind: FailureKind, detail: String },
}

/// Success or failure for one work item, stamped with the time it was recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchResult {
    Success {
        url: String,
        title: String,
        fetched_at: DateTime<Utc>,
    },
    Failure {
        url: String,
        kind: FailureKind,
        detail: String,
        fetched_at: DateTime<Utc>,
    },
}

impl FetchResult {
    /// Attach the URL and a timestamp to a worker outcome.
    pub fn stamp(url: String, outcome: Outcome, fetched_at: DateTime<Utc>) -> Self {
        match outcome {
            Outcome::Title(title) => Self::Success {
                url,
                title,
                fetched_at,
            },
            Outcome::Failed { kind, detail } => Self::Failure {
                url,
                kind,
                detail,
                fetched_at,
            },
        }
    }

    pub fn url(&self) -> &str {
        match self {
            Self::Success { url, .. } | Self::Failure { url, .. } => url,
        }
    }

    /// The failure classification, if this is a failure.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { kind, .. } => Some(*kind),
        }
    }
}

// ---------------------------------------------------------------------------
// OutputRow
// ---------------------------------------------------------------------------

/// The durable `(URL, Title, Datetime)` record written to the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRow {
    pub url: String,
    pub title: String,
    pub datetime: String,
}

impl OutputRow {
    /// Render a fetch result according to the failure-title policy.
    pub fn from_result(result: &FetchResult, policy: FailureTitles) -> Self {
        match result {
            FetchResult::Success {
                url,
                title,
                fetched_at,
            } => Self {
                url: url.clone(),
                title: title.clone(),
                datetime: format_timestamp(fetched_at),
            },
            FetchResult::Failure {
                url,
                kind,
                detail,
                fetched_at,
            } => Self {
                url: url.clone(),
                title: match policy {
                    FailureTitles::Marker => format!("#ERROR {kind}: {detail}"),
                    FailureTitles::Empty => String::new(),
                },
                datetime: format_timestamp(fetched_at),
            },
        }
    }

    /// Fields in column order.
    pub fn fields(&self) -> [&str; 3] {
        [&self.url, &self.title, &self.datetime]
    }
}

/// RFC 3339 in UTC with microseconds, so that rows sort lexically by time.
pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}
