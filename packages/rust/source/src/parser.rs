//! URL list parsers.
//!
//! - Line lists: one URL per line, `#` comments and blank lines skipped.
//! - CSV columns: the values of one 1-based column, blank cells skipped
//!   (the way a spreadsheet column read behaves).

use pagetitles_shared::{PageTitlesError, Result};

/// Which column of a tabular source holds the URLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSpec {
    /// 1-based column number.
    pub column: usize,
    /// Whether the first record is a header to skip.
    pub has_header: bool,
}

impl ColumnSpec {
    pub fn new(column: usize, has_header: bool) -> Result<Self> {
        if column == 0 {
            return Err(PageTitlesError::validation("column numbers start at 1"));
        }
        Ok(Self { column, has_header })
    }
}

/// Parse a plain line list.
pub(crate) fn parse_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect()
}

/// Pull the values of one column out of CSV text.
///
/// Rows too short to have the column are skipped. If the table has data
/// rows but not one of them reaches the column, the column is assumed to
/// be wrong and the source is reported unavailable.
pub(crate) fn parse_csv_column(content: &str, spec: ColumnSpec) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(spec.has_header)
        .flexible(true)
        .from_reader(content.as_bytes());

    let index = spec.column - 1;
    let mut urls = Vec::new();
    let mut rows = 0usize;
    let mut reached = 0usize;

    for (line, record) in reader.records().enumerate() {
        let record = record.map_err(|e| {
            PageTitlesError::source_unavailable(format!("malformed CSV at record {}: {e}", line + 1))
        })?;
        rows += 1;

        let Some(cell) = record.get(index) else {
            continue;
        };
        reached += 1;

        let cell = cell.trim();
        if !cell.is_empty() {
            urls.push(cell.to_string());
        }
    }

    if rows > 0 && reached == 0 {
        return Err(PageTitlesError::source_unavailable(format!(
            "column {} not present in any of {rows} rows",
            spec.column
        )));
    }

    Ok(urls)
}
