//! Result sinks: the append-only output table.
//!
//! The [`ResultSink`] trait is the only thing the pipeline knows about where
//! rows go. [`CsvSink`] writes the `URL,Title,Datetime` table to disk and
//! flushes after every row; [`MemorySink`] keeps rows in memory.
//!
//! **Access rules:**
//! - Exactly one writer owns a sink for the whole run.
//! - The header is written once, when the sink is created.
//! - No appends after [`ResultSink::finish`].

use std::fs::File;
use std::path::{Path, PathBuf};

use pagetitles_shared::{OUTPUT_HEADER, OutputRow, PageTitlesError, Result};

/// Append-only destination for output rows.
pub trait ResultSink: Send {
    /// Persist one row. An error here is fatal to the run.
    fn append(&mut self, row: &OutputRow) -> Result<()>;

    /// Make every appended row durable. Called once at the end of a run.
    fn finish(&mut self) -> Result<()>;

    /// Data rows appended so far (header excluded).
    fn rows_written(&self) -> usize;
}

// ---------------------------------------------------------------------------
// CsvSink
// ---------------------------------------------------------------------------

/// CSV file sink.
pub struct CsvSink {
    path: PathBuf,
    writer: csv::Writer<File>,
    rows: usize,
    finished: bool,
}

impl CsvSink {
    /// Create (or truncate) the table at `path` and write its header.
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| sink_error(parent, &e))?;
        }

        let file = File::create(path).map_err(|e| sink_error(path, &e))?;
        let mut writer = csv::WriterBuilder::new()
            .terminator(csv::Terminator::CRLF)
            .from_writer(file);

        writer
            .write_record(OUTPUT_HEADER)
            .and_then(|()| writer.flush().map_err(csv::Error::from))
            .map_err(|e| sink_error(path, &e))?;

        tracing::info!(path = %path.display(), "output table created");

        Ok(Self {
            path: path.to_path_buf(),
            writer,
            rows: 0,
            finished: false,
        })
    }

    fn check_writable(&self) -> Result<()> {
        if self.finished {
            return Err(PageTitlesError::sink_unavailable(format!(
                "{}: sink already finished",
                self.path.display()
            )));
        }
        Ok(())
    }
}

impl ResultSink for CsvSink {
    fn append(&mut self, row: &OutputRow) -> Result<()> {
        self.check_writable()?;
        self.writer
            .write_record(row.fields())
            .and_then(|()| self.writer.flush().map_err(csv::Error::from))
            .map_err(|e| sink_error(&self.path, &e))?;
        self.rows += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.writer.flush().map_err(|e| sink_error(&self.path, &e))?;
        self.writer
            .get_ref()
            .sync_all()
            .map_err(|e| sink_error(&self.path, &e))?;
        self.finished = true;

        tracing::debug!(path = %self.path.display(), rows = self.rows, "output table finished");
        Ok(())
    }

    fn rows_written(&self) -> usize {
        self.rows
    }
}

fn sink_error(path: &Path, err: &dyn std::fmt::Display) -> PageTitlesError {
    PageTitlesError::sink_unavailable(format!("{}: {err}", path.display()))
}

// ---------------------------------------------------------------------------
// MemorySink
// ---------------------------------------------------------------------------

/// In-memory sink, for embedding the pipeline and for tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    rows: Vec<OutputRow>,
    finished: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> &[OutputRow] {
        &self.rows
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl ResultSink for MemorySink {
    fn append(&mut self, row: &OutputRow) -> Result<()> {
        if self.finished {
            return Err(PageTitlesError::sink_unavailable("sink already finished"));
        }
        self.rows.push(row.clone());
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        Ok(())
    }

    fn rows_written(&self) -> usize {
        self.rows.len()
    }
}
