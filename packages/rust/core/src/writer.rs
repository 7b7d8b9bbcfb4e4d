//! The single writer that owns the result sink during a run.

use std::collections::BTreeMap;

use chrono::Utc;
use tracing::warn;

use pagetitles_shared::{FailureKind, FailureTitles, FetchResult, Outcome, OutputRow, Result};
use pagetitles_storage::ResultSink;

use crate::pipeline::ProgressReporter;

/// Per-kind counts of recorded rows.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Tally {
    pub succeeded: usize,
    pub fetch_errors: usize,
    pub parse_errors: usize,
    pub abandoned: usize,
}

impl Tally {
    fn add(&mut self, result: &FetchResult) {
        match result.failure_kind() {
            None => self.succeeded += 1,
            Some(FailureKind::Fetch) => self.fetch_errors += 1,
            Some(FailureKind::Parse) => self.parse_errors += 1,
            Some(FailureKind::DeadlineExceeded) => self.abandoned += 1,
        }
    }

    pub fn recorded(&self) -> usize {
        self.succeeded + self.fetch_errors + self.parse_errors + self.abandoned
    }
}

/// Turns worker outcomes into rows, one per input slot.
///
/// Slots are positions in the input list. Each slot is recorded exactly
/// once; with `preserve_order` the writer holds early outcomes back until
/// every slot before them has been written.
pub(crate) struct RowWriter<'a, S: ResultSink + ?Sized> {
    sink: &'a mut S,
    progress: &'a dyn ProgressReporter,
    policy: FailureTitles,
    preserve_order: bool,
    /// URL per slot; taken when the slot is recorded.
    urls: Vec<Option<String>>,
    buffer: BTreeMap<usize, Outcome>,
    next_slot: usize,
    tally: Tally,
}

impl<'a, S: ResultSink + ?Sized> RowWriter<'a, S> {
    pub fn new(
        sink: &'a mut S,
        progress: &'a dyn ProgressReporter,
        urls: Vec<String>,
        policy: FailureTitles,
        preserve_order: bool,
    ) -> Self {
        Self {
            sink,
            progress,
            policy,
            preserve_order,
            urls: urls.into_iter().map(Some).collect(),
            buffer: BTreeMap::new(),
            next_slot: 0,
            tally: Tally::default(),
        }
    }

    /// Take one worker outcome. Errors only if the sink fails.
    pub fn accept(&mut self, slot: usize, outcome: Outcome) -> Result<()> {
        if !self.preserve_order {
            return self.record(slot, outcome);
        }

        self.buffer.insert(slot, outcome);
        while let Some(outcome) = self.buffer.remove(&self.next_slot) {
            self.record(self.next_slot, outcome)?;
            self.next_slot += 1;
        }
        Ok(())
    }

    /// Record every slot that never reported, then finish the sink.
    pub fn close(mut self) -> Result<Tally> {
        let first = if self.preserve_order { self.next_slot } else { 0 };

        for slot in first..self.urls.len() {
            if self.urls[slot].is_none() {
                continue;
            }
            let outcome = self.buffer.remove(&slot).unwrap_or_else(|| Outcome::Failed {
                kind: FailureKind::Fetch,
                detail: "worker stopped before reporting a result".into(),
            });
            self.record(slot, outcome)?;
        }

        self.sink.finish()?;
        Ok(self.tally)
    }

    fn record(&mut self, slot: usize, outcome: Outcome) -> Result<()> {
        let Some(url) = self.urls.get_mut(slot).and_then(Option::take) else {
            warn!(slot, "outcome for unknown or already recorded slot, ignoring");
            return Ok(());
        };

        let result = FetchResult::stamp(url, outcome, Utc::now());
        self.sink.append(&OutputRow::from_result(&result, self.policy))?;
        self.tally.add(&result);

        self.progress
            .item_recorded(&result, self.tally.recorded(), self.urls.len());
        Ok(())
    }
}
