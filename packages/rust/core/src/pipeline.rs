//! End-to-end title run: URL list → fetch → extract title → output row.
//!
//! Workers fetch pages concurrently (bounded by a semaphore); a single
//! writer receives their outcomes over a channel and owns the sink, so
//! appends are never interleaved.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, instrument, warn};

use pagetitles_crawler::Fetcher;
use pagetitles_shared::{
    FailureKind, FetchResult, Outcome, PageTitlesError, Result, RunConfig, WorkItem,
};
use pagetitles_source::UrlSource;
use pagetitles_storage::{CsvSink, ResultSink};

use crate::writer::RowWriter;

/// Configuration for the `extract_titles` pipeline.
#[derive(Debug, Clone)]
pub struct TitleJob {
    /// Where the URL list comes from.
    pub source: UrlSource,
    /// Output table path.
    pub output: PathBuf,
    /// Fetch and scheduling settings.
    pub run: RunConfig,
}

/// Result of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Number of input URLs (and of rows written).
    pub total: usize,
    /// Rows with a title.
    pub succeeded: usize,
    /// Transport failures.
    pub fetch_errors: usize,
    /// Pages without a title.
    pub parse_errors: usize,
    /// Items abandoned at the run deadline.
    pub abandoned: usize,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn failed(&self) -> usize {
        self.fetch_errors + self.parse_errors + self.abandoned
    }
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called once the URL list is known.
    fn started(&self, total: usize);
    /// Called after each row is written.
    fn item_recorded(&self, result: &FetchResult, done: usize, total: usize);
    /// Called when the run completes.
    fn done(&self, summary: &RunSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn started(&self, _total: usize) {}
    fn item_recorded(&self, _result: &FetchResult, _done: usize, _total: usize) {}
    fn done(&self, _summary: &RunSummary) {}
}

/// Run the full pipeline against a CSV output file.
///
/// 1. Validate configuration and build the HTTP client
/// 2. Load the URL list (fatal on failure, before the output is touched)
/// 3. Create the output table (fatal on failure)
/// 4. Fetch, extract, and record every URL
#[instrument(skip_all, fields(source = %job.source.describe(), output = %job.output.display()))]
pub async fn extract_titles(job: &TitleJob, progress: &dyn ProgressReporter) -> Result<RunSummary> {
    let pipeline = Pipeline::new(job.run.clone())?;

    progress.phase("Loading URL list");
    let items = job.source.load().await?;

    progress.phase("Creating output table");
    let mut sink = CsvSink::create(&job.output)?;

    progress.phase("Fetching titles");
    pipeline.run(items, &mut sink, progress).await
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// The fetch-extract-record pipeline.
pub struct Pipeline {
    config: RunConfig,
    fetcher: Fetcher,
}

impl Pipeline {
    /// Validate `config` and build the shared fetcher.
    pub fn new(config: RunConfig) -> Result<Self> {
        config.validate()?;
        let fetcher = Fetcher::new(config.fetch.clone())?;
        Ok(Self { config, fetcher })
    }

    /// Process `items`, writing exactly one row per item to `sink`.
    ///
    /// Per-item failures become failure rows. The only error returned is a
    /// sink failure, which stops the run.
    #[instrument(skip_all, fields(items = items.len(), concurrency = self.config.concurrency))]
    pub async fn run<S: ResultSink + ?Sized>(
        &self,
        items: Vec<WorkItem>,
        sink: &mut S,
        progress: &dyn ProgressReporter,
    ) -> Result<RunSummary> {
        let start = Instant::now();
        let total = items.len();
        let deadline = self
            .config
            .deadline
            .map(|d| tokio::time::Instant::now() + d);

        info!(
            total,
            concurrency = self.config.concurrency,
            preserve_order = self.config.preserve_order,
            timeout_secs = self.config.fetch.timeout_secs,
            retries = self.config.fetch.retries,
            "starting run"
        );
        progress.started(total);

        let urls = items.iter().map(|item| item.url.clone()).collect();
        let mut writer = RowWriter::new(
            sink,
            progress,
            urls,
            self.config.failure_titles,
            self.config.preserve_order,
        );

        let (tx, mut rx) = mpsc::channel::<(usize, Outcome)>(self.config.concurrency * 2);
        let dispatcher = tokio::spawn(dispatch(
            items,
            self.fetcher.clone(),
            self.config.concurrency,
            deadline,
            tx,
        ));

        while let Some((slot, outcome)) = rx.recv().await {
            if let Err(e) = writer.accept(slot, outcome) {
                dispatcher.abort();
                return Err(e);
            }
        }

        dispatcher.await.map_err(task_failed)??;
        let tally = writer.close()?;

        let summary = RunSummary {
            total,
            succeeded: tally.succeeded,
            fetch_errors: tally.fetch_errors,
            parse_errors: tally.parse_errors,
            abandoned: tally.abandoned,
            elapsed: start.elapsed(),
        };

        info!(
            total = summary.total,
            succeeded = summary.succeeded,
            fetch_errors = summary.fetch_errors,
            parse_errors = summary.parse_errors,
            abandoned = summary.abandoned,
            duration_ms = summary.elapsed.as_millis() as u64,
            "run completed"
        );
        progress.done(&summary);

        Ok(summary)
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Hand items to workers in input order, at most `concurrency` at a time.
///
/// Every item sends exactly one outcome on `tx`: its fetch result, or a
/// deadline failure if the run deadline passes first. Workers live in a
/// [`JoinSet`] owned by this task, so aborting the dispatcher cancels them
/// too. A worker panic stops dispatch and is returned as an error.
async fn dispatch(
    items: Vec<WorkItem>,
    fetcher: Fetcher,
    concurrency: usize,
    deadline: Option<tokio::time::Instant>,
    tx: mpsc::Sender<(usize, Outcome)>,
) -> Result<()> {
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let mut workers = JoinSet::new();

    for (slot, item) in items.into_iter().enumerate() {
        let permit = match deadline {
            Some(at) => {
                match tokio::time::timeout_at(at, semaphore.clone().acquire_owned()).await {
                    Ok(permit) => permit,
                    Err(_) => {
                        warn!(url = %item.url, "run deadline reached before dispatch");
                        let _ = tx.send((slot, abandoned())).await;
                        continue;
                    }
                }
            }
            None => semaphore.clone().acquire_owned().await,
        };
        let Ok(permit) = permit else {
            break;
        };

        while let Some(joined) = workers.try_join_next() {
            joined.map_err(task_failed)?;
        }

        let fetcher = fetcher.clone();
        let tx = tx.clone();

        workers.spawn(async move {
            let _permit = permit;

            let outcome = match deadline {
                Some(at) if tokio::time::Instant::now() >= at => abandoned(),
                Some(at) => tokio::time::timeout_at(at, fetcher.fetch_title(&item.url))
                    .await
                    .unwrap_or_else(|_| {
                        warn!(url = %item.url, "run deadline reached mid-fetch");
                        abandoned()
                    }),
                None => fetcher.fetch_title(&item.url).await,
            };

            debug!(index = item.index, url = %item.url, "item finished");
            let _ = tx.send((slot, outcome)).await;
        });
    }

    drop(tx);
    while let Some(joined) = workers.join_next().await {
        joined.map_err(task_failed)?;
    }
    Ok(())
}

fn task_failed(err: JoinError) -> PageTitlesError {
    if err.is_panic() {
        PageTitlesError::Task(format!("pipeline task panicked: {err}"))
    } else {
        PageTitlesError::Task(format!("pipeline task cancelled: {err}"))
    }
}

fn abandoned() -> Outcome {
    Outcome::Failed {
        kind: FailureKind::DeadlineExceeded,
        detail: "run deadline exceeded".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use pagetitles_shared::{FailureTitles, OutputRow, PageTitlesError};
    use pagetitles_source::ColumnSpec;
    use pagetitles_storage::MemorySink;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> RunConfig {
        let mut config = RunConfig::default();
        config.fetch.timeout_secs = 2;
        config.fetch.backoff_ms = 10;
        config
    }

    fn temp_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("pt-{tag}-{}", uuid::Uuid::now_v7()))
    }

    fn closed_port_url() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        format!("http://127.0.0.1:{port}/")
    }

    async fn mount_page(server: &MockServer, route: &str, body: &str) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    async fn mount_slow_page(server: &MockServer, route: &str, body: &str, delay: Duration) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(body)
                    .set_delay(delay),
            )
            .mount(server)
            .await;
    }

    /// Server with `/ok` (titled "Hello") and `/missing-title`.
    async fn scenario_server() -> MockServer {
        let server = MockServer::start().await;
        mount_page(&server, "/ok", "<html><head><title>Hello</title></head></html>").await;
        mount_page(&server, "/missing-title", "<html><body><p>no title</p></body></html>").await;
        server
    }

    fn read_csv(path: &Path) -> Vec<Vec<String>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(path)
            .unwrap();
        reader
            .records()
            .map(|r| r.unwrap().iter().map(String::from).collect())
            .collect()
    }

    fn titles(rows: &[OutputRow]) -> Vec<&str> {
        rows.iter().map(|r| r.title.as_str()).collect()
    }

    #[tokio::test]
    async fn mixed_outcomes_scenario() {
        let server = scenario_server().await;
        let items = WorkItem::enumerate([
            format!("{}/ok", server.uri()),
            format!("{}/missing-title", server.uri()),
            "http://nonexistent.invalid/".to_string(),
        ]);

        let pipeline = Pipeline::new(test_config()).unwrap();
        let mut sink = MemorySink::new();
        let summary = pipeline.run(items, &mut sink, &SilentProgress).await.unwrap();

        let rows = sink.rows();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].title, "Hello");
        assert!(rows[1].title.starts_with("#ERROR parse_error"));
        assert!(rows[2].title.starts_with("#ERROR fetch_error"));
        assert_eq!(rows[2].url, "http://nonexistent.invalid/");

        assert_eq!(summary.total, 3);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.parse_errors, 1);
        assert_eq!(summary.fetch_errors, 1);
        assert!(sink.is_finished());
    }

    #[tokio::test]
    async fn sequential_run_keeps_input_order() {
        let server = MockServer::start().await;
        for name in ["a", "b", "c"] {
            mount_page(&server, &format!("/{name}"), &format!("<title>{name}</title>")).await;
        }
        let items = WorkItem::enumerate(["a", "b", "c"].map(|n| format!("{}/{n}", server.uri())));

        let pipeline = Pipeline::new(test_config()).unwrap();
        let mut sink = MemorySink::new();
        pipeline.run(items, &mut sink, &SilentProgress).await.unwrap();

        assert_eq!(titles(sink.rows()), vec!["a", "b", "c"]);

        // One request at a time, issued in input order.
        let requested: Vec<String> = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .map(|r| r.url.path().to_string())
            .collect();
        assert_eq!(requested, vec!["/a", "/b", "/c"]);
    }

    #[tokio::test]
    async fn concurrent_run_preserves_order_by_default() {
        let server = MockServer::start().await;
        mount_slow_page(&server, "/slow", "<title>slow</title>", Duration::from_millis(500)).await;
        mount_page(&server, "/fast1", "<title>fast1</title>").await;
        mount_page(&server, "/fast2", "<title>fast2</title>").await;

        let items = WorkItem::enumerate(
            ["slow", "fast1", "fast2"].map(|n| format!("{}/{n}", server.uri())),
        );

        let mut config = test_config();
        config.concurrency = 3;
        let pipeline = Pipeline::new(config).unwrap();
        let mut sink = MemorySink::new();
        pipeline.run(items, &mut sink, &SilentProgress).await.unwrap();

        assert_eq!(titles(sink.rows()), vec!["slow", "fast1", "fast2"]);
    }

    #[tokio::test]
    async fn concurrent_unordered_run_writes_in_completion_order() {
        let server = MockServer::start().await;
        mount_slow_page(&server, "/slow", "<title>slow</title>", Duration::from_millis(500)).await;
        mount_page(&server, "/fast1", "<title>fast1</title>").await;
        mount_page(&server, "/fast2", "<title>fast2</title>").await;

        let items = WorkItem::enumerate(
            ["slow", "fast1", "fast2"].map(|n| format!("{}/{n}", server.uri())),
        );

        let mut config = test_config();
        config.concurrency = 3;
        config.preserve_order = false;
        let pipeline = Pipeline::new(config).unwrap();
        let mut sink = MemorySink::new();
        let summary = pipeline.run(items, &mut sink, &SilentProgress).await.unwrap();

        let written = titles(sink.rows());
        assert_eq!(written.len(), 3);
        assert_eq!(written[2], "slow");
        assert!(written.contains(&"fast1") && written.contains(&"fast2"));
        assert_eq!(summary.succeeded, 3);
    }

    #[tokio::test]
    async fn every_item_gets_a_row_under_concurrency() {
        let server = scenario_server().await;
        let dead = closed_port_url();
        let urls: Vec<String> = (0..12)
            .map(|i| match i % 3 {
                0 => format!("{}/ok", server.uri()),
                1 => format!("{}/missing-title", server.uri()),
                _ => dead.clone(),
            })
            .collect();

        let mut config = test_config();
        config.concurrency = 4;
        let pipeline = Pipeline::new(config).unwrap();
        let mut sink = MemorySink::new();
        let summary = pipeline
            .run(WorkItem::enumerate(urls.clone()), &mut sink, &SilentProgress)
            .await
            .unwrap();

        let written: Vec<&str> = sink.rows().iter().map(|r| r.url.as_str()).collect();
        assert_eq!(written, urls.iter().map(String::as_str).collect::<Vec<_>>());
        assert_eq!(summary.succeeded, 4);
        assert_eq!(summary.parse_errors, 4);
        assert_eq!(summary.fetch_errors, 4);
    }

    #[tokio::test]
    async fn deadline_abandons_unfinished_items() {
        let server = MockServer::start().await;
        mount_slow_page(&server, "/slow", "<title>slow</title>", Duration::from_secs(3)).await;
        mount_page(&server, "/fast", "<title>fast</title>").await;

        let items = WorkItem::enumerate(["slow", "fast"].map(|n| format!("{}/{n}", server.uri())));

        let mut config = test_config();
        config.fetch.timeout_secs = 10;
        config.deadline = Some(Duration::from_millis(500));
        let pipeline = Pipeline::new(config).unwrap();
        let mut sink = MemorySink::new();
        let summary = pipeline.run(items, &mut sink, &SilentProgress).await.unwrap();

        assert_eq!(sink.rows().len(), 2);
        assert_eq!(summary.abandoned, 2);
        assert!(sink.rows()[0].title.starts_with("#ERROR deadline_exceeded"));
        assert!(summary.elapsed < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn empty_failure_titles_policy() {
        let server = scenario_server().await;
        let items = WorkItem::enumerate([format!("{}/missing-title", server.uri())]);

        let mut config = test_config();
        config.failure_titles = FailureTitles::Empty;
        let pipeline = Pipeline::new(config).unwrap();
        let mut sink = MemorySink::new();
        let summary = pipeline.run(items, &mut sink, &SilentProgress).await.unwrap();

        assert_eq!(sink.rows()[0].title, "");
        assert_eq!(summary.parse_errors, 1);
    }

    #[tokio::test]
    async fn rerun_produces_identical_titles() {
        let server = scenario_server().await;
        let urls = [format!("{}/ok", server.uri()), format!("{}/missing-title", server.uri())];
        let pipeline = Pipeline::new(test_config()).unwrap();

        let mut first = MemorySink::new();
        pipeline
            .run(WorkItem::enumerate(urls.clone()), &mut first, &SilentProgress)
            .await
            .unwrap();
        let mut second = MemorySink::new();
        pipeline
            .run(WorkItem::enumerate(urls), &mut second, &SilentProgress)
            .await
            .unwrap();

        let strip = |rows: &[OutputRow]| -> Vec<(String, String)> {
            rows.iter().map(|r| (r.url.clone(), r.title.clone())).collect()
        };
        assert_eq!(strip(first.rows()), strip(second.rows()));
    }

    #[tokio::test]
    async fn empty_list_finishes_with_no_rows() {
        let pipeline = Pipeline::new(test_config()).unwrap();
        let mut sink = MemorySink::new();
        let summary = pipeline.run(Vec::new(), &mut sink, &SilentProgress).await.unwrap();

        assert_eq!(summary.total, 0);
        assert!(sink.rows().is_empty());
        assert!(sink.is_finished());
    }

    /// Sink that fails on its second append.
    struct BrokenSink {
        appended: usize,
    }

    impl ResultSink for BrokenSink {
        fn append(&mut self, _row: &OutputRow) -> Result<()> {
            self.appended += 1;
            if self.appended >= 2 {
                return Err(PageTitlesError::sink_unavailable("disk full"));
            }
            Ok(())
        }

        fn finish(&mut self) -> Result<()> {
            Ok(())
        }

        fn rows_written(&self) -> usize {
            self.appended
        }
    }

    #[tokio::test]
    async fn sink_failure_stops_the_run() {
        let server = scenario_server().await;
        let items = WorkItem::enumerate([
            format!("{}/ok", server.uri()),
            format!("{}/ok", server.uri()),
            format!("{}/ok", server.uri()),
        ]);

        let pipeline = Pipeline::new(test_config()).unwrap();
        let mut sink = BrokenSink { appended: 0 };
        let err = pipeline
            .run(items, &mut sink, &SilentProgress)
            .await
            .unwrap_err();

        assert!(matches!(err, PageTitlesError::SinkUnavailable { .. }));
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let mut config = test_config();
        config.concurrency = 0;
        assert!(matches!(
            Pipeline::new(config),
            Err(PageTitlesError::Config { .. })
        ));
    }

    #[test]
    fn oversized_concurrency_is_rejected_up_front() {
        let mut config = test_config();
        config.concurrency = 1 << 62;
        assert!(matches!(
            Pipeline::new(config),
            Err(PageTitlesError::Config { .. })
        ));
    }

    #[tokio::test]
    async fn worker_panic_becomes_task_error() {
        let handle = tokio::spawn(async {
            if true {
                panic!("boom");
            }
        });
        let err = handle.await.unwrap_err();
        let err = task_failed(err);
        assert!(matches!(err, PageTitlesError::Task(_)));
        assert!(err.to_string().contains("panicked"));
        assert_eq!(err.failure_kind(), None);
    }

    #[tokio::test]
    async fn sink_failure_cancels_in_flight_workers() {
        let server = MockServer::start().await;
        mount_page(&server, "/ok", "<title>fast</title>").await;
        mount_slow_page(&server, "/slow", "<title>slow</title>", Duration::from_millis(300)).await;

        let mut config = test_config();
        config.concurrency = 4;
        let items = WorkItem::enumerate([
            format!("{}/ok", server.uri()),
            format!("{}/ok", server.uri()),
            format!("{}/slow", server.uri()),
            format!("{}/slow", server.uri()),
        ]);

        let pipeline = Pipeline::new(config).unwrap();
        let mut sink = BrokenSink { appended: 0 };
        let started = Instant::now();
        let err = pipeline
            .run(items, &mut sink, &SilentProgress)
            .await
            .unwrap_err();

        assert!(matches!(err, PageTitlesError::SinkUnavailable { .. }));
        assert!(started.elapsed() < Duration::from_millis(300));
        assert_eq!(sink.appended, 2);
    }

    /// Counts progress callbacks.
    #[derive(Default)]
    struct CountingProgress {
        phases: AtomicUsize,
        recorded: AtomicUsize,
        done: AtomicUsize,
    }

    impl ProgressReporter for CountingProgress {
        fn phase(&self, _name: &str) {
            self.phases.fetch_add(1, Ordering::SeqCst);
        }
        fn started(&self, _total: usize) {}
        fn item_recorded(&self, _result: &FetchResult, _done: usize, _total: usize) {
            self.recorded.fetch_add(1, Ordering::SeqCst);
        }
        fn done(&self, _summary: &RunSummary) {
            self.done.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn extract_titles_writes_csv_table() {
        let server = scenario_server().await;
        let dir = temp_dir("e2e");
        std::fs::create_dir_all(&dir).unwrap();

        let list = dir.join("urls.txt");
        std::fs::write(
            &list,
            format!(
                "{0}/ok\n{0}/missing-title\n{1}\n",
                server.uri(),
                closed_port_url()
            ),
        )
        .unwrap();

        let job = TitleJob {
            source: UrlSource::Lines { path: list },
            output: dir.join("out").join("output.csv"),
            run: test_config(),
        };
        let progress = CountingProgress::default();
        let summary = extract_titles(&job, &progress).await.unwrap();

        let records = read_csv(&job.output);
        assert_eq!(records.len(), 4);
        assert_eq!(records[0], vec!["URL", "Title", "Datetime"]);
        assert_eq!(records[1][1], "Hello");
        assert!(records[2][1].starts_with("#ERROR parse_error"));
        assert!(records[3][1].starts_with("#ERROR fetch_error"));
        assert!(records[1][2].ends_with('Z'));

        assert_eq!(summary.failed(), 2);
        assert_eq!(progress.phases.load(Ordering::SeqCst), 3);
        assert_eq!(progress.recorded.load(Ordering::SeqCst), 3);
        assert_eq!(progress.done.load(Ordering::SeqCst), 1);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn source_failure_aborts_before_output_is_created() {
        let dir = temp_dir("nosource");
        let job = TitleJob {
            source: UrlSource::Csv {
                path: dir.join("missing.csv"),
                column: ColumnSpec::new(2, true).unwrap(),
            },
            output: dir.join("output.csv"),
            run: test_config(),
        };

        let err = extract_titles(&job, &SilentProgress).await.unwrap_err();
        assert!(matches!(err, PageTitlesError::SourceUnavailable { .. }));
        assert!(!job.output.exists());
    }

    #[tokio::test]
    async fn sink_failure_aborts_before_fetching() {
        let server = scenario_server().await;
        let dir = temp_dir("nosink");
        std::fs::create_dir_all(&dir).unwrap();
        let list = dir.join("urls.txt");
        std::fs::write(&list, format!("{}/ok\n", server.uri())).unwrap();
        let blocker = dir.join("blocker");
        std::fs::write(&blocker, "not a directory").unwrap();

        let job = TitleJob {
            source: UrlSource::Lines { path: list },
            output: blocker.join("output.csv"),
            run: test_config(),
        };

        let err = extract_titles(&job, &SilentProgress).await.unwrap_err();
        assert!(matches!(err, PageTitlesError::SinkUnavailable { .. }));
        assert!(server.received_requests().await.unwrap().is_empty());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
