//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use pagetitles_core::{ProgressReporter, RunSummary, TitleJob};
use pagetitles_shared::{
    AppConfig, FailureTitles, FetchConfig, FetchResult, RunConfig, init_config, load_config,
    load_config_from,
};
use pagetitles_source::{ColumnSpec, UrlSource, google_sheet_export_url};
use tracing::info;
use url::Url;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// pagetitles: record the title of every page in a URL list.
#[derive(Parser)]
#[command(
    name = "pagetitles",
    version,
    about = "Fetch each URL in a list and write its page title to a CSV table.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.pagetitles/pagetitles.toml.
    #[arg(long, global = true, env = "PAGETITLES_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Where the URL list comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum SourceFormat {
    /// Guess from the source argument.
    Auto,
    /// One URL per line.
    Lines,
    /// A column of a local CSV file.
    Csv,
    /// A spreadsheet CSV export (URL or Google Sheets id).
    Sheet,
}

/// Failure-row rendering, as accepted on the command line.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum FailureTitlesArg {
    Marker,
    Empty,
}

impl From<FailureTitlesArg> for FailureTitles {
    fn from(arg: FailureTitlesArg) -> Self {
        match arg {
            FailureTitlesArg::Marker => FailureTitles::Marker,
            FailureTitlesArg::Empty => FailureTitles::Empty,
        }
    }
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Fetch every URL in SOURCE and write the titles table.
    Run(RunArgs),

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Arguments for `pagetitles run`.
#[derive(clap::Args, Debug)]
pub(crate) struct RunArgs {
    /// File path, export URL, or spreadsheet id.
    pub source: String,

    /// How to read SOURCE.
    #[arg(short, long, value_enum, default_value = "auto")]
    pub format: SourceFormat,

    /// 1-based column holding URLs (csv and sheet sources).
    #[arg(short, long, default_value_t = 1)]
    pub column: usize,

    /// Treat the first CSV row as data rather than a header.
    #[arg(long)]
    pub no_header: bool,

    /// Sheet tab id, when SOURCE is a spreadsheet id.
    #[arg(long, default_value_t = 0)]
    pub gid: u64,

    /// Output table path (defaults to the config's output.path).
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Maximum concurrent requests.
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Per-request timeout in seconds.
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Retries for transport failures.
    #[arg(long)]
    pub retries: Option<u32>,

    /// Whole-run deadline in seconds.
    #[arg(long)]
    pub deadline: Option<u64>,

    /// Write rows as they complete instead of in input order.
    #[arg(long)]
    pub unordered: bool,

    /// What to write in the Title column of failed rows.
    #[arg(long, value_enum)]
    pub failure_titles: Option<FailureTitlesArg>,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "pagetitles=info",
        1 => "pagetitles=debug",
        _ => "pagetitles=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };

    match cli.command {
        Command::Run(args) => cmd_run(&config, &args).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(&config).await,
        },
    }
}

async fn cmd_run(config: &AppConfig, args: &RunArgs) -> Result<()> {
    let run = merge_run_config(config, args);
    let source = build_source(args, &run.fetch)?;
    let output = args
        .out
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.output.path));

    info!(
        source = %source.describe(),
        output = %output.display(),
        concurrency = run.concurrency,
        "recording page titles"
    );

    let job = TitleJob {
        source,
        output,
        run,
    };

    let reporter = CliProgress::new();
    let summary = pagetitles_core::extract_titles(&job, &reporter).await?;

    println!();
    println!("  Titles recorded to {}", job.output.display());
    println!("  URLs:      {}", summary.total);
    println!("  Titles:    {}", summary.succeeded);
    println!("  No title:  {}", summary.parse_errors);
    println!("  Unreached: {}", summary.fetch_errors);
    if summary.abandoned > 0 {
        println!("  Abandoned: {}", summary.abandoned);
    }
    println!("  Time:      {:.1}s", summary.elapsed.as_secs_f64());
    println!();

    Ok(())
}

/// CLI flags override config file values.
fn merge_run_config(config: &AppConfig, args: &RunArgs) -> RunConfig {
    let mut run = RunConfig::from(config);

    if let Some(concurrency) = args.concurrency {
        run.concurrency = concurrency;
    }
    if let Some(timeout) = args.timeout {
        run.fetch.timeout_secs = timeout;
    }
    if let Some(retries) = args.retries {
        run.fetch.retries = retries;
    }
    if let Some(deadline) = args.deadline {
        run.deadline = Some(Duration::from_secs(deadline));
    }
    if args.unordered {
        run.preserve_order = false;
    }
    if let Some(policy) = args.failure_titles {
        run.failure_titles = policy.into();
    }

    run
}

/// Resolve the source argument into a [`UrlSource`]. Sheet downloads use
/// the same fetch limits as page requests.
fn build_source(args: &RunArgs, limits: &FetchConfig) -> Result<UrlSource> {
    let column = ColumnSpec::new(args.column, !args.no_header)?;

    let source = match resolve_format(args.format, &args.source) {
        SourceFormat::Lines => UrlSource::Lines {
            path: PathBuf::from(&args.source),
        },
        SourceFormat::Csv => UrlSource::Csv {
            path: PathBuf::from(&args.source),
            column,
        },
        SourceFormat::Sheet | SourceFormat::Auto => {
            let url = if is_remote(&args.source) {
                Url::parse(&args.source)
                    .map_err(|e| eyre!("invalid source URL '{}': {e}", args.source))?
            } else {
                google_sheet_export_url(&args.source, args.gid)?
            };
            UrlSource::sheet(url, column, limits)
        }
    };

    Ok(source)
}

/// Pick a concrete format for `auto`.
fn resolve_format(format: SourceFormat, source: &str) -> SourceFormat {
    if format != SourceFormat::Auto {
        return format;
    }
    if is_remote(source) {
        return SourceFormat::Sheet;
    }
    let is_csv = Path::new(source)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
    if is_csv {
        SourceFormat::Csv
    } else {
        SourceFormat::Lines
    }
}

fn is_remote(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner, then a bar.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            bar.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
        }
        bar.enable_steady_tick(Duration::from_millis(80));
        Self { bar }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.bar.set_message(name.to_string());
    }

    fn started(&self, total: usize) {
        self.bar.set_length(total as u64);
        if let Ok(style) =
            ProgressStyle::with_template("[{elapsed_precise}] {bar:40.cyan} {pos}/{len} {msg}")
        {
            self.bar.set_style(style.progress_chars("=> "));
        }
    }

    fn item_recorded(&self, result: &FetchResult, _done: usize, _total: usize) {
        self.bar.inc(1);
        self.bar.set_message(result.url().to_string());
    }

    fn done(&self, _summary: &RunSummary) {
        self.bar.finish_and_clear();
    }
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}
