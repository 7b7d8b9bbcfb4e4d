//! Application configuration for pagetitles.
//!
//! User config lives at `~/.pagetitles/pagetitles.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PageTitlesError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "pagetitles.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".pagetitles";

/// Upper bound on in-flight requests per run.
pub const MAX_CONCURRENCY: usize = 1024;

// ---------------------------------------------------------------------------
// Config structs (matching pagetitles.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP fetch settings.
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Scheduling of work items.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Output table settings.
    #[serde(default)]
    pub output: OutputConfig,
}

/// `[fetch]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Extra attempts after a transport failure. 0 disables retry.
    #[serde(default)]
    pub retries: u32,

    /// Base backoff between retries, doubled on each attempt.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    /// Maximum redirects to follow per request.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,

    /// Responses declaring a larger `Content-Length` are rejected.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: u64,

    /// Override for the User-Agent header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            retries: 0,
            backoff_ms: default_backoff_ms(),
            max_redirects: default_max_redirects(),
            max_body_bytes: default_max_body_bytes(),
            user_agent: None,
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_backoff_ms() -> u64 {
    500
}
fn default_max_redirects() -> usize {
    5
}
fn default_max_body_bytes() -> u64 {
    10 * 1024 * 1024
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum in-flight requests. 1 is strictly sequential.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Emit rows in input order even when fetching concurrently.
    #[serde(default = "default_true")]
    pub preserve_order: bool,

    /// Whole-run deadline in seconds; unfinished items are recorded as failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_secs: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            preserve_order: true,
            deadline_secs: None,
        }
    }
}

fn default_concurrency() -> usize {
    1
}
fn default_true() -> bool {
    true
}

/// What to put in the Title column of a failure row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureTitles {
    /// `#ERROR <kind>: <detail>`.
    #[default]
    Marker,
    /// Leave the Title column blank.
    Empty,
}

/// `[output]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Default output table path.
    #[serde(default = "default_output_path")]
    pub path: String,

    /// Failure-row rendering.
    #[serde(default)]
    pub failure_titles: FailureTitles,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: default_output_path(),
            failure_titles: FailureTitles::default(),
        }
    }
}

fn default_output_path() -> String {
    "output.csv".into()
}

// ---------------------------------------------------------------------------
// Run config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime pipeline configuration, merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// HTTP fetch settings.
    pub fetch: FetchConfig,
    /// Maximum in-flight requests.
    pub concurrency: usize,
    /// Emit rows in input order.
    pub preserve_order: bool,
    /// Whole-run deadline.
    pub deadline: Option<Duration>,
    /// Failure-row rendering.
    pub failure_titles: FailureTitles,
}

impl From<&AppConfig> for RunConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            fetch: config.fetch.clone(),
            concurrency: config.pipeline.concurrency,
            preserve_order: config.pipeline.preserve_order,
            deadline: config.pipeline.deadline_secs.map(Duration::from_secs),
            failure_titles: config.output.failure_titles,
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl RunConfig {
    /// Reject settings that would make a run hang or do nothing.
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(PageTitlesError::config("concurrency must be at least 1"));
        }
        if self.concurrency > MAX_CONCURRENCY {
            return Err(PageTitlesError::config(format!(
                "concurrency must be at most {MAX_CONCURRENCY}, got {}",
                self.concurrency
            )));
        }
        if self.fetch.timeout_secs == 0 {
            return Err(PageTitlesError::config("timeout_secs must be at least 1"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.pagetitles/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| PageTitlesError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.pagetitles/pagetitles.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| PageTitlesError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        PageTitlesError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| PageTitlesError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| PageTitlesError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| PageTitlesError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
