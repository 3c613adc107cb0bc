use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::db::DEFAULT_DB_PATH;

pub const DEFAULT_CONFIG_FILE: &str = "top250.toml";
const ENV_PREFIX: &str = "TOP250";

/// What to do when a page cannot be fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FetchPolicy {
    /// Log the page and carry on with the rest.
    Skip,
    /// Stop scheduling pages and drain what was collected.
    Abort,
}

/// Crawl settings: defaults, then `top250.toml`, then `TOP250_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub base_url: String,
    pub db_path: PathBuf,
    pub page_count: u32,
    pub page_size: u32,
    pub batch_capacity: usize,
    pub concurrency: usize,
    pub on_fetch_error: FetchPolicy,
    pub fetch_retries: u32,
    pub fetch_backoff_ms: u64,
    pub request_timeout_secs: u64,
    pub user_agent: String,
    pub flush_retries: u32,
    pub flush_backoff_ms: u64,
    /// Also schedule pagination links the static range did not cover.
    pub follow_pagination: bool,
    /// Hard cap on scheduled pages. Defaults to `page_count`.
    pub max_pages: Option<u32>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: "https://movie.douban.com/top250".into(),
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            page_count: 10,
            page_size: 25,
            batch_capacity: 100,
            concurrency: 4,
            on_fetch_error: FetchPolicy::Skip,
            fetch_retries: 3,
            fetch_backoff_ms: 1000,
            request_timeout_secs: 20,
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/120.0 Safari/537.36"
                .into(),
            flush_retries: 3,
            flush_backoff_ms: 200,
            follow_pagination: false,
            max_pages: None,
        }
    }
}

impl Settings {
    /// Load from `path` (or `top250.toml` if present) and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let d = Settings::default();
        let file = match path {
            Some(p) => File::from(p).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };
        Config::builder()
            .set_default("base_url", d.base_url)?
            .set_default("db_path", d.db_path.to_string_lossy().into_owned())?
            .set_default("page_count", i64::from(d.page_count))?
            .set_default("page_size", i64::from(d.page_size))?
            .set_default("batch_capacity", d.batch_capacity as i64)?
            .set_default("concurrency", d.concurrency as i64)?
            .set_default("on_fetch_error", "skip")?
            .set_default("fetch_retries", i64::from(d.fetch_retries))?
            .set_default("fetch_backoff_ms", d.fetch_backoff_ms as i64)?
            .set_default("request_timeout_secs", d.request_timeout_secs as i64)?
            .set_default("user_agent", d.user_agent)?
            .set_default("flush_retries", i64::from(d.flush_retries))?
            .set_default("flush_backoff_ms", d.flush_backoff_ms as i64)?
            .set_default("follow_pagination", d.follow_pagination)?
            .add_source(file)
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()
    }

    pub fn max_pages(&self) -> u32 {
        self.max_pages.unwrap_or(self.page_count)
    }
}
