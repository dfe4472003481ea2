//! Configuration management
//!
//! Settings load from `SEHAT_*` environment variables with working defaults,
//! so a bare `sehat run` collects against the default listing site into
//! `data/sehat.db`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::pipeline::PipelineOptions;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Crawl/pipeline configuration
    pub crawl: CrawlConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Crawl-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlConfig {
    /// Listing site base URL
    pub base_url: String,

    /// Worker pool size
    pub workers: usize,

    /// Request timeout in seconds
    pub request_timeout_secs: u64,

    /// User agent string
    pub user_agent: String,

    /// Consecutive empty listing pages treated as end-of-listing.
    /// Heuristic, not an invariant; raise it on flaky connections.
    pub empty_page_run: u32,

    /// Hard cap on listing pages walked per city
    pub max_pages: u32,

    /// Listing pages fetched per worker per batch during hospital discovery.
    /// Lower values track the empty-page cutoff more tightly at the cost of
    /// more batch round-trips.
    pub pages_per_batch: u32,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database path
    pub sqlite_path: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("SEHAT_BASE_URL")
            .unwrap_or_else(|_| String::from("https://www.marham.pk"));

        let workers = std::env::var("SEHAT_WORKERS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(4);
        if workers == 0 {
            return Err(Error::config("SEHAT_WORKERS must be >= 1"));
        }

        let request_timeout_secs = std::env::var("SEHAT_REQUEST_TIMEOUT")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(30);

        let user_agent = std::env::var("SEHAT_USER_AGENT")
            .unwrap_or_else(|_| format!("sehat/{}", env!("CARGO_PKG_VERSION")));

        let empty_page_run = std::env::var("SEHAT_EMPTY_PAGE_RUN")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(5);
        if empty_page_run == 0 {
            return Err(Error::config("SEHAT_EMPTY_PAGE_RUN must be >= 1"));
        }

        let max_pages = std::env::var("SEHAT_MAX_PAGES")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(500);

        let pages_per_batch = std::env::var("SEHAT_PAGES_PER_BATCH")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(10);
        if pages_per_batch == 0 {
            return Err(Error::config("SEHAT_PAGES_PER_BATCH must be >= 1"));
        }

        let sqlite_path = std::env::var("SEHAT_SQLITE_PATH")
            .unwrap_or_else(|_| String::from("data/sehat.db"))
            .into();

        let level = std::env::var("SEHAT_LOG_LEVEL").unwrap_or_else(|_| String::from("info"));
        let format = std::env::var("SEHAT_LOG_FORMAT").unwrap_or_else(|_| String::from("text"));

        Ok(Self {
            crawl: CrawlConfig {
                base_url,
                workers,
                request_timeout_secs,
                user_agent,
                empty_page_run,
                max_pages,
                pages_per_batch,
            },
            database: DatabaseConfig { sqlite_path },
            logging: LoggingConfig { level, format },
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.crawl.request_timeout_secs)
    }

    /// Orchestrator knobs derived from this configuration
    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            workers: self.crawl.workers,
            empty_page_run: self.crawl.empty_page_run,
            max_pages: self.crawl.max_pages,
            pages_per_batch: self.crawl.pages_per_batch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::from_env().unwrap();
        assert_eq!(config.crawl.empty_page_run, 5);
        assert_eq!(config.crawl.max_pages, 500);
        assert_eq!(config.crawl.pages_per_batch, 10);
        assert!(config.crawl.workers >= 1);
    }

    #[test]
    fn test_pipeline_options_carry_tunables() {
        let config = Config::from_env().unwrap();
        let options = config.pipeline_options();
        assert_eq!(options.empty_page_run, config.crawl.empty_page_run);
        assert_eq!(options.max_pages, config.crawl.max_pages);
        assert_eq!(options.pages_per_batch, config.crawl.pages_per_batch);
    }
}
