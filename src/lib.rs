//! sehat - Resumable healthcare provider directory crawler
//!
//! Collects structured doctor and hospital records from a healthcare listings
//! site in four resumable phases, reconciling doctor-hospital affiliations
//! discovered on different pages into consistent cross-referenced records.
//!
//! # Architecture
//!
//! - [`config`] - Configuration management and settings
//! - [`classify`] - URL classification and hospital-URL decomposition
//! - [`merge`] - Bidirectional relationship merging
//! - [`models`] - Core data structures and workflow statuses
//! - [`pipeline`] - Phase orchestration and work partitioning
//! - [`source`] - Page fetch/extraction abstraction and HTTP implementation
//! - [`storage`] - SQLite-backed entity store
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use sehat::config::Config;
//! use sehat::pipeline::{Orchestrator, Phase};
//! use sehat::source::http::HttpSessionFactory;
//! use sehat::storage::EntityStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let store = Arc::new(EntityStore::new(&config.database.sqlite_path)?);
//!     let sessions = Arc::new(HttpSessionFactory::new(
//!         config.crawl.base_url.clone(),
//!         config.crawl.user_agent.clone(),
//!         Duration::from_secs(30),
//!     ));
//!     let orchestrator = Orchestrator::new(store, sessions, config.pipeline_options());
//!     let stats = orchestrator.run_phase(Phase::CityDiscovery, None).await?;
//!     println!("{stats}");
//!     Ok(())
//! }
//! ```

pub mod classify;
pub mod commands;
pub mod config;
pub mod error;
pub mod merge;
pub mod models;
pub mod pipeline;
pub mod source;
pub mod storage;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::models::{City, Doctor, Hospital, RunStats};
    pub use crate::pipeline::{Orchestrator, Phase, PipelineOptions};
    pub use crate::storage::EntityStore;
}

// Direct re-exports for convenience
pub use models::{City, Doctor, Hospital, RunStats};
