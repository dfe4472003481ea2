use std::sync::Arc;

use anyhow::Result;

use crate::config::Config;
use crate::pipeline::{Orchestrator, Phase};
use crate::source::http::HttpSessionFactory;
use crate::storage::EntityStore;

/// Run one phase, or all four in order when `phase` is absent
pub async fn run(config: Config, phase: Option<u8>, limit: Option<u64>) -> Result<()> {
    let store = Arc::new(EntityStore::new(&config.database.sqlite_path)?);
    let sessions = Arc::new(HttpSessionFactory::new(
        config.crawl.base_url.clone(),
        config.crawl.user_agent.clone(),
        config.request_timeout(),
    ));
    let orchestrator = Orchestrator::new(store, sessions, config.pipeline_options());

    let stats = match phase {
        Some(n) => {
            let phase = Phase::from_number(n)?;
            orchestrator.run_phase(phase, limit).await?
        }
        None => orchestrator.run_all(limit).await?,
    };

    println!("Run complete: {stats}");
    Ok(())
}
