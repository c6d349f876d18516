//! Daily keyword-profile rebuild.

use std::time::Duration;

use feed_core::keywords::KeywordEngine;
use tracing::{info, warn};

const REBUILD_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Initial delay so startup isn't dominated by extractor subprocesses.
const STARTUP_DELAY: Duration = Duration::from_secs(120);

pub async fn run_keyword_refresh(engine: KeywordEngine, users: Vec<String>) {
    info!(users = users.len(), "Keyword refresh job started");
    tokio::time::sleep(STARTUP_DELAY).await;

    let mut interval = tokio::time::interval(REBUILD_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        for user in &users {
            match engine.rebuild_for_user(user).await {
                Ok(count) => info!(user = %user, keywords = count, "Keyword rebuild done"),
                Err(e) => warn!(user = %user, error = %e, "Keyword rebuild failed"),
            }
        }
    }
}
