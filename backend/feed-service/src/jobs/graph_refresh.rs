//! Periodic follow-graph rebuild for every whitelisted user.
//!
//! The per-user debounce lives in the graph service (24 h meta stamp), so
//! this loop can run hourly without re-fetching anything.

use std::time::Duration;

use feed_core::graph::GraphService;
use tracing::{info, warn};

const CHECK_INTERVAL: Duration = Duration::from_secs(60 * 60);

pub async fn run_graph_refresh(graph: GraphService, users: Vec<String>) {
    info!(users = users.len(), "Graph refresh job started");
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        for user in &users {
            if let Err(e) = graph.build_user_graph(user).await {
                warn!(user = %user, error = %e, "Graph rebuild failed");
            }
        }
    }
}
