//! Retention GC.
//!
//! Hourly sweep: stale unengaged posts (7 d), served log (6 h), seen log
//! (8 h), expired candidate batches (12 h).

use std::time::Duration as StdDuration;

use chrono::Duration;
use feed_core::db::batch_repo::BatchRepo;
use feed_core::db::post_repo::PostRepo;
use feed_core::db::serving_repo::ServingRepo;
use tracing::{info, warn};

use crate::services::semantic::BATCH_TTL_HOURS;

const SWEEP_INTERVAL: StdDuration = StdDuration::from_secs(60 * 60);

const POST_RETENTION_DAYS: i64 = 7;
const SERVED_RETENTION_HOURS: i64 = 6;
const SEEN_RETENTION_HOURS: i64 = 8;

pub async fn run_gc(post_repo: PostRepo, serving_repo: ServingRepo, batch_repo: BatchRepo) {
    info!("GC job started");
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;

        let posts = match post_repo.gc_stale_posts(Duration::days(POST_RETENTION_DAYS)).await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "Post GC failed");
                0
            }
        };
        let served = match serving_repo.gc_served(Duration::hours(SERVED_RETENTION_HOURS)).await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "Served GC failed");
                0
            }
        };
        let seen = match serving_repo.gc_seen(Duration::hours(SEEN_RETENTION_HOURS)).await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "Seen GC failed");
                0
            }
        };
        let batches = match batch_repo.gc_expired(Duration::hours(BATCH_TTL_HOURS)).await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "Batch GC failed");
                0
            }
        };

        info!(posts, served, seen, batches, "GC sweep complete");
    }
}
