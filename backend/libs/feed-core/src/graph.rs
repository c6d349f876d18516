//! Social-graph service: builds and caches each tracked user's two-layer
//! follow graph and resolves post likers on demand.

use chrono::{Duration, Utc};
use std::collections::HashSet;
use tracing::{info, warn};

use crate::clients::AppViewClient;
use crate::db::graph_repo::GraphRepo;
use crate::db::meta_repo::MetaRepo;
use crate::error::Result;

/// A user's graph is rebuilt at most once per day.
const GRAPH_REBUILD_INTERVAL_HOURS: i64 = 24;

/// How many of each L1 account's follows make up Layer-2.
const L2_FOLLOWS_PER_L1: u32 = 100;

/// Pause between per-L1 follow fetches to stay under AppView rate limits.
const L2_FETCH_DELAY_MS: u64 = 150;

#[derive(Clone)]
pub struct GraphService {
    graph_repo: GraphRepo,
    meta_repo: MetaRepo,
    appview: AppViewClient,
}

impl GraphService {
    pub fn new(graph_repo: GraphRepo, meta_repo: MetaRepo, appview: AppViewClient) -> Self {
        Self {
            graph_repo,
            meta_repo,
            appview,
        }
    }

    /// Fetch and store the user's Layer-1 and Layer-2 follow graph.
    /// Idempotent: a rebuild within the debounce window is a no-op. Per-L1
    /// fetch failures are logged and skipped, never fatal.
    pub async fn build_user_graph(&self, user_did: &str) -> Result<()> {
        let now = Utc::now();
        if let Some(last) = self.meta_repo.graph_last_update(user_did).await? {
            if now - last < Duration::hours(GRAPH_REBUILD_INTERVAL_HOURS) {
                return Ok(());
            }
        }

        // Layer-1: full pagination.
        let mut l1: Vec<String> = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            match self
                .appview
                .get_follows(user_did, cursor.as_deref(), 100)
                .await
            {
                Ok((page, next)) => {
                    l1.extend(page);
                    match next {
                        Some(c) if !c.is_empty() => cursor = Some(c),
                        _ => break,
                    }
                }
                Err(e) => {
                    warn!(user = user_did, error = %e, "L1 follow fetch failed");
                    break;
                }
            }
        }
        self.graph_repo.insert_follows(user_did, &l1).await?;

        // Layer-2: first page of each L1 account's follows, rate-limited.
        let mut l2_fetched = 0usize;
        for l1_did in &l1 {
            tokio::time::sleep(std::time::Duration::from_millis(L2_FETCH_DELAY_MS)).await;
            match self
                .appview
                .get_follows(l1_did, None, L2_FOLLOWS_PER_L1)
                .await
            {
                Ok((follows, _)) => {
                    l2_fetched += follows.len();
                    self.graph_repo.insert_follows(l1_did, &follows).await?;
                }
                Err(e) => {
                    warn!(l1 = %l1_did, error = %e, "L2 follow fetch failed, skipping");
                }
            }
        }

        self.meta_repo.stamp_graph_update(user_did, now).await?;
        info!(
            user = user_did,
            l1_count = l1.len(),
            l2_count = l2_fetched,
            "User graph rebuilt"
        );
        Ok(())
    }

    /// self ∪ L1 ∪ L2; degenerates to {self} when the user follows no one.
    pub async fn wanted_dids(&self, user_did: &str) -> Result<HashSet<String>> {
        let mut wanted = HashSet::new();
        wanted.insert(user_did.to_string());

        let l1 = self.graph_repo.l1_follows(user_did).await?;
        if l1.is_empty() {
            return Ok(wanted);
        }
        let l2 = self.graph_repo.l2_follows(user_did, &l1).await?;
        wanted.extend(l1);
        wanted.extend(l2);
        Ok(wanted)
    }

    /// DIDs of external actors who liked the post. Failure degrades to
    /// an empty list.
    pub async fn post_likers(&self, uri: &str, limit: u32) -> Vec<String> {
        match self.appview.get_post_likers(uri, limit).await {
            Ok(likers) => likers,
            Err(e) => {
                warn!(uri, error = %e, "Post likers fetch failed");
                Vec::new()
            }
        }
    }
}
