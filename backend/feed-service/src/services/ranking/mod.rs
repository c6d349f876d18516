//! Ranking core.
//!
//! One entry point, two modes. Serve mode runs the full pipeline: recall →
//! network effort → reply-cluster analysis → scoring → filter → thread
//! dedup → diversity → cursored pagination, and records what it served.
//! Batch mode stops after the thread dedup and hands the whole scored pool
//! to the semantic pipeline: no diversity, no pagination, no seen fatigue,
//! no served-log side effects.

pub mod context;
pub mod cursor;
pub mod diversity;
pub mod filter;
pub mod network;
pub mod recall;
pub mod replies;
pub mod scoring;

use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use feed_core::clients::AppViewClient;
use feed_core::db::fatigue_repo::FatigueRepo;
use feed_core::db::graph_repo::GraphRepo;
use feed_core::db::keyword_repo::KeywordRepo;
use feed_core::db::post_repo::PostRepo;
use feed_core::db::serving_repo::ServingRepo;
use feed_core::db::taste_repo::TasteRepo;
use feed_core::fatigue::FatigueEngine;
use feed_core::models::Post;

use crate::error::Result;
use crate::metrics;

pub use context::{RankContext, RankMode, Tier};
pub use cursor::Cursor;
pub use network::NetworkEffort;
pub use replies::ThreadStats;

/// Hard ceiling on any page size.
pub const MAX_PAGE_LIMIT: usize = 100;

#[derive(Debug, Clone)]
pub struct RankParams {
    pub limit: usize,
    pub cursor: Option<Cursor>,
}

impl Default for RankParams {
    fn default() -> Self {
        Self {
            limit: 50,
            cursor: None,
        }
    }
}

/// Named, additive score components kept alongside the final score for
/// tests and debugging.
#[derive(Debug, Clone, Default)]
pub struct Signals {
    entries: Vec<(&'static str, f64)>,
}

impl Signals {
    pub fn add(&mut self, name: &'static str, value: f64) {
        if value != 0.0 {
            self.entries.push((name, value));
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| *v)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(&'static str, f64)> {
        self.entries.iter()
    }
}

#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub post: Post,
    pub score: f64,
    pub signals: Signals,
    /// Repost record URI when the candidate reached the pool through an
    /// L1 follower's repost.
    pub repost_uri: Option<String>,
    pub repost_from_l1: bool,
}

impl ScoredCandidate {
    pub fn indexed_at_ms(&self) -> i64 {
        self.post.indexed_at.timestamp_millis()
    }
}

/// A serve-mode page.
#[derive(Debug, Clone)]
pub struct RankPage {
    pub items: Vec<ScoredCandidate>,
    pub cursor: Option<String>,
}

#[derive(Clone)]
pub struct Ranker {
    post_repo: PostRepo,
    graph_repo: GraphRepo,
    taste_repo: TasteRepo,
    fatigue_repo: FatigueRepo,
    keyword_repo: KeywordRepo,
    serving_repo: ServingRepo,
    fatigue_engine: FatigueEngine,
    appview: AppViewClient,
}

impl Ranker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        post_repo: PostRepo,
        graph_repo: GraphRepo,
        taste_repo: TasteRepo,
        fatigue_repo: FatigueRepo,
        keyword_repo: KeywordRepo,
        serving_repo: ServingRepo,
        fatigue_engine: FatigueEngine,
        appview: AppViewClient,
    ) -> Self {
        Self {
            post_repo,
            graph_repo,
            taste_repo,
            fatigue_repo,
            keyword_repo,
            serving_repo,
            fatigue_engine,
            appview,
        }
    }

    /// Serve a cursored page and record the side effects (served log,
    /// author fatigue).
    pub async fn rank_serve(&self, user_did: &str, params: RankParams) -> Result<RankPage> {
        let started = Instant::now();
        let pool = self.build_pool(user_did, RankMode::Serve).await?;

        let mut sorted = pool;
        cursor::sort_by_key(&mut sorted);
        if let Some(ref cursor) = params.cursor {
            sorted.retain(|c| cursor.is_strictly_after(c.score, c.indexed_at_ms(), &c.post.uri));
        }

        let diversified = diversity::diversify(sorted);
        let limit = params.limit.min(MAX_PAGE_LIMIT).max(1);
        let items: Vec<ScoredCandidate> = diversified.into_iter().take(limit).collect();
        let next_cursor = cursor::page_cursor(&items);

        self.record_serve_effects(user_did, &items).await;
        metrics::observe_rank_duration("serve", started.elapsed());
        metrics::record_served("pipeline", items.len() as u64);

        info!(
            user = user_did,
            returned = items.len(),
            duration_ms = started.elapsed().as_millis(),
            "Serve rank complete"
        );
        Ok(RankPage {
            items,
            cursor: next_cursor,
        })
    }

    /// Serve-mode pool without pagination, diversity, or side effects;
    /// serve-time fusion drives those itself.
    pub async fn live_pool(&self, user_did: &str) -> Result<Vec<ScoredCandidate>> {
        let mut pool = self.build_pool(user_did, RankMode::Serve).await?;
        cursor::sort_by_key(&mut pool);
        Ok(pool)
    }

    /// The full post-dedup pool, key-sorted, for the semantic pipeline.
    pub async fn rank_batch(&self, user_did: &str) -> Result<Vec<ScoredCandidate>> {
        let started = Instant::now();
        let mut pool = self.build_pool(user_did, RankMode::Batch).await?;
        cursor::sort_by_key(&mut pool);
        metrics::observe_rank_duration("batch", started.elapsed());
        Ok(pool)
    }

    /// Recall through thread dedup, shared by both modes.
    async fn build_pool(&self, user_did: &str, mode: RankMode) -> Result<Vec<ScoredCandidate>> {
        let ctx = context::load_context(
            user_did,
            mode,
            &self.graph_repo,
            &self.taste_repo,
            &self.fatigue_repo,
            &self.keyword_repo,
            &self.serving_repo,
            &self.post_repo,
        )
        .await?;

        let candidates = recall::recall_candidates(&ctx, &self.post_repo).await?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let effort = network::network_effort(
            &ctx,
            &candidates,
            &self.graph_repo,
            &self.appview,
        )
        .await?;

        let threads = self.analyze_threads(&ctx, &candidates).await?;
        let parent_times = parent_timestamps(&candidates, &threads.1);

        let scored: Vec<ScoredCandidate> = candidates
            .iter()
            .map(|post| scoring::score_candidate(&ctx, post, effort.get(&post.uri), &threads.0, &parent_times))
            .collect();

        let filtered = filter::apply_filters(&ctx, scored, &threads.0);
        let deduped = filter::dedup_threads(&ctx, filtered, &threads.0);
        Ok(deduped)
    }

    /// Reply-cluster analysis over the candidates' thread roots. Returns
    /// (stats per root, every fetched thread post) so scoring can resolve
    /// parent ages from the same fetch.
    async fn analyze_threads(
        &self,
        ctx: &RankContext,
        candidates: &[Post],
    ) -> Result<(HashMap<String, ThreadStats>, Vec<Post>)> {
        let roots = replies::candidate_roots(candidates);
        let thread_posts = if roots.is_empty() {
            Vec::new()
        } else {
            match self.post_repo.thread_replies(&roots).await {
                Ok(posts) => posts,
                Err(e) => {
                    warn!(error = %e, "Thread fetch failed, skipping reply analysis");
                    Vec::new()
                }
            }
        };
        let stats = replies::analyze_threads(ctx, &roots, candidates, &thread_posts);
        Ok((stats, thread_posts))
    }

    async fn record_serve_effects(&self, user_did: &str, items: &[ScoredCandidate]) {
        if items.is_empty() {
            return;
        }
        let uris: Vec<String> = items.iter().map(|c| c.post.uri.clone()).collect();
        if let Err(e) = self.serving_repo.record_served(user_did, &uris).await {
            warn!(user = user_did, error = %e, "Served-log write failed");
        }

        let mut seen_authors = std::collections::HashSet::new();
        for item in items {
            if seen_authors.insert(item.post.author.clone()) {
                if let Err(e) = self
                    .fatigue_engine
                    .on_serve(user_did, &item.post.author)
                    .await
                {
                    warn!(user = user_did, error = %e, "Fatigue-on-serve failed");
                }
            }
        }
    }
}

/// indexed_at per URI for every post we can see this request, so the
/// old-parent penalty can resolve reply parents without extra queries.
fn parent_timestamps(
    candidates: &[Post],
    thread_posts: &[Post],
) -> HashMap<String, DateTime<Utc>> {
    candidates
        .iter()
        .chain(thread_posts.iter())
        .map(|p| (p.uri.clone(), p.indexed_at))
        .collect()
}
