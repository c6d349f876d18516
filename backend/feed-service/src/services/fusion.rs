//! Serve-time fusion.
//!
//! Blends the pre-computed semantic candidate batch with the live pipeline:
//! batch scores decay with batch age, live fatigue and diversity apply at
//! request time, thin batches are backfilled from the live pipeline, and
//! heavy consumption fires a priority regeneration trigger.

use std::collections::{HashMap, HashSet};

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use feed_core::db::batch_repo::BatchRepo;
use feed_core::db::graph_repo::GraphRepo;
use feed_core::db::post_repo::PostRepo;
use feed_core::db::serving_repo::ServingRepo;
use feed_core::fatigue::FatigueEngine;
use feed_core::models::{CandidateBatchRow, InteractionKind};

use crate::error::Result;
use crate::jobs::scheduler::SchedulerHandle;
use crate::metrics;
use crate::services::ranking::diversity::diversify_by;
use crate::services::ranking::{Cursor, Ranker, ScoredCandidate};
use crate::services::semantic::BATCH_TTL_HOURS;

/// Batch-vs-pipeline blend.
const PIPELINE_WEIGHT: f64 = 0.3;
const SEMANTIC_WEIGHT: f64 = 1800.0;

/// Serve-time seen fatigue: much harsher than pipeline scoring.
const SEEN_PENALTY_BASE: f64 = 0.2;
const SEEN_HARD_CUTOFF_COUNT: i64 = 3;
const SEEN_HARD_CUTOFF_SCORE: f64 = -501.0;

/// Fatigue subtraction scale.
const FATIGUE_SCALE: f64 = 1200.0;

/// Below this many fused items the live pipeline backfills.
const THIN_POOL_THRESHOLD: usize = 20;

/// Live backfill scoring.
const LIVE_BASE_CAP: f64 = 1000.0;
const LIVE_RANK_DECAY: f64 = 5.0;

/// Consumption ratio that fires a priority regeneration.
const REGEN_CONSUMPTION_RATIO: f64 = 0.5;

const MAX_LIMIT: usize = 100;

/// One entry in the fused pool.
#[derive(Debug, Clone)]
pub struct FusedItem {
    pub uri: String,
    pub author: String,
    pub score: f64,
    pub indexed_at_ms: i64,
    pub repost_uri: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FeedItem {
    pub uri: String,
    pub repost_uri: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FeedPage {
    pub items: Vec<FeedItem>,
    pub cursor: Option<String>,
}

/// `max(0, 1 − ageHours/12)`: a batch loses all weight by its TTL.
pub fn impact_multiplier(batch_age_hours: f64) -> f64 {
    (1.0 - batch_age_hours / BATCH_TTL_HOURS as f64).max(0.0)
}

/// The fused base score before live adjustments.
pub fn effective_score(pipeline_score: f64, semantic_score: f64, impact: f64) -> f64 {
    PIPELINE_WEIGHT * pipeline_score + SEMANTIC_WEIGHT * semantic_score * impact
}

/// Multiplicative serve-time seen penalty with the hard cutoff.
pub fn apply_seen_penalty(score: f64, seen_count: i64) -> f64 {
    if seen_count >= SEEN_HARD_CUTOFF_COUNT {
        return SEEN_HARD_CUTOFF_SCORE;
    }
    if seen_count > 0 {
        score * SEEN_PENALTY_BASE.powi(seen_count as i32)
    } else {
        score
    }
}

/// Whether consumption of the current batch warrants a regeneration.
pub fn should_regenerate(seen_unique: usize, batch_unique: usize) -> bool {
    batch_unique > 0 && seen_unique as f64 / batch_unique as f64 >= REGEN_CONSUMPTION_RATIO
}

#[derive(Clone)]
pub struct FusionService {
    ranker: Ranker,
    batch_repo: BatchRepo,
    graph_repo: GraphRepo,
    serving_repo: ServingRepo,
    post_repo: PostRepo,
    fatigue_engine: FatigueEngine,
    scheduler: SchedulerHandle,
}

impl FusionService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ranker: Ranker,
        batch_repo: BatchRepo,
        graph_repo: GraphRepo,
        serving_repo: ServingRepo,
        post_repo: PostRepo,
        fatigue_engine: FatigueEngine,
        scheduler: SchedulerHandle,
    ) -> Self {
        Self {
            ranker,
            batch_repo,
            graph_repo,
            serving_repo,
            post_repo,
            fatigue_engine,
            scheduler,
        }
    }

    pub async fn serve(
        &self,
        user_did: &str,
        limit: usize,
        cursor: Option<Cursor>,
    ) -> Result<FeedPage> {
        let limit = limit.min(MAX_LIMIT).max(1);

        // 1. Load the fresh batch, newest generation per URI.
        let rows = self
            .batch_repo
            .load_fresh(user_did, Duration::hours(BATCH_TTL_HOURS))
            .await?;
        let rows = dedup_newest(rows);

        if rows.is_empty() {
            debug!(user = user_did, "No candidate batch, live pipeline fallback");
            return self.serve_live(user_did, limit, cursor).await;
        }

        let l1: HashSet<String> = self.graph_repo.l1_follows(user_did).await?.into_iter().collect();

        // 2–5. Score the batch with live adjustments.
        let mut pool = self.fuse_batch(user_did, &rows).await?;
        let batch_uris: HashSet<String> = rows.iter().map(|r| r.uri.clone()).collect();
        let positive_uris: HashSet<String> = pool
            .iter()
            .filter(|i| i.score > 0.0)
            .map(|i| i.uri.clone())
            .collect();

        // 6. Sort and diversify.
        pool.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.indexed_at_ms.cmp(&a.indexed_at_ms))
                .then(a.uri.cmp(&b.uri))
        });
        let mut pool = diversify_by(pool, |item: &FusedItem| item.author.as_str());

        // 7. Thin pool: intersplice the live pipeline.
        if pool.len() < THIN_POOL_THRESHOLD {
            let floor = pool.iter().map(|i| i.score).fold(f64::INFINITY, f64::min);
            let base = if floor.is_finite() {
                (floor - 1.0).min(LIVE_BASE_CAP)
            } else {
                LIVE_BASE_CAP
            };
            match self.ranker.live_pool(user_did).await {
                Ok(live) => {
                    let mut rank = 0usize;
                    for candidate in live {
                        if positive_uris.contains(&candidate.post.uri) {
                            continue;
                        }
                        pool.push(live_item(&candidate, base - LIVE_RANK_DECAY * rank as f64, &l1));
                        rank += 1;
                    }
                }
                Err(e) => warn!(user = user_did, error = %e, "Live backfill failed"),
            }
        }

        // 8. Cursor and page.
        if let Some(ref cursor) = cursor {
            pool.retain(|i| cursor.is_strictly_after(i.score, i.indexed_at_ms, &i.uri));
        }
        let page: Vec<FusedItem> = pool.into_iter().take(limit).collect();
        let next_cursor = page.last().map(|last| {
            Cursor {
                score: last.score,
                indexed_at_ms: last.indexed_at_ms,
                uri: last.uri.clone(),
            }
            .encode()
        });

        // 9. Async side effects.
        self.spawn_serve_effects(user_did, &page);
        metrics::record_served("fusion", page.len() as u64);

        // 10. Consumption-based regeneration.
        let seen_uris: HashSet<String> = self
            .serving_repo
            .seen_uris(user_did)
            .await?
            .into_iter()
            .collect();
        let seen_batch = batch_uris.intersection(&seen_uris).count();
        if should_regenerate(seen_batch, batch_uris.len()) {
            info!(
                user = user_did,
                seen = seen_batch,
                total = batch_uris.len(),
                "Batch consumption crossed threshold, priority regeneration"
            );
            self.scheduler.trigger_priority(user_did);
        }

        let items = page
            .iter()
            .map(|item| FeedItem {
                uri: item.uri.clone(),
                repost_uri: item.repost_uri.clone(),
            })
            .collect();
        Ok(FeedPage {
            items,
            cursor: next_cursor,
        })
    }

    /// Steps 2–5: effective scores with live seen and fatigue adjustments.
    async fn fuse_batch(
        &self,
        user_did: &str,
        rows: &[CandidateBatchRow],
    ) -> Result<Vec<FusedItem>> {
        let now = Utc::now();

        let uris: Vec<String> = rows.iter().map(|r| r.uri.clone()).collect();
        let posts: HashMap<String, _> = self
            .post_repo
            .get_by_uris(&uris)
            .await?
            .into_iter()
            .map(|p| (p.uri.clone(), p))
            .collect();

        let interacted = self.graph_repo.interacted_uris(user_did).await?;
        let mut dropped: HashSet<&String> = HashSet::new();
        for kind in [
            InteractionKind::Like,
            InteractionKind::Repost,
            InteractionKind::Reply,
        ] {
            if let Some(set) = interacted.get(&kind) {
                dropped.extend(set.iter());
            }
        }

        let seen_counts = self.serving_repo.seen_counts(user_did).await?;
        let fatigue = self.fatigue_engine.repo().map_for_user(user_did).await?;

        let mut pool = Vec::with_capacity(rows.len());
        for row in rows {
            if dropped.contains(&row.uri) {
                continue;
            }
            // The post may have been deleted since the batch was built.
            let Some(post) = posts.get(&row.uri) else {
                continue;
            };

            let age_hours = (now - row.generated_at).num_milliseconds() as f64 / 3_600_000.0;
            let mut score = effective_score(
                row.pipeline_score,
                row.semantic_score,
                impact_multiplier(age_hours),
            );
            score = apply_seen_penalty(score, seen_counts.get(&row.uri).copied().unwrap_or(0));
            if let Some(f) = fatigue.get(&post.author) {
                score -= (f.fatigue_score / 100.0) * FATIGUE_SCALE;
            }

            pool.push(FusedItem {
                uri: row.uri.clone(),
                author: post.author.clone(),
                score,
                indexed_at_ms: post.indexed_at.timestamp_millis(),
                repost_uri: None,
            });
        }
        Ok(pool)
    }

    /// Batchless fallback: the live pipeline end to end.
    async fn serve_live(
        &self,
        user_did: &str,
        limit: usize,
        cursor: Option<Cursor>,
    ) -> Result<FeedPage> {
        let l1: HashSet<String> = self.graph_repo.l1_follows(user_did).await?.into_iter().collect();
        let page = self
            .ranker
            .rank_serve(
                user_did,
                crate::services::ranking::RankParams { limit, cursor },
            )
            .await?;

        let items = page
            .items
            .iter()
            .map(|c| FeedItem {
                uri: c.post.uri.clone(),
                repost_uri: reason_repost(c.repost_uri.as_deref(), &c.post.author, &l1),
            })
            .collect();
        Ok(FeedPage {
            items,
            cursor: page.cursor,
        })
    }

    fn spawn_serve_effects(&self, user_did: &str, page: &[FusedItem]) {
        if page.is_empty() {
            return;
        }
        let serving_repo = self.serving_repo.clone();
        let fatigue_engine = self.fatigue_engine.clone();
        let user = user_did.to_string();
        let uris: Vec<String> = page.iter().map(|i| i.uri.clone()).collect();
        let authors: Vec<String> = page
            .iter()
            .map(|i| i.author.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        tokio::spawn(async move {
            if let Err(e) = serving_repo.record_served(&user, &uris).await {
                warn!(user = %user, error = %e, "Served-log write failed");
            }
            for author in authors {
                if let Err(e) = fatigue_engine.on_serve(&user, &author).await {
                    warn!(user = %user, error = %e, "Fatigue-on-serve failed");
                }
            }
        });
    }
}

/// Newest `generated_at` wins per URI; input is already newest-first.
fn dedup_newest(rows: Vec<CandidateBatchRow>) -> Vec<CandidateBatchRow> {
    let mut seen = HashSet::new();
    rows.into_iter()
        .filter(|row| seen.insert(row.uri.clone()))
        .collect()
}

fn live_item(candidate: &ScoredCandidate, score: f64, l1: &HashSet<String>) -> FusedItem {
    FusedItem {
        uri: candidate.post.uri.clone(),
        author: candidate.post.author.clone(),
        score,
        indexed_at_ms: candidate.indexed_at_ms(),
        repost_uri: reason_repost(candidate.repost_uri.as_deref(), &candidate.post.author, l1),
    }
}

/// A repost reason is only attached when the post reached the user through
/// a repost and the author isn't already followed.
fn reason_repost(
    repost_uri: Option<&str>,
    author: &str,
    l1: &HashSet<String>,
) -> Option<String> {
    match repost_uri {
        Some(uri) if !l1.contains(author) => Some(uri.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn impact_fades_linearly_to_zero() {
        assert_eq!(impact_multiplier(0.0), 1.0);
        assert!((impact_multiplier(6.0) - 0.5).abs() < 1e-9);
        assert_eq!(impact_multiplier(12.0), 0.0);
        assert_eq!(impact_multiplier(24.0), 0.0);
    }

    #[test]
    fn effective_score_blends_both_sources() {
        // 0.3·pipeline + 1800·semantic·impact
        let score = effective_score(1000.0, 0.8, 1.0);
        assert!((score - (300.0 + 1440.0)).abs() < 1e-9);
        let decayed = effective_score(1000.0, 0.8, 0.5);
        assert!((decayed - (300.0 + 720.0)).abs() < 1e-9);
    }

    #[test]
    fn seen_penalty_is_multiplicative_with_hard_cutoff() {
        assert_eq!(apply_seen_penalty(1000.0, 0), 1000.0);
        assert!((apply_seen_penalty(1000.0, 1) - 200.0).abs() < 1e-9);
        assert!((apply_seen_penalty(1000.0, 2) - 40.0).abs() < 1e-9);
        assert_eq!(apply_seen_penalty(1000.0, 3), SEEN_HARD_CUTOFF_SCORE);
        assert_eq!(apply_seen_penalty(1000.0, 10), SEEN_HARD_CUTOFF_SCORE);
    }

    #[test]
    fn regeneration_fires_at_half_consumption() {
        assert!(!should_regenerate(49, 100));
        assert!(should_regenerate(50, 100));
        assert!(should_regenerate(100, 100));
        assert!(!should_regenerate(0, 0));
    }

    #[test]
    fn dedup_newest_keeps_first_occurrence() {
        let now = Utc::now();
        let row = |uri: &str, age_hours: i64| CandidateBatchRow {
            user_did: "did:plc:u".into(),
            uri: uri.to_string(),
            semantic_score: 0.5,
            pipeline_score: 100.0,
            centroid_id: 0,
            batch_id: "abcd0123".into(),
            generated_at: now - Duration::hours(age_hours),
        };
        let rows = vec![row("at://a", 1), row("at://a", 5), row("at://b", 5)];
        let deduped = dedup_newest(rows);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].generated_at, now - Duration::hours(1));
    }

    #[test]
    fn repost_reason_requires_non_l1_author() {
        let mut l1 = HashSet::new();
        l1.insert("did:plc:followed".to_string());
        assert_eq!(
            reason_repost(Some("at://repost/1"), "did:plc:followed", &l1),
            None
        );
        assert_eq!(
            reason_repost(Some("at://repost/1"), "did:plc:stranger", &l1),
            Some("at://repost/1".to_string())
        );
        assert_eq!(reason_repost(None, "did:plc:stranger", &l1), None);
    }
}
