//! Per-request ranking context.
//!
//! Everything the scoring stages need is loaded up front into plain maps
//! and sets, so the stages themselves stay pure and testable.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};

use feed_core::db::fatigue_repo::FatigueRepo;
use feed_core::db::graph_repo::GraphRepo;
use feed_core::db::keyword_repo::KeywordRepo;
use feed_core::db::post_repo::PostRepo;
use feed_core::db::serving_repo::ServingRepo;
use feed_core::db::taste_repo::TasteRepo;
use feed_core::models::{AuthorFatigue, InteractionKind};

use crate::error::Result;

/// Window for "recently interacted" authorship.
const INTERACTED_WINDOW_DAYS: i64 = 30;

/// Twin selection for the taste signal and the B2 taste-similar recall.
const TWIN_MIN_REPUTATION: f64 = 1.5;
const TWIN_LIMIT: i64 = 100;
const TWIN_LIKES_WINDOW_DAYS: i64 = 7;
const TWIN_LIKES_CAP: i64 = 2000;

/// Media-affinity lookback for the mismatch penalty.
const MEDIA_WINDOW_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankMode {
    Serve,
    Batch,
}

impl RankMode {
    pub fn is_batch(&self) -> bool {
        matches!(self, RankMode::Batch)
    }
}

/// Social-graph relationship of a candidate author to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    L1 { mutual: bool },
    Interacted,
    L2,
    Cold,
}

/// Taste-twin consensus on one URI.
#[derive(Debug, Clone, Copy)]
pub struct TasteMark {
    pub twin_count: usize,
    pub boost: f64,
}

#[derive(Debug, Clone)]
pub struct RankContext {
    pub user_did: String,
    pub now: DateTime<Utc>,
    pub mode: RankMode,

    pub l1: HashSet<String>,
    pub l2: HashSet<String>,
    pub mutuals: HashSet<String>,
    pub interacted_authors: HashSet<String>,

    pub liked_uris: HashSet<String>,
    pub reposted_uris: HashSet<String>,
    pub replied_uris: HashSet<String>,

    pub keywords: Vec<(String, f64)>,
    pub taste_marks: HashMap<String, TasteMark>,
    pub seen_counts: HashMap<String, i64>,
    pub fatigue: HashMap<String, AuthorFatigue>,

    /// Share of the user's recent likes carrying images / video.
    pub image_ratio: f64,
    pub video_ratio: f64,

    /// Seed for the per-request jittered recall coefficients.
    pub jitter_seed: u64,
}

impl RankContext {
    pub fn tier(&self, author: &str) -> Tier {
        if author == self.user_did {
            return Tier::Interacted;
        }
        if self.l1.contains(author) {
            return Tier::L1 {
                mutual: self.mutuals.contains(author),
            };
        }
        if self.interacted_authors.contains(author) {
            return Tier::Interacted;
        }
        if self.l2.contains(author) {
            return Tier::L2;
        }
        Tier::Cold
    }

    /// Inside the user's social graph (anything but cold).
    pub fn in_graph(&self, author: &str) -> bool {
        !matches!(self.tier(author), Tier::Cold)
    }

    pub fn affinity(&self, author: &str) -> f64 {
        self.fatigue
            .get(author)
            .map(|f| f.affinity_score)
            .unwrap_or(1.0)
    }

    pub fn seen_count(&self, uri: &str) -> i64 {
        self.seen_counts.get(uri).copied().unwrap_or(0)
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn load_context(
    user_did: &str,
    mode: RankMode,
    graph_repo: &GraphRepo,
    taste_repo: &TasteRepo,
    fatigue_repo: &FatigueRepo,
    keyword_repo: &KeywordRepo,
    serving_repo: &ServingRepo,
    post_repo: &PostRepo,
) -> Result<RankContext> {
    let now = Utc::now();

    let l1_vec = graph_repo.l1_follows(user_did).await?;
    let l2_vec = graph_repo.l2_follows(user_did, &l1_vec).await?;
    let mutuals = graph_repo.mutuals(user_did, &l1_vec).await?;

    let interacted_authors: HashSet<String> = graph_repo
        .interacted_authors(user_did, now - Duration::days(INTERACTED_WINDOW_DAYS))
        .await?
        .into_iter()
        .collect();

    let mut interacted = graph_repo.interacted_uris(user_did).await?;
    let liked_uris = interacted.remove(&InteractionKind::Like).unwrap_or_default();
    let reposted_uris = interacted
        .remove(&InteractionKind::Repost)
        .unwrap_or_default();
    let replied_uris = interacted
        .remove(&InteractionKind::Reply)
        .unwrap_or_default();

    let keywords: Vec<(String, f64)> = keyword_repo
        .for_user(user_did)
        .await?
        .into_iter()
        .map(|k| (k.keyword, k.score))
        .collect();

    let twins = taste_repo
        .top_twins(user_did, TWIN_MIN_REPUTATION, TWIN_LIMIT)
        .await?;
    let taste_marks = load_taste_marks(graph_repo, &twins, now).await?;

    let seen_counts = serving_repo.seen_counts(user_did).await?;
    let fatigue = fatigue_repo.map_for_user(user_did).await?;

    let (media_total, media_images, media_videos) = post_repo
        .liked_media_stats(user_did, now - Duration::days(MEDIA_WINDOW_DAYS))
        .await?;
    let (image_ratio, video_ratio) = if media_total > 0 {
        (
            media_images as f64 / media_total as f64,
            media_videos as f64 / media_total as f64,
        )
    } else {
        // No signal yet; never penalize on an empty history.
        (1.0, 1.0)
    };

    Ok(RankContext {
        user_did: user_did.to_string(),
        now,
        mode,
        l1: l1_vec.into_iter().collect(),
        l2: l2_vec.into_iter().collect(),
        mutuals,
        interacted_authors,
        liked_uris,
        reposted_uris,
        replied_uris,
        keywords,
        taste_marks,
        seen_counts,
        fatigue,
        image_ratio,
        video_ratio,
        jitter_seed: now.timestamp_millis() as u64,
    })
}

/// URIs recently liked by the user's taste-twins, annotated with how many
/// twins agree and their mean reputation (clamped to 2.0).
async fn load_taste_marks(
    graph_repo: &GraphRepo,
    twins: &[(String, f64)],
    now: DateTime<Utc>,
) -> Result<HashMap<String, TasteMark>> {
    if twins.is_empty() {
        return Ok(HashMap::new());
    }
    let twin_dids: Vec<String> = twins.iter().map(|(did, _)| did.clone()).collect();
    let reputations: HashMap<&str, f64> = twins
        .iter()
        .map(|(did, rep)| (did.as_str(), *rep))
        .collect();

    let pairs = graph_repo
        .twin_recent_likes(
            &twin_dids,
            now - Duration::days(TWIN_LIKES_WINDOW_DAYS),
            TWIN_LIKES_CAP,
        )
        .await?;

    let mut grouped: HashMap<String, Vec<f64>> = HashMap::new();
    for (uri, twin) in pairs {
        let rep = reputations.get(twin.as_str()).copied().unwrap_or(1.0);
        grouped.entry(uri).or_default().push(rep);
    }

    Ok(grouped
        .into_iter()
        .map(|(uri, reps)| {
            let mean = reps.iter().sum::<f64>() / reps.len() as f64;
            (
                uri,
                TasteMark {
                    twin_count: reps.len(),
                    boost: mean.clamp(0.0, 2.0),
                },
            )
        })
        .collect())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// A context with empty state, for pure scoring tests.
    pub fn empty_context(user_did: &str, mode: RankMode) -> RankContext {
        RankContext {
            user_did: user_did.to_string(),
            now: Utc::now(),
            mode,
            l1: HashSet::new(),
            l2: HashSet::new(),
            mutuals: HashSet::new(),
            interacted_authors: HashSet::new(),
            liked_uris: HashSet::new(),
            reposted_uris: HashSet::new(),
            replied_uris: HashSet::new(),
            keywords: Vec::new(),
            taste_marks: HashMap::new(),
            seen_counts: HashMap::new(),
            fatigue: HashMap::new(),
            image_ratio: 1.0,
            video_ratio: 1.0,
            jitter_seed: 42,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_prefers_l1_over_interacted() {
        let mut ctx = test_support::empty_context("did:plc:u", RankMode::Serve);
        ctx.l1.insert("did:plc:a".into());
        ctx.mutuals.insert("did:plc:a".into());
        ctx.interacted_authors.insert("did:plc:a".into());
        assert_eq!(ctx.tier("did:plc:a"), Tier::L1 { mutual: true });
    }

    #[test]
    fn own_posts_are_in_graph() {
        let ctx = test_support::empty_context("did:plc:u", RankMode::Serve);
        assert!(ctx.in_graph("did:plc:u"));
        assert!(!ctx.in_graph("did:plc:stranger"));
    }
}
