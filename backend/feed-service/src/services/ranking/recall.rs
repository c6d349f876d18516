//! Step A: candidate recall.
//!
//! Four buckets, unioned and de-duplicated by URI: fresh (≤72 h), bridge
//! (72 h–7 d), global gems (≤30 d, engagement-gated, plus taste-twin likes)
//! and the bubble long tail. Every bucket ranks its rows with a light
//! jittered pre-score so the mix shifts a little between requests.

use std::collections::HashSet;

use chrono::{Duration, Utc};
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use feed_core::db::post_repo::PostRepo;
use feed_core::models::Post;

use crate::error::Result;
use crate::metrics;

use super::context::RankContext;

const FRESH_WINDOW_HOURS: i64 = 72;
const BRIDGE_WINDOW_DAYS: i64 = 7;
const GLOBAL_WINDOW_DAYS: i64 = 30;

const FRESH_CAP: i64 = 1200;
const FRESH_CAP_BATCH: i64 = 3000;
const BRIDGE_CAP: i64 = 600;
const GLOBAL_CAP: i64 = 1600;
const GLOBAL_CAP_BATCH: i64 = 3000;
const BUBBLE_CAP: i64 = 800;

/// Pre-score coefficient bases; each gets a ±10% jitter per request.
const PRE_LIKES_COEFF: f64 = 1.0;
const PRE_RECENCY_COEFF: f64 = 50.0;
const PRE_VELOCITY_COEFF: f64 = 2.0;

#[derive(Debug, Clone, Copy)]
struct PreScoreCoeffs {
    a: f64,
    b: f64,
    c: f64,
}

fn jittered_coeffs(rng: &mut impl Rng) -> PreScoreCoeffs {
    PreScoreCoeffs {
        a: PRE_LIKES_COEFF * rng.gen_range(0.9..1.1),
        b: PRE_RECENCY_COEFF * rng.gen_range(0.9..1.1),
        c: PRE_VELOCITY_COEFF * rng.gen_range(0.9..1.1),
    }
}

fn pre_score(post: &Post, coeffs: PreScoreCoeffs, now: chrono::DateTime<Utc>) -> f64 {
    let likes = post.like_count as f64;
    let age_hours = post.age_hours(now).max(0.1);
    coeffs.a * likes + coeffs.b / (age_hours + 1.0) + coeffs.c * likes / age_hours
}

/// Rank a bucket by its jittered pre-score and keep the top `cap`.
fn top_by_pre_score(
    mut posts: Vec<Post>,
    coeffs: PreScoreCoeffs,
    cap: usize,
    now: chrono::DateTime<Utc>,
) -> Vec<Post> {
    posts.sort_by(|a, b| {
        pre_score(b, coeffs, now)
            .partial_cmp(&pre_score(a, coeffs, now))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    posts.truncate(cap);
    posts
}

pub async fn recall_candidates(ctx: &RankContext, post_repo: &PostRepo) -> Result<Vec<Post>> {
    let batch = ctx.mode.is_batch();
    let now = ctx.now;
    let mut rng = rand::rngs::StdRng::seed_from_u64(ctx.jitter_seed);

    let social_authors: Vec<String> = ctx
        .l1
        .iter()
        .chain(ctx.l2.iter())
        .chain(ctx.interacted_authors.iter())
        .cloned()
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    let bubble_authors: Vec<String> = ctx
        .l1
        .iter()
        .chain(ctx.interacted_authors.iter())
        .cloned()
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();

    // B1 fresh.
    let fresh_cap = if batch { FRESH_CAP_BATCH } else { FRESH_CAP };
    let fresh = post_repo
        .recall_fresh(
            &social_authors,
            Duration::hours(FRESH_WINDOW_HOURS),
            if batch { 0 } else { 2 },
            fresh_cap,
        )
        .await?;
    let fresh = top_by_pre_score(fresh, jittered_coeffs(&mut rng), fresh_cap as usize, now);
    metrics::observe_recall_bucket("fresh", fresh.len());

    // B1.5 bridge.
    let bridge = post_repo
        .recall_bridge(
            &social_authors,
            Duration::hours(FRESH_WINDOW_HOURS),
            Duration::days(BRIDGE_WINDOW_DAYS),
            1,
            BRIDGE_CAP,
        )
        .await?;
    let bridge = top_by_pre_score(bridge, jittered_coeffs(&mut rng), BRIDGE_CAP as usize, now);
    metrics::observe_recall_bucket("bridge", bridge.len());

    // B2 global gems ∪ taste-similar likes.
    let global_cap = if batch { GLOBAL_CAP_BATCH } else { GLOBAL_CAP };
    let mut global = post_repo
        .recall_global(
            Duration::days(GLOBAL_WINDOW_DAYS),
            if batch { 0 } else { 1 },
            global_cap,
        )
        .await?;
    let taste_uris: Vec<String> = ctx.taste_marks.keys().cloned().collect();
    match post_repo.get_by_uris(&taste_uris).await {
        Ok(taste_posts) => global.extend(taste_posts),
        Err(e) => warn!(error = %e, "Taste-similar hydration failed"),
    }
    let global = top_by_pre_score(global, jittered_coeffs(&mut rng), global_cap as usize, now);
    metrics::observe_recall_bucket("global", global.len());

    // B3 bubble.
    let bubble = post_repo
        .recall_bubble(&bubble_authors, Duration::days(GLOBAL_WINDOW_DAYS), BUBBLE_CAP)
        .await?;
    let bubble = top_by_pre_score(bubble, jittered_coeffs(&mut rng), BUBBLE_CAP as usize, now);
    metrics::observe_recall_bucket("bubble", bubble.len());

    // Union, de-duplicated by URI, first bucket wins.
    let mut seen: HashSet<String> = HashSet::new();
    let mut union: Vec<Post> = Vec::new();
    for post in fresh
        .into_iter()
        .chain(bridge)
        .chain(global)
        .chain(bubble)
    {
        if seen.insert(post.uri.clone()) {
            union.push(post);
        }
    }

    debug!(
        user = %ctx.user_did,
        total = union.len(),
        "Recall union assembled"
    );
    Ok(union)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ranking::context::test_support::empty_context;
    use crate::services::ranking::context::RankMode;

    fn post_with(uri: &str, likes: i32, age_hours: i64) -> Post {
        Post {
            uri: uri.to_string(),
            cid: "bafy".into(),
            indexed_at: Utc::now() - Duration::hours(age_hours),
            author: "did:plc:a".into(),
            like_count: likes,
            reply_count: 0,
            repost_count: 0,
            reply_root: None,
            reply_parent: None,
            text: None,
            has_image: false,
            has_video: false,
            has_external: false,
        }
    }

    #[test]
    fn pre_score_favors_liked_and_fresh() {
        let now = Utc::now();
        let coeffs = PreScoreCoeffs {
            a: PRE_LIKES_COEFF,
            b: PRE_RECENCY_COEFF,
            c: PRE_VELOCITY_COEFF,
        };
        let hot = pre_score(&post_with("a", 50, 1), coeffs, now);
        let stale = pre_score(&post_with("b", 50, 60), coeffs, now);
        let unloved = pre_score(&post_with("c", 0, 1), coeffs, now);
        assert!(hot > stale);
        assert!(hot > unloved);
    }

    #[test]
    fn top_by_pre_score_caps_and_orders() {
        let now = Utc::now();
        let coeffs = PreScoreCoeffs {
            a: 1.0,
            b: 0.0,
            c: 0.0,
        };
        let posts = vec![
            post_with("low", 1, 5),
            post_with("high", 100, 5),
            post_with("mid", 10, 5),
        ];
        let top = top_by_pre_score(posts, coeffs, 2, now);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].uri, "high");
        assert_eq!(top[1].uri, "mid");
    }

    #[test]
    fn jittered_coeffs_are_deterministic_per_seed() {
        let ctx = empty_context("did:plc:u", RankMode::Serve);
        let mut rng1 = rand::rngs::StdRng::seed_from_u64(ctx.jitter_seed);
        let mut rng2 = rand::rngs::StdRng::seed_from_u64(ctx.jitter_seed);
        let c1 = jittered_coeffs(&mut rng1);
        let c2 = jittered_coeffs(&mut rng2);
        assert_eq!(c1.a, c2.a);
        assert_eq!(c1.b, c2.b);
        assert_eq!(c1.c, c2.c);
    }
}
