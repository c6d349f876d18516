//! Steps E and F: filtering and thread dedup.
//!
//! Hard rules first (already-liked, seen-out, score floors), then per-root
//! caps so one conversation can't flood a page.

use std::collections::HashMap;

use feed_core::models::Post;

use super::context::{RankContext, Tier};
use super::replies::ThreadStats;
use super::ScoredCandidate;

/// Zero-engagement posts the user scrolled past this many times are gone.
const SEEN_OUT_COUNT: i64 = 3;

/// Originals below this score never surface.
const ORIGINAL_FLOOR: f64 = -5000.0;

/// Reply score floors by relationship.
const REPLY_FLOOR_MUTUAL: f64 = -1000.0;
const REPLY_FLOOR_L1: f64 = 0.0;
const REPLY_FLOOR_INTERACTED: f64 = 50.0;
const REPLY_FLOOR_L2: f64 = 100.0;
const REPLY_FLOOR_COLD: f64 = 500.0;

/// Per-conversation reply allowances.
const MAX_MUTUAL_REPLIES: usize = 3;
const MAX_POPULAR_L1_REPLIES: usize = 2;
const MAX_OTHER_GRAPH_REPLIES: usize = 1;
const MAX_UNKNOWN_REPLIES: usize = 1;
const OTHER_GRAPH_REPLY_MIN_SCORE: f64 = 100.0;
const UNKNOWN_REPLY_MIN_SCORE: f64 = 500.0;
const POPULAR_REPLY_MIN_ENGAGEMENT: i64 = 2;

/// At most this many originals per thread root.
const MAX_ORIGINALS_PER_ROOT: usize = 2;

fn reply_floor(tier: Tier) -> f64 {
    match tier {
        Tier::L1 { mutual: true } => REPLY_FLOOR_MUTUAL,
        Tier::L1 { mutual: false } => REPLY_FLOOR_L1,
        Tier::Interacted => REPLY_FLOOR_INTERACTED,
        Tier::L2 => REPLY_FLOOR_L2,
        Tier::Cold => REPLY_FLOOR_COLD,
    }
}

/// Step E. Keeps relative order of the input.
pub fn apply_filters(
    ctx: &RankContext,
    scored: Vec<ScoredCandidate>,
    threads: &HashMap<String, ThreadStats>,
) -> Vec<ScoredCandidate> {
    // In large conversations only the best reply survives; find it first.
    let mut best_reply_per_root: HashMap<&str, (&str, f64)> = HashMap::new();
    for candidate in &scored {
        let Some(root) = candidate.post.reply_root.as_deref() else {
            continue;
        };
        if !threads.get(root).is_some_and(|s| s.large_conversation) {
            continue;
        }
        let entry = best_reply_per_root
            .entry(root)
            .or_insert((candidate.post.uri.as_str(), candidate.score));
        if candidate.score > entry.1 {
            *entry = (candidate.post.uri.as_str(), candidate.score);
        }
    }
    let winners: HashMap<String, String> = best_reply_per_root
        .into_iter()
        .map(|(root, (uri, _))| (root.to_string(), uri.to_string()))
        .collect();

    scored
        .into_iter()
        .filter(|c| keep_candidate(ctx, c, threads, &winners))
        .collect()
}

fn keep_candidate(
    ctx: &RankContext,
    candidate: &ScoredCandidate,
    threads: &HashMap<String, ThreadStats>,
    large_winners: &HashMap<String, String>,
) -> bool {
    let post = &candidate.post;

    // Already-liked is absolute, whatever the score says.
    if ctx.liked_uris.contains(&post.uri) {
        return false;
    }

    if post.engagement() == 0 && ctx.seen_count(&post.uri) >= SEEN_OUT_COUNT {
        return false;
    }

    match post.reply_root.as_deref() {
        None => candidate.score > ORIGINAL_FLOOR,
        Some(root) => {
            if candidate.score <= reply_floor(ctx.tier(&post.author)) {
                return false;
            }
            if threads.get(root).is_some_and(|s| s.large_conversation) {
                return large_winners
                    .get(root)
                    .is_some_and(|winner| *winner == post.uri);
            }
            true
        }
    }
}

#[derive(Default)]
struct RootBudget {
    originals: usize,
    mutual_replies: usize,
    popular_l1_replies: usize,
    other_graph_replies: usize,
    unknown_replies: usize,
}

/// Step F. Sorts by score descending, then admits candidates against each
/// root's budget.
pub fn dedup_threads(
    ctx: &RankContext,
    mut scored: Vec<ScoredCandidate>,
    _threads: &HashMap<String, ThreadStats>,
) -> Vec<ScoredCandidate> {
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut budgets: HashMap<String, RootBudget> = HashMap::new();
    let mut out = Vec::with_capacity(scored.len());

    for candidate in scored {
        let root_key = candidate
            .post
            .reply_root
            .clone()
            .unwrap_or_else(|| candidate.post.uri.clone());
        let budget = budgets.entry(root_key).or_default();

        let admitted = match candidate.post.reply_root {
            None => {
                if budget.originals < MAX_ORIGINALS_PER_ROOT {
                    budget.originals += 1;
                    true
                } else {
                    false
                }
            }
            Some(_) => admit_reply(ctx, &candidate, budget),
        };
        if admitted {
            out.push(candidate);
        }
    }
    out
}

fn admit_reply(ctx: &RankContext, candidate: &ScoredCandidate, budget: &mut RootBudget) -> bool {
    let post = &candidate.post;
    match ctx.tier(&post.author) {
        Tier::L1 { mutual: true } if budget.mutual_replies < MAX_MUTUAL_REPLIES => {
            budget.mutual_replies += 1;
            true
        }
        Tier::L1 { .. }
            if post.engagement() >= POPULAR_REPLY_MIN_ENGAGEMENT
                && budget.popular_l1_replies < MAX_POPULAR_L1_REPLIES =>
        {
            budget.popular_l1_replies += 1;
            true
        }
        Tier::L1 { .. } | Tier::Interacted | Tier::L2
            if candidate.score > OTHER_GRAPH_REPLY_MIN_SCORE
                && budget.other_graph_replies < MAX_OTHER_GRAPH_REPLIES =>
        {
            budget.other_graph_replies += 1;
            true
        }
        Tier::Cold
            if candidate.score > UNKNOWN_REPLY_MIN_SCORE
                && budget.unknown_replies < MAX_UNKNOWN_REPLIES =>
        {
            budget.unknown_replies += 1;
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ranking::context::test_support::empty_context;
    use crate::services::ranking::context::RankMode;
    use crate::services::ranking::Signals;
    use chrono::Utc;

    fn candidate(uri: &str, author: &str, root: Option<&str>, score: f64) -> ScoredCandidate {
        ScoredCandidate {
            post: Post {
                uri: uri.to_string(),
                cid: "bafy".into(),
                indexed_at: Utc::now(),
                author: author.to_string(),
                like_count: 0,
                reply_count: 0,
                repost_count: 0,
                reply_root: root.map(str::to_string),
                reply_parent: root.map(str::to_string),
                text: None,
                has_image: false,
                has_video: false,
                has_external: false,
            },
            score,
            signals: Signals::default(),
            repost_uri: None,
            repost_from_l1: false,
        }
    }

    #[test]
    fn already_liked_is_dropped_even_at_top_score() {
        let mut ctx = empty_context("did:plc:u", RankMode::Serve);
        ctx.liked_uris.insert("at://p/x/1".into());
        let scored = vec![candidate("at://p/x/1", "did:plc:a", None, 9999.0)];
        let kept = apply_filters(&ctx, scored, &HashMap::new());
        assert!(kept.is_empty());
    }

    #[test]
    fn seen_out_zero_engagement_is_dropped() {
        let mut ctx = empty_context("did:plc:u", RankMode::Serve);
        ctx.seen_counts.insert("at://p/x/1".into(), 3);
        let scored = vec![candidate("at://p/x/1", "did:plc:a", None, 100.0)];
        assert!(apply_filters(&ctx, scored, &HashMap::new()).is_empty());
    }

    #[test]
    fn only_top_reply_survives_large_conversations() {
        let mut ctx = empty_context("did:plc:u", RankMode::Serve);
        for i in 0..4 {
            ctx.l1.insert(format!("did:plc:l1-{i}"));
        }
        const ROOT: &str = "at://did:plc:op/app.bsky.feed.post/root";
        let mut threads = HashMap::new();
        threads.insert(
            ROOT.to_string(),
            ThreadStats {
                root_author: "did:plc:op".into(),
                distinct_graph_repliers: 4,
                multi_person: true,
                large_conversation: true,
                ..Default::default()
            },
        );

        let scored = vec![
            candidate("at://r/1", "did:plc:l1-0", Some(ROOT), 300.0),
            candidate("at://r/2", "did:plc:l1-1", Some(ROOT), 900.0),
            candidate("at://r/3", "did:plc:l1-2", Some(ROOT), 500.0),
            candidate("at://r/4", "did:plc:l1-3", Some(ROOT), 100.0),
        ];
        let kept = apply_filters(&ctx, scored, &threads);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].post.uri, "at://r/2");
    }

    #[test]
    fn reply_floors_gate_unknown_authors() {
        let ctx = empty_context("did:plc:u", RankMode::Serve);
        let scored = vec![
            candidate("at://r/low", "did:plc:s", Some("at://root/1"), 400.0),
            candidate("at://r/high", "did:plc:s", Some("at://root/2"), 600.0),
        ];
        let kept = apply_filters(&ctx, scored, &HashMap::new());
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].post.uri, "at://r/high");
    }

    #[test]
    fn dedup_caps_mutual_replies_at_three() {
        let mut ctx = empty_context("did:plc:u", RankMode::Serve);
        for i in 0..5 {
            let did = format!("did:plc:m{i}");
            ctx.l1.insert(did.clone());
            ctx.mutuals.insert(did);
        }
        const ROOT: &str = "at://root/1";
        let scored: Vec<ScoredCandidate> = (0..5)
            .map(|i| {
                candidate(
                    &format!("at://r/{i}"),
                    &format!("did:plc:m{i}"),
                    Some(ROOT),
                    1000.0 - i as f64,
                )
            })
            .collect();
        let kept = dedup_threads(&ctx, scored, &HashMap::new());
        assert_eq!(kept.len(), MAX_MUTUAL_REPLIES);
    }

    #[test]
    fn dedup_allows_single_unknown_reply_above_floor() {
        let ctx = empty_context("did:plc:u", RankMode::Serve);
        const ROOT: &str = "at://root/1";
        let scored = vec![
            candidate("at://r/1", "did:plc:s1", Some(ROOT), 900.0),
            candidate("at://r/2", "did:plc:s2", Some(ROOT), 800.0),
        ];
        let kept = dedup_threads(&ctx, scored, &HashMap::new());
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].post.uri, "at://r/1");
    }
}
