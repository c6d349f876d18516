//! End-to-end scenarios over the pure ranking stages: scoring → filter →
//! thread dedup → diversity → pagination, without a database.

use std::collections::{HashMap, HashSet};

use chrono::{Duration, Utc};
use feed_core::models::Post;
use feed_service::services::ranking::{
    context::{RankContext, RankMode},
    cursor, diversity, filter,
    replies::ThreadStats,
    scoring, Cursor, ScoredCandidate,
};

fn empty_ctx(user: &str, mode: RankMode) -> RankContext {
    RankContext {
        user_did: user.to_string(),
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
        jitter_seed: 7,
    }
}

fn post(uri: &str, author: &str, age_hours: i64) -> Post {
    Post {
        uri: uri.to_string(),
        cid: "bafy".into(),
        indexed_at: Utc::now() - Duration::hours(age_hours),
        author: author.to_string(),
        like_count: 0,
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

fn score_pool(ctx: &RankContext, posts: &[Post]) -> Vec<ScoredCandidate> {
    let threads = HashMap::new();
    let times = HashMap::new();
    posts
        .iter()
        .map(|p| scoring::score_candidate(ctx, p, None, &threads, &times))
        .collect()
}

/// Scenario: a liked post never comes back, no matter how well it scores.
#[test]
fn already_liked_posts_never_surface() {
    let mut ctx = empty_ctx("did:plc:u", RankMode::Serve);
    ctx.l1.insert("did:plc:a".into());
    ctx.liked_uris
        .insert("at://did:plc:a/app.bsky.feed.post/p1".into());

    let mut p1 = post("at://did:plc:a/app.bsky.feed.post/p1", "did:plc:a", 1);
    p1.like_count = 500;
    let p2 = post("at://did:plc:a/app.bsky.feed.post/p2", "did:plc:a", 1);

    let scored = score_pool(&ctx, &[p1, p2]);
    let threads = HashMap::new();
    let kept = filter::apply_filters(&ctx, scored, &threads);
    let uris: Vec<&str> = kept.iter().map(|c| c.post.uri.as_str()).collect();
    assert!(!uris.contains(&"at://did:plc:a/app.bsky.feed.post/p1"));
    assert!(uris.contains(&"at://did:plc:a/app.bsky.feed.post/p2"));
}

/// Scenario: with seen_count = 2 the pre-multiplier score is quartered.
#[test]
fn seen_twice_quarters_the_score() {
    let mut base_ctx = empty_ctx("did:plc:u", RankMode::Serve);
    base_ctx.l1.insert("did:plc:a".into());
    let p = post("at://did:plc:a/app.bsky.feed.post/p", "did:plc:a", 2);

    let unseen = score_pool(&base_ctx, std::slice::from_ref(&p))[0].clone();

    base_ctx.seen_counts.insert(p.uri.clone(), 2);
    let seen = score_pool(&base_ctx, std::slice::from_ref(&p))[0].clone();

    // Jitter lands after the multiplier and is identical for both runs;
    // netting it out exposes the exact 0.25 factor.
    let jitter = unseen.signals.get("jitter").unwrap_or(0.0);
    assert_eq!(seen.signals.get("jitter"), unseen.signals.get("jitter"));
    assert_eq!(seen.signals.get("seen_multiplier"), Some(0.25));
    assert!(((seen.score - jitter) - (unseen.score - jitter) * 0.25).abs() < 1e-6);
}

/// Scenario: four L1 replies in one four-person conversation; only the
/// highest-scoring reply survives.
#[test]
fn large_conversations_keep_only_the_best_reply() {
    const ROOT: &str = "at://did:plc:op/app.bsky.feed.post/root";

    let mut ctx = empty_ctx("did:plc:u", RankMode::Serve);
    for i in 0..4 {
        ctx.l1.insert(format!("did:plc:l1-{i}"));
    }

    let stats = ThreadStats {
        root_author: "did:plc:op".to_string(),
        distinct_graph_repliers: 4,
        multi_person: true,
        large_conversation: true,
        ..Default::default()
    };
    let mut threads = HashMap::new();
    threads.insert(ROOT.to_string(), stats);

    // Hand-scored replies mirroring the scenario's 300/900/500/100.
    let mut scored = Vec::new();
    for (i, score) in [(0, 300.0), (1, 900.0), (2, 500.0), (3, 100.0)] {
        let mut p = post(
            &format!("at://did:plc:l1-{i}/app.bsky.feed.post/r{i}"),
            &format!("did:plc:l1-{i}"),
            1,
        );
        p.reply_root = Some(ROOT.to_string());
        p.reply_parent = Some(ROOT.to_string());
        p.like_count = 3;
        let mut candidate = scoring::score_candidate(&ctx, &p, None, &threads, &HashMap::new());
        candidate.score = score;
        scored.push(candidate);
    }

    let kept = filter::apply_filters(&ctx, scored, &threads);
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].post.uri, "at://did:plc:l1-1/app.bsky.feed.post/r1");

    let deduped = filter::dedup_threads(&ctx, kept, &threads);
    assert_eq!(deduped.len(), 1);
}

/// Invariant: two cursored pages are disjoint and concatenate to the
/// single double-length page on the same snapshot.
#[test]
fn pagination_is_stable_on_a_fixed_snapshot() {
    let ctx = empty_ctx("did:plc:u", RankMode::Serve);
    let posts: Vec<Post> = (0..20)
        .map(|i| {
            let mut p = post(
                &format!("at://did:plc:a{i}/app.bsky.feed.post/{i}"),
                &format!("did:plc:a{i}"),
                i % 48,
            );
            p.like_count = (i * 7 % 13) as i32;
            p
        })
        .collect();

    let mut pool = score_pool(&ctx, &posts);
    cursor::sort_by_key(&mut pool);

    let single: Vec<&str> = pool.iter().take(10).map(|c| c.post.uri.as_str()).collect();

    let page1: Vec<ScoredCandidate> = pool.iter().take(5).cloned().collect();
    let c = Cursor::decode(&cursor::page_cursor(&page1).unwrap()).unwrap();
    let page2: Vec<ScoredCandidate> = pool
        .iter()
        .filter(|x| c.is_strictly_after(x.score, x.indexed_at_ms(), &x.post.uri))
        .take(5)
        .cloned()
        .collect();

    let mut concat: Vec<&str> = page1.iter().map(|x| x.post.uri.as_str()).collect();
    concat.extend(page2.iter().map(|x| x.post.uri.as_str()));
    assert_eq!(concat, single);
}

/// Invariant: no page contains three consecutive posts by one author.
#[test]
fn diversity_never_allows_three_in_a_row() {
    let ctx = empty_ctx("did:plc:u", RankMode::Serve);
    let posts: Vec<Post> = (0..12)
        .map(|i| {
            // Three authors, heavily skewed toward the first.
            let author = match i % 4 {
                0 | 1 | 2 => "did:plc:loud",
                _ => "did:plc:quiet",
            };
            post(&format!("at://{author}/app.bsky.feed.post/{i}"), author, 1)
        })
        .collect();

    let mut pool = score_pool(&ctx, &posts);
    cursor::sort_by_key(&mut pool);
    let out = diversity::diversify(pool);

    for window in out.windows(3) {
        let a = &window[0].post.author;
        assert!(
            !(a == &window[1].post.author && a == &window[2].post.author),
            "three consecutive items by {a}"
        );
    }
}
