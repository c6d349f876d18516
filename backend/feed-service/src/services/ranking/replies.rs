//! Step C: reply-cluster analysis.
//!
//! Candidates are grouped by thread root. Threads with several
//! social-graph participants are marked as conversations and earn the root
//! an op-boost; root authors replying to themselves in sequence are flagged
//! with their chain depth so scoring can demote thread-spam.

use std::collections::{HashMap, HashSet};

use feed_core::models::Post;

use super::context::{RankContext, Tier};

/// Most roots analyzed per request.
const ROOT_CAP: usize = 1000;

/// Originals need at least this many replies before a thread fetch is
/// worth it.
const MIN_REPLIES_FOR_ANALYSIS: i32 = 2;

#[derive(Debug, Clone, Default)]
pub struct ThreadStats {
    pub root_author: String,
    /// Replies from social-graph users other than the root author.
    pub graph_replies: usize,
    pub distinct_graph_repliers: usize,
    pub l1_replies: usize,
    pub l2_replies: usize,
    pub mutual_replies: usize,
    /// ≥ 2 distinct graph repliers.
    pub multi_person: bool,
    /// ≥ 4 distinct graph repliers; only the top reply survives these.
    pub large_conversation: bool,
    pub op_boost: f64,
    /// Replies per author across the whole thread.
    pub author_reply_counts: HashMap<String, usize>,
    /// Longest run of consecutive self-replies by the root author.
    pub chain_depth: usize,
    /// Total replies by the root author in the thread.
    pub root_author_replies: usize,
}

/// Thread roots worth analyzing: every candidate reply's root, plus
/// candidate originals that already collected replies.
pub fn candidate_roots(candidates: &[Post]) -> Vec<String> {
    let mut roots: Vec<String> = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();
    for post in candidates {
        let root = match &post.reply_root {
            Some(root) => root.as_str(),
            None if post.reply_count >= MIN_REPLIES_FOR_ANALYSIS => post.uri.as_str(),
            None => continue,
        };
        if seen.insert(root) {
            roots.push(root.to_string());
        }
        if roots.len() >= ROOT_CAP {
            break;
        }
    }
    roots
}

/// The author DID embedded in an at:// record URI.
pub fn author_from_uri(uri: &str) -> Option<&str> {
    uri.strip_prefix("at://")?.split('/').next()
}

pub fn analyze_threads(
    ctx: &RankContext,
    roots: &[String],
    candidates: &[Post],
    thread_posts: &[Post],
) -> HashMap<String, ThreadStats> {
    // Group every reply we can see by root; candidates are store rows too,
    // but the thread fetch may know replies the recall stage skipped.
    let mut by_root: HashMap<&str, Vec<&Post>> = HashMap::new();
    let mut seen_uris: HashSet<&str> = HashSet::new();
    for post in thread_posts.iter().chain(candidates.iter()) {
        let Some(root) = post.reply_root.as_deref() else {
            continue;
        };
        if seen_uris.insert(post.uri.as_str()) {
            by_root.entry(root).or_default().push(post);
        }
    }

    let mut stats_by_root = HashMap::new();
    for root in roots {
        let Some(root_author) = author_from_uri(root) else {
            continue;
        };
        let replies = by_root.get(root.as_str()).cloned().unwrap_or_default();
        let stats = analyze_one(ctx, root, root_author, &replies);
        stats_by_root.insert(root.clone(), stats);
    }
    stats_by_root
}

fn analyze_one(
    ctx: &RankContext,
    root_uri: &str,
    root_author: &str,
    replies: &[&Post],
) -> ThreadStats {
    let mut stats = ThreadStats {
        root_author: root_author.to_string(),
        ..Default::default()
    };

    let mut graph_repliers: HashSet<&str> = HashSet::new();
    for reply in replies {
        *stats
            .author_reply_counts
            .entry(reply.author.clone())
            .or_default() += 1;

        if reply.author == root_author {
            stats.root_author_replies += 1;
            continue;
        }
        match ctx.tier(&reply.author) {
            Tier::L1 { mutual } => {
                stats.l1_replies += 1;
                if mutual {
                    stats.mutual_replies += 1;
                }
            }
            Tier::L2 => stats.l2_replies += 1,
            Tier::Interacted => {}
            Tier::Cold => continue,
        }
        stats.graph_replies += 1;
        graph_repliers.insert(reply.author.as_str());
    }

    stats.distinct_graph_repliers = graph_repliers.len();
    stats.multi_person = stats.distinct_graph_repliers >= 2;
    stats.large_conversation = stats.distinct_graph_repliers >= 4;

    let bonus = if stats.graph_replies >= 5 {
        500.0
    } else if stats.graph_replies >= 3 {
        300.0
    } else {
        0.0
    };
    stats.op_boost = 150.0 * stats.l1_replies as f64
        + 75.0 * stats.l2_replies as f64
        + 200.0 * stats.mutual_replies as f64
        + bonus;

    stats.chain_depth = self_reply_chain_depth(root_uri, root_author, replies);
    stats
}

/// Longest run of the root author replying to their own post: root → r1 →
/// r2 counts as depth 2.
fn self_reply_chain_depth(root_uri: &str, root_author: &str, replies: &[&Post]) -> usize {
    let own: HashMap<&str, &Post> = replies
        .iter()
        .filter(|p| p.author == root_author)
        .map(|p| (p.uri.as_str(), *p))
        .collect();

    let mut max_depth = 0usize;
    for post in own.values() {
        let mut depth = 0usize;
        let mut current = Some(*post);
        // Walk up through consecutive own replies; bounded by thread size.
        let mut hops = 0usize;
        while let Some(p) = current {
            depth += 1;
            hops += 1;
            if hops > replies.len() + 1 {
                break; // defensive bound against parent loops
            }
            current = match p.reply_parent.as_deref() {
                Some(parent) if parent == root_uri => None,
                Some(parent) => own.get(parent).copied(),
                None => None,
            };
        }
        max_depth = max_depth.max(depth);
    }
    max_depth
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ranking::context::test_support::empty_context;
    use crate::services::ranking::context::RankMode;
    use chrono::Utc;

    fn reply(uri: &str, author: &str, root: &str, parent: &str) -> Post {
        Post {
            uri: uri.to_string(),
            cid: "bafy".into(),
            indexed_at: Utc::now(),
            author: author.to_string(),
            like_count: 0,
            reply_count: 0,
            repost_count: 0,
            reply_root: Some(root.to_string()),
            reply_parent: Some(parent.to_string()),
            text: None,
            has_image: false,
            has_video: false,
            has_external: false,
        }
    }

    const ROOT: &str = "at://did:plc:op/app.bsky.feed.post/root";

    #[test]
    fn author_from_uri_reads_the_did() {
        assert_eq!(author_from_uri(ROOT), Some("did:plc:op"));
        assert_eq!(author_from_uri("garbage"), None);
    }

    #[test]
    fn conversation_detection_counts_distinct_graph_repliers() {
        let mut ctx = empty_context("did:plc:u", RankMode::Serve);
        for i in 0..4 {
            ctx.l1.insert(format!("did:plc:l1-{i}"));
        }
        let replies: Vec<Post> = (0..4)
            .map(|i| reply(&format!("at://did:plc:l1-{i}/app.bsky.feed.post/r{i}"), &format!("did:plc:l1-{i}"), ROOT, ROOT))
            .collect();
        let refs: Vec<&Post> = replies.iter().collect();

        let stats = analyze_one(&ctx, ROOT, "did:plc:op", &refs);
        assert!(stats.multi_person);
        assert!(stats.large_conversation);
        assert_eq!(stats.l1_replies, 4);
        assert_eq!(stats.op_boost, 150.0 * 4.0 + 300.0);
    }

    #[test]
    fn self_reply_chain_depth_follows_parent_links() {
        let ctx = empty_context("did:plc:u", RankMode::Serve);
        let r1 = reply("at://did:plc:op/app.bsky.feed.post/r1", "did:plc:op", ROOT, ROOT);
        let r2 = reply(
            "at://did:plc:op/app.bsky.feed.post/r2",
            "did:plc:op",
            ROOT,
            "at://did:plc:op/app.bsky.feed.post/r1",
        );
        let r3 = reply(
            "at://did:plc:op/app.bsky.feed.post/r3",
            "did:plc:op",
            ROOT,
            "at://did:plc:op/app.bsky.feed.post/r2",
        );
        let posts = [&r1, &r2, &r3];
        let stats = analyze_one(&ctx, ROOT, "did:plc:op", &posts);
        assert_eq!(stats.chain_depth, 3);
        assert_eq!(stats.root_author_replies, 3);
        assert!(!stats.multi_person);
    }

    #[test]
    fn interleaved_replies_break_the_chain() {
        let mut ctx = empty_context("did:plc:u", RankMode::Serve);
        ctx.l1.insert("did:plc:friend".into());
        let r1 = reply("at://did:plc:op/app.bsky.feed.post/r1", "did:plc:op", ROOT, ROOT);
        let other = reply(
            "at://did:plc:friend/app.bsky.feed.post/x",
            "did:plc:friend",
            ROOT,
            "at://did:plc:op/app.bsky.feed.post/r1",
        );
        let r2 = reply(
            "at://did:plc:op/app.bsky.feed.post/r2",
            "did:plc:op",
            ROOT,
            "at://did:plc:friend/app.bsky.feed.post/x",
        );
        let posts = [&r1, &other, &r2];
        let stats = analyze_one(&ctx, ROOT, "did:plc:op", &posts);
        // r2's parent is someone else's reply, so each own-run has length 1.
        assert_eq!(stats.chain_depth, 1);
    }

    #[test]
    fn candidate_roots_includes_replied_originals() {
        let mut original = reply("at://did:plc:a/app.bsky.feed.post/o", "did:plc:a", ROOT, ROOT);
        original.reply_root = None;
        original.reply_parent = None;
        original.reply_count = 3;
        let candidate_reply = reply("at://did:plc:b/app.bsky.feed.post/r", "did:plc:b", ROOT, ROOT);

        let roots = candidate_roots(&[original.clone(), candidate_reply]);
        assert!(roots.contains(&original.uri));
        assert!(roots.contains(&ROOT.to_string()));
    }
}
