//! Step B: network effort.
//!
//! For every candidate, aggregate the interactions coming from the user's
//! Layer-1 and from the cached influential Layer-2: how many likes and
//! reposts, which actors, and the first L1 repost record (which becomes the
//! feed "reason").

use std::collections::{HashMap, HashSet};

use chrono::Duration;
use tracing::{debug, warn};

use feed_core::clients::appview::HYDRATION_CHUNK;
use feed_core::clients::AppViewClient;
use feed_core::db::graph_repo::GraphRepo;
use feed_core::models::{InteractionKind, Post};

use crate::error::Result;

use super::context::RankContext;

/// Influential-L2 cache TTL. 24 h is tolerated, 72 h is the refresh bound.
const INFLUENTIAL_TTL_HOURS: i64 = 72;

/// How many influential L2 accounts are kept per user.
const INFLUENTIAL_KEEP: usize = 100;

/// How many L2 candidates get a profile lookup per refresh.
const INFLUENTIAL_PROFILE_LOOKUPS: usize = 300;

#[derive(Debug, Clone, Default)]
pub struct NetworkEffort {
    pub likes: u32,
    pub reposts: u32,
    pub actors: HashSet<String>,
    pub repost_uri: Option<String>,
    pub repost_from_l1: bool,
}

/// `(l1_count / √total_followers) · l1_count`: well-connected-to-the-user
/// but small accounts rank highest.
pub fn influence_score(l1_count: i64, total_followers: i64) -> f64 {
    if l1_count <= 0 {
        return 0.0;
    }
    let total = total_followers.max(1) as f64;
    (l1_count as f64 / total.sqrt()) * l1_count as f64
}

pub async fn network_effort(
    ctx: &RankContext,
    candidates: &[Post],
    graph_repo: &GraphRepo,
    appview: &AppViewClient,
) -> Result<HashMap<String, NetworkEffort>> {
    let influential = ensure_influential_l2(ctx, graph_repo, appview).await?;

    let actors: Vec<String> = ctx
        .l1
        .iter()
        .cloned()
        .chain(influential.iter().cloned())
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    if actors.is_empty() {
        return Ok(HashMap::new());
    }

    let targets: Vec<String> = candidates.iter().map(|p| p.uri.clone()).collect();
    let edges = graph_repo.interactions_for_targets(&targets, &actors).await?;

    let mut effort: HashMap<String, NetworkEffort> = HashMap::new();
    for edge in edges {
        let entry = effort.entry(edge.target.clone()).or_default();
        match InteractionKind::parse(&edge.interaction_type) {
            Some(InteractionKind::Like) => entry.likes += 1,
            Some(InteractionKind::Repost) => {
                entry.reposts += 1;
                if entry.repost_uri.is_none() && ctx.l1.contains(&edge.actor) {
                    entry.repost_uri = edge.interaction_uri.clone();
                    entry.repost_from_l1 = true;
                }
            }
            _ => {}
        }
        entry.actors.insert(edge.actor);
    }

    debug!(
        user = %ctx.user_did,
        targets_with_effort = effort.len(),
        "Network effort aggregated"
    );
    Ok(effort)
}

/// Cached influential-L2 DIDs, recomputed at most once per TTL.
async fn ensure_influential_l2(
    ctx: &RankContext,
    graph_repo: &GraphRepo,
    appview: &AppViewClient,
) -> Result<HashSet<String>> {
    let cached = graph_repo
        .influential_l2(&ctx.user_did, Duration::hours(INFLUENTIAL_TTL_HOURS))
        .await?;
    if !cached.is_empty() {
        return Ok(cached.into_iter().map(|row| row.l2_did).collect());
    }

    if ctx.l2.is_empty() {
        return Ok(HashSet::new());
    }
    let l1_vec: Vec<String> = ctx.l1.iter().cloned().collect();
    let l2_vec: Vec<String> = ctx.l2.iter().cloned().collect();

    // How many of the user's L1 follow each L2 candidate.
    let l1_counts = graph_repo.l1_follower_counts(&l2_vec, &l1_vec).await?;
    let mut ranked: Vec<(String, i64)> = l1_counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked.truncate(INFLUENTIAL_PROFILE_LOOKUPS);

    // Total follower counts from the AppView, falling back to the local
    // graph when the profile fetch fails.
    let lookup_dids: Vec<String> = ranked.iter().map(|(did, _)| did.clone()).collect();
    let mut total_followers: HashMap<String, i64> = HashMap::new();
    for chunk in lookup_dids.chunks(HYDRATION_CHUNK) {
        match appview.get_follower_counts(chunk).await {
            Ok(counts) => total_followers.extend(counts),
            Err(e) => {
                warn!(error = %e, "Profile fetch failed, using local follower counts");
                let local = graph_repo.local_follower_counts(chunk).await?;
                total_followers.extend(local);
            }
        }
    }

    let mut scored: Vec<(String, f64, i32)> = ranked
        .into_iter()
        .map(|(did, l1_count)| {
            let total = total_followers.get(&did).copied().unwrap_or(l1_count);
            let score = influence_score(l1_count, total);
            (did, score, l1_count as i32)
        })
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(INFLUENTIAL_KEEP);

    graph_repo
        .replace_influential_l2(&ctx.user_did, &scored)
        .await?;
    Ok(scored.into_iter().map(|(did, _, _)| did).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn influence_prefers_dense_small_accounts() {
        // 10 of the user's L1 follow a 100-follower account.
        let dense = influence_score(10, 100);
        // 10 L1 follow a 1M-follower account.
        let celebrity = influence_score(10, 1_000_000);
        assert!(dense > celebrity);
    }

    #[test]
    fn influence_handles_degenerate_counts() {
        assert_eq!(influence_score(0, 100), 0.0);
        assert!(influence_score(3, 0) > 0.0);
    }
}
