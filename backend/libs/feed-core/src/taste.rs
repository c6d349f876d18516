//! Taste-twin engine: co-like similarity counters and decaying reputation.
//!
//! Reputation updates are decay-then-multiply: the stored score first decays
//! by `decay_rate^(hours/24)` for the time since the last update, then the
//! action multiplier and its clamp apply. Concurrent updates to the same
//! (user, twin) pair are serialized through a sharded in-memory lock map;
//! cross-process the sequence is approximately-once by design.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::db::taste_repo::TasteRepo;
use crate::error::Result;
use crate::graph::GraphService;
use crate::models::{ReputationAction, TasteReputation};

/// Hard bounds on any reputation score.
pub const REPUTATION_FLOOR: f64 = 0.001;
pub const REPUTATION_CAP: f64 = 5.0;

/// Score given to a twin discovered by their first agreement.
pub const NEW_TWIN_SCORE: f64 = 1.2;

/// Bounds on the per-pair decay rate.
const DECAY_RATE_FLOOR: f64 = 0.5;
const DECAY_RATE_CAP: f64 = 0.999;
const DEFAULT_DECAY_RATE: f64 = 0.95;

/// Cap on external likers consulted per liked post.
const EXTERNAL_LIKERS_CAP: u32 = 100;

impl ReputationAction {
    /// (multiplier, action-specific bound). Positive actions cap, negative
    /// actions floor.
    fn multiplier_and_bound(&self) -> (f64, f64) {
        match self {
            Self::Agreement => (1.15, 3.0),
            Self::Disagreement => (0.85, 0.1),
            Self::ExplicitMore => (1.6, 5.0),
            Self::ExplicitLess => (0.1, 0.001),
            Self::ServedLiked => (1.05, REPUTATION_CAP),
            Self::ServedIgnored => (0.95, REPUTATION_FLOOR),
        }
    }

    fn is_positive(&self) -> bool {
        matches!(self, Self::Agreement | Self::ExplicitMore | Self::ServedLiked)
    }
}

/// Apply time decay, the action multiplier, bounds, and the decay-rate
/// nudge to a reputation row in place.
pub fn apply_reputation_action(
    rep: &mut TasteReputation,
    action: ReputationAction,
    now: DateTime<Utc>,
) {
    // Idempotent decay, keyed off updated_at.
    let hours = (now - rep.updated_at).num_milliseconds() as f64 / 3_600_000.0;
    if hours > 0.0 {
        rep.reputation_score *= rep.decay_rate.powf(hours / 24.0);
    }

    let (multiplier, bound) = action.multiplier_and_bound();
    rep.reputation_score *= multiplier;
    if action.is_positive() {
        rep.reputation_score = rep.reputation_score.min(bound);
    } else {
        rep.reputation_score = rep.reputation_score.max(bound);
    }
    rep.reputation_score = rep.reputation_score.clamp(REPUTATION_FLOOR, REPUTATION_CAP);

    // Agreements slow future decay, disagreements speed it up.
    if action.is_positive() {
        rep.decay_rate = (rep.decay_rate + 0.005).min(DECAY_RATE_CAP);
        rep.agreement_history += 1.0;
    } else {
        rep.decay_rate = (rep.decay_rate - 0.01).max(DECAY_RATE_FLOOR);
        rep.agreement_history -= 1.0;
    }

    rep.last_seen_at = Some(now);
    rep.updated_at = now;
}

/// A freshly-discovered twin row.
fn new_reputation(user_did: &str, similar_did: &str, now: DateTime<Utc>) -> TasteReputation {
    TasteReputation {
        user_did: user_did.to_string(),
        similar_user_did: similar_did.to_string(),
        reputation_score: 1.0,
        agreement_history: 0.0,
        last_seen_at: None,
        decay_rate: DEFAULT_DECAY_RATE,
        updated_at: now,
    }
}

/// Row created for a twin whose first recorded action is an agreement.
pub fn bootstrap_twin(user_did: &str, similar_did: &str, now: DateTime<Utc>) -> TasteReputation {
    let mut rep = new_reputation(user_did, similar_did, now);
    rep.reputation_score = NEW_TWIN_SCORE;
    rep.agreement_history = 1.0;
    rep.last_seen_at = Some(now);
    rep
}

#[derive(Clone)]
pub struct TasteEngine {
    taste_repo: TasteRepo,
    graph: GraphService,
    pair_locks: Arc<DashMap<(String, String), Arc<Mutex<()>>>>,
}

impl TasteEngine {
    pub fn new(taste_repo: TasteRepo, graph: GraphService) -> Self {
        Self {
            taste_repo,
            graph,
            pair_locks: Arc::new(DashMap::new()),
        }
    }

    /// React to a like by `user_did` on a post: credit every known co-liker
    /// as an agreement, then bootstrap twins from the post's external liker
    /// list (which reaches outside the follow graph).
    pub async fn on_like(
        &self,
        user_did: &str,
        post_uri: &str,
        co_likers: &[String],
    ) -> Result<()> {
        for other in co_likers {
            if other == user_did {
                continue;
            }
            self.taste_repo.record_agreement(user_did, other).await?;
            self.update_reputation(user_did, other, ReputationAction::Agreement)
                .await?;
        }

        let external = self
            .graph
            .post_likers(post_uri, EXTERNAL_LIKERS_CAP)
            .await;
        for liker in external {
            if liker == user_did {
                continue;
            }
            self.update_reputation(user_did, &liker, ReputationAction::Agreement)
                .await?;
        }
        Ok(())
    }

    /// Decay-then-multiply update of one (user, twin) pair, serialized per
    /// pair. First-ever agreement creates the row at the bootstrap score.
    pub async fn update_reputation(
        &self,
        user_did: &str,
        similar_did: &str,
        action: ReputationAction,
    ) -> Result<()> {
        let key = (user_did.to_string(), similar_did.to_string());
        let lock = self
            .pair_locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let now = Utc::now();
        let mut rep = match self.taste_repo.get_reputation(user_did, similar_did).await? {
            Some(rep) => rep,
            None => {
                if action == ReputationAction::Agreement {
                    let rep = bootstrap_twin(user_did, similar_did, now);
                    self.taste_repo.put_reputation(&rep).await?;
                    debug!(user = user_did, twin = similar_did, "New taste twin");
                    return Ok(());
                }
                new_reputation(user_did, similar_did, now)
            }
        };

        apply_reputation_action(&mut rep, action, now);
        if let Err(e) = self.taste_repo.put_reputation(&rep).await {
            warn!(user = user_did, twin = similar_did, error = %e, "Reputation write failed");
        }
        Ok(())
    }

    pub fn repo(&self) -> &TasteRepo {
        &self.taste_repo
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn rep_at(score: f64, decay_rate: f64, updated_at: DateTime<Utc>) -> TasteReputation {
        TasteReputation {
            user_did: "did:plc:u".into(),
            similar_user_did: "did:plc:v".into(),
            reputation_score: score,
            agreement_history: 0.0,
            last_seen_at: None,
            decay_rate,
            updated_at,
        }
    }

    #[test]
    fn first_agreement_bootstraps_at_one_point_two() {
        let now = Utc::now();
        let rep = bootstrap_twin("did:plc:u", "did:plc:x", now);
        assert_eq!(rep.reputation_score, 1.2);
        assert_eq!(rep.agreement_history, 1.0);
        assert_eq!(rep.last_seen_at, Some(now));
    }

    #[test]
    fn agreement_multiplies_and_caps() {
        let now = Utc::now();
        let mut rep = rep_at(2.9, 0.95, now);
        apply_reputation_action(&mut rep, ReputationAction::Agreement, now);
        // 2.9 * 1.15 = 3.335, capped at the agreement bound.
        assert_eq!(rep.reputation_score, 3.0);
    }

    #[test]
    fn explicit_less_floors_at_global_minimum() {
        let now = Utc::now();
        let mut rep = rep_at(0.005, 0.95, now);
        apply_reputation_action(&mut rep, ReputationAction::ExplicitLess, now);
        assert_eq!(rep.reputation_score, REPUTATION_FLOOR);
    }

    #[test]
    fn explicit_less_multiplies_by_tenth() {
        let now = Utc::now();
        let mut rep = rep_at(2.0, 0.95, now);
        apply_reputation_action(&mut rep, ReputationAction::ExplicitLess, now);
        assert!((rep.reputation_score - 0.2).abs() < 1e-9);
    }

    #[test]
    fn decay_applies_before_multiplier() {
        let then = Utc::now() - Duration::hours(24);
        let now = then + Duration::hours(24);
        let mut rep = rep_at(2.0, 0.5, then);
        apply_reputation_action(&mut rep, ReputationAction::ServedLiked, now);
        // One full day at decay 0.5 halves the score before the 1.05 boost.
        assert!((rep.reputation_score - 2.0 * 0.5 * 1.05).abs() < 1e-6);
    }

    #[test]
    fn decay_rate_nudges_stay_bounded() {
        let now = Utc::now();
        let mut rep = rep_at(1.0, 0.999, now);
        apply_reputation_action(&mut rep, ReputationAction::Agreement, now);
        assert!(rep.decay_rate <= 0.999);

        let mut rep = rep_at(1.0, 0.5, now);
        apply_reputation_action(&mut rep, ReputationAction::Disagreement, now);
        assert!(rep.decay_rate >= 0.5);
    }

    #[test]
    fn score_never_leaves_global_bounds() {
        let now = Utc::now();
        for action in [
            ReputationAction::Agreement,
            ReputationAction::Disagreement,
            ReputationAction::ExplicitMore,
            ReputationAction::ExplicitLess,
            ReputationAction::ServedLiked,
            ReputationAction::ServedIgnored,
        ] {
            let mut rep = rep_at(5.0, 0.999, now);
            apply_reputation_action(&mut rep, action, now);
            assert!(rep.reputation_score <= REPUTATION_CAP);
            assert!(rep.reputation_score >= REPUTATION_FLOOR);
        }
    }
}
