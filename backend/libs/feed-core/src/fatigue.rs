//! Author fatigue/affinity engine.
//!
//! Fatigue rises when an author keeps getting served and falls when the
//! user actually engages with them; affinity moves the other way. Both are
//! hard-clamped: fatigue ∈ [-100, 100], affinity ∈ [0.1, 10].

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::db::fatigue_repo::FatigueRepo;
use crate::error::Result;
use crate::models::{AuthorFatigue, FeedbackDirection, FeedbackStrength, InteractionKind};

pub const FATIGUE_MIN: f64 = -100.0;
pub const FATIGUE_MAX: f64 = 100.0;
pub const AFFINITY_MIN: f64 = 0.1;
pub const AFFINITY_MAX: f64 = 10.0;

/// Serve-count bands and their fatigue increments.
const SERVE_BAND_LOW: i32 = 5;
const SERVE_BAND_MID: i32 = 15;

/// An interaction after this long counts as a reconnection and earns a
/// bonus credit.
const RECONNECT_HOURS: i64 = 72;

fn clamp_row(row: &mut AuthorFatigue) {
    row.fatigue_score = row.fatigue_score.clamp(FATIGUE_MIN, FATIGUE_MAX);
    row.affinity_score = row.affinity_score.clamp(AFFINITY_MIN, AFFINITY_MAX);
}

/// Serve-time update: time recovery first, then the band increment and the
/// passive affinity cooldown.
pub fn apply_serve(row: &mut AuthorFatigue, now: DateTime<Utc>) {
    if let Some(last) = row.last_served_at {
        let hours = (now - last).num_hours();
        if hours >= 48 {
            row.fatigue_score *= 0.7;
        } else if hours >= 24 {
            row.fatigue_score *= 0.85;
        }
    }

    row.serve_count += 1;
    row.fatigue_score += if row.serve_count <= SERVE_BAND_LOW {
        3.0
    } else if row.serve_count <= SERVE_BAND_MID {
        5.0
    } else {
        8.0
    };
    row.affinity_score -= 0.05;

    row.last_served_at = Some(now);
    row.updated_at = now;
    clamp_row(row);
}

/// Engagement update: type-specific fatigue relief and affinity credit,
/// with a reconnection bonus after a long gap.
pub fn apply_interaction(row: &mut AuthorFatigue, kind: InteractionKind, now: DateTime<Utc>) {
    let (fatigue_delta, affinity_delta) = match kind {
        InteractionKind::Like => (-25.0, 0.8),
        InteractionKind::Repost => (-30.0, 1.2),
        InteractionKind::Reply => (-20.0, 0.5),
    };

    let reconnect = match row.last_interaction_at {
        Some(last) => (now - last).num_hours() >= RECONNECT_HOURS,
        None => row.interaction_count == 0,
    };

    row.fatigue_score += fatigue_delta;
    row.affinity_score += affinity_delta;
    if reconnect {
        row.fatigue_score -= 10.0;
        row.affinity_score += 0.3;
    }

    row.interaction_weight += kind.weight() as f64;
    row.interaction_count += 1;
    row.last_interaction_at = Some(now);
    row.updated_at = now;
    clamp_row(row);
}

/// Explicit more/less feedback on the author.
pub fn apply_feedback(
    row: &mut AuthorFatigue,
    direction: FeedbackDirection,
    strength: FeedbackStrength,
    now: DateTime<Utc>,
) {
    let (affinity_delta, fatigue_delta) = match strength {
        FeedbackStrength::Strong => (5.0, 60.0),
        FeedbackStrength::Weak => (1.0, 20.0),
    };
    match direction {
        FeedbackDirection::More => {
            row.affinity_score += affinity_delta;
            row.fatigue_score -= fatigue_delta;
        }
        FeedbackDirection::Less => {
            row.affinity_score -= affinity_delta;
            row.fatigue_score += fatigue_delta;
        }
    }
    row.updated_at = now;
    clamp_row(row);
}

/// Seen-report cooldown: visibility without engagement slowly drains
/// affinity.
pub fn apply_seen_decay(row: &mut AuthorFatigue, now: DateTime<Utc>) {
    row.affinity_score -= 0.02;
    row.updated_at = now;
    clamp_row(row);
}

#[derive(Clone)]
pub struct FatigueEngine {
    fatigue_repo: FatigueRepo,
}

impl FatigueEngine {
    pub fn new(fatigue_repo: FatigueRepo) -> Self {
        Self { fatigue_repo }
    }

    async fn load_or_fresh(&self, user_did: &str, author_did: &str) -> Result<AuthorFatigue> {
        Ok(self
            .fatigue_repo
            .get(user_did, author_did)
            .await?
            .unwrap_or_else(|| AuthorFatigue::fresh(user_did, author_did, Utc::now())))
    }

    pub async fn on_serve(&self, user_did: &str, author_did: &str) -> Result<()> {
        let mut row = self.load_or_fresh(user_did, author_did).await?;
        apply_serve(&mut row, Utc::now());
        Ok(self.fatigue_repo.put(&row).await?)
    }

    pub async fn on_interaction(
        &self,
        user_did: &str,
        author_did: &str,
        kind: InteractionKind,
    ) -> Result<()> {
        let mut row = self.load_or_fresh(user_did, author_did).await?;
        apply_interaction(&mut row, kind, Utc::now());
        debug!(
            user = user_did,
            author = author_did,
            kind = %kind,
            fatigue = row.fatigue_score,
            "Interaction credited against fatigue"
        );
        Ok(self.fatigue_repo.put(&row).await?)
    }

    pub async fn on_feedback(
        &self,
        user_did: &str,
        author_did: &str,
        direction: FeedbackDirection,
        strength: FeedbackStrength,
    ) -> Result<()> {
        let mut row = self.load_or_fresh(user_did, author_did).await?;
        apply_feedback(&mut row, direction, strength, Utc::now());
        Ok(self.fatigue_repo.put(&row).await?)
    }

    pub async fn on_seen(&self, user_did: &str, author_did: &str) -> Result<()> {
        let mut row = self.load_or_fresh(user_did, author_did).await?;
        apply_seen_decay(&mut row, Utc::now());
        Ok(self.fatigue_repo.put(&row).await?)
    }

    pub fn repo(&self) -> &FatigueRepo {
        &self.fatigue_repo
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn fresh() -> AuthorFatigue {
        AuthorFatigue::fresh("did:plc:u", "did:plc:a", Utc::now())
    }

    #[test]
    fn serve_bands_escalate() {
        let now = Utc::now();
        let mut row = fresh();
        apply_serve(&mut row, now);
        assert_eq!(row.serve_count, 1);
        assert!((row.fatigue_score - 3.0).abs() < 1e-9);

        row.serve_count = SERVE_BAND_LOW;
        let before = row.fatigue_score;
        apply_serve(&mut row, now);
        assert!((row.fatigue_score - (before + 5.0)).abs() < 1e-9);

        row.serve_count = SERVE_BAND_MID;
        let before = row.fatigue_score;
        apply_serve(&mut row, now);
        assert!((row.fatigue_score - (before + 8.0)).abs() < 1e-9);
    }

    #[test]
    fn serve_applies_time_recovery() {
        let now = Utc::now();
        let mut row = fresh();
        row.fatigue_score = 50.0;
        row.last_served_at = Some(now - Duration::hours(49));
        apply_serve(&mut row, now);
        // 30% recovery then the first-band increment.
        assert!((row.fatigue_score - (50.0 * 0.7 + 3.0)).abs() < 1e-9);
    }

    #[test]
    fn like_relieves_fatigue_and_builds_affinity() {
        let now = Utc::now();
        let mut row = fresh();
        row.fatigue_score = 40.0;
        row.interaction_count = 1;
        row.last_interaction_at = Some(now - Duration::hours(1));
        apply_interaction(&mut row, InteractionKind::Like, now);
        assert!((row.fatigue_score - 15.0).abs() < 1e-9);
        assert!((row.affinity_score - 1.8).abs() < 1e-9);
        assert_eq!(row.interaction_count, 2);
    }

    #[test]
    fn first_interaction_in_three_days_earns_bonus() {
        let now = Utc::now();
        let mut row = fresh();
        row.last_interaction_at = Some(now - Duration::hours(RECONNECT_HOURS + 1));
        row.interaction_count = 3;
        apply_interaction(&mut row, InteractionKind::Reply, now);
        // -20 - 10 bonus fatigue, +0.5 + 0.3 bonus affinity.
        assert!((row.fatigue_score - (-30.0)).abs() < 1e-9);
        assert!((row.affinity_score - 1.8).abs() < 1e-9);
    }

    #[test]
    fn strong_less_feedback_moves_both_axes() {
        let now = Utc::now();
        let mut row = fresh();
        row.affinity_score = 6.0;
        apply_feedback(
            &mut row,
            FeedbackDirection::Less,
            FeedbackStrength::Strong,
            now,
        );
        assert!((row.affinity_score - 1.0).abs() < 1e-9);
        assert!((row.fatigue_score - 60.0).abs() < 1e-9);
    }

    #[test]
    fn clamps_hold_under_extremes() {
        let now = Utc::now();
        let mut row = fresh();
        row.fatigue_score = 95.0;
        row.serve_count = 100;
        for _ in 0..10 {
            apply_serve(&mut row, now);
        }
        assert!(row.fatigue_score <= FATIGUE_MAX);
        assert!(row.affinity_score >= AFFINITY_MIN);

        let mut row = fresh();
        row.fatigue_score = -95.0;
        for _ in 0..10 {
            apply_interaction(&mut row, InteractionKind::Repost, now);
        }
        assert!(row.fatigue_score >= FATIGUE_MIN);
        assert!(row.affinity_score <= AFFINITY_MAX);
    }
}
