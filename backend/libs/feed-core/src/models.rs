//! Domain models mirroring the store schema.
//!
//! All identifiers (DIDs, record URIs) are opaque strings; timestamps are
//! UTC. Row structs derive `sqlx::FromRow` and map 1:1 onto the migration
//! schema.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upper bound applied to post text at ingest; anything longer is truncated
/// on a char boundary before it reaches the store.
pub const MAX_POST_TEXT_CHARS: usize = 10_000;

/// An indexed post. Counter columns are maintained by the ingester's
/// batched flush and are never negative.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Post {
    pub uri: String,
    pub cid: String,
    pub indexed_at: DateTime<Utc>,
    pub author: String,
    pub like_count: i32,
    pub reply_count: i32,
    pub repost_count: i32,
    pub reply_root: Option<String>,
    pub reply_parent: Option<String>,
    #[sqlx(rename = "content_text")]
    pub text: Option<String>,
    pub has_image: bool,
    pub has_video: bool,
    pub has_external: bool,
}

impl Post {
    pub fn is_reply(&self) -> bool {
        self.reply_parent.is_some()
    }

    /// Age in fractional hours relative to `now`.
    pub fn age_hours(&self, now: DateTime<Utc>) -> f64 {
        (now - self.indexed_at).num_milliseconds() as f64 / 3_600_000.0
    }

    pub fn engagement(&self) -> i64 {
        self.like_count as i64 + self.reply_count as i64 + self.repost_count as i64
    }
}

/// Interaction edge types observed on the firehose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionKind {
    Like,
    Repost,
    Reply,
}

impl InteractionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Repost => "repost",
            Self::Reply => "reply",
        }
    }

    /// Edge weight used for network-effort aggregation.
    pub fn weight(&self) -> i32 {
        match self {
            Self::Like => 1,
            Self::Repost => 2,
            Self::Reply => 1,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "like" => Some(Self::Like),
            "repost" => Some(Self::Repost),
            "reply" => Some(Self::Reply),
            _ => None,
        }
    }
}

impl std::fmt::Display for InteractionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InteractionEdge {
    pub actor: String,
    pub target: String,
    pub interaction_type: String,
    pub weight: i32,
    pub interaction_uri: Option<String>,
    pub indexed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InfluentialL2 {
    pub user_did: String,
    pub l2_did: String,
    pub influence_score: f64,
    pub l1_follower_count: i32,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TasteSimilarity {
    pub user_did: String,
    pub similar_user_did: String,
    pub agreement_count: i32,
    pub total_co_liked_posts: i32,
    pub last_agreement_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Decaying reputation of a taste-twin. `reputation_score` stays within
/// [0.001, 5.0]; `decay_rate` within [0.5, 0.999].
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TasteReputation {
    pub user_did: String,
    pub similar_user_did: String,
    pub reputation_score: f64,
    pub agreement_history: f64,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub decay_rate: f64,
    pub updated_at: DateTime<Utc>,
}

/// Per-(user, author) serving fatigue and affinity.
/// `fatigue_score` ∈ [-100, 100], `affinity_score` ∈ [0.1, 10].
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AuthorFatigue {
    pub user_did: String,
    pub author_did: String,
    pub serve_count: i32,
    pub last_served_at: Option<DateTime<Utc>>,
    pub fatigue_score: f64,
    pub affinity_score: f64,
    pub interaction_weight: f64,
    pub last_interaction_at: Option<DateTime<Utc>>,
    pub interaction_count: i32,
    pub updated_at: DateTime<Utc>,
}

impl AuthorFatigue {
    pub fn fresh(user_did: &str, author_did: &str, now: DateTime<Utc>) -> Self {
        Self {
            user_did: user_did.to_string(),
            author_did: author_did.to_string(),
            serve_count: 0,
            last_served_at: None,
            fatigue_score: 0.0,
            affinity_score: 1.0,
            interaction_weight: 0.0,
            last_interaction_at: None,
            interaction_count: 0,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserKeyword {
    pub user_did: String,
    pub keyword: String,
    pub score: f64,
    pub updated_at: DateTime<Utc>,
}

/// One row of a materialized semantic candidate batch.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CandidateBatchRow {
    pub user_did: String,
    pub uri: String,
    pub semantic_score: f64,
    pub pipeline_score: f64,
    pub centroid_id: i32,
    pub batch_id: String,
    pub generated_at: DateTime<Utc>,
}

/// Explicit feedback direction sent by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackDirection {
    More,
    Less,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackStrength {
    Strong,
    Weak,
}

/// Actions that mutate a taste-twin's reputation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReputationAction {
    Agreement,
    Disagreement,
    ExplicitMore,
    ExplicitLess,
    ServedLiked,
    ServedIgnored,
}

/// Strip embedded NULs (Postgres TEXT rejects them) and truncate oversized
/// text on a char boundary.
pub fn sanitize_text(raw: &str) -> String {
    let cleaned: String = raw.chars().filter(|c| *c != '\u{0000}').collect();
    if cleaned.chars().count() <= MAX_POST_TEXT_CHARS {
        return cleaned;
    }
    cleaned.chars().take(MAX_POST_TEXT_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_nul_bytes() {
        assert_eq!(sanitize_text("he\u{0000}llo"), "hello");
    }

    #[test]
    fn sanitize_truncates_on_char_boundary() {
        let long: String = "ß".repeat(MAX_POST_TEXT_CHARS + 10);
        let out = sanitize_text(&long);
        assert_eq!(out.chars().count(), MAX_POST_TEXT_CHARS);
    }

    #[test]
    fn interaction_kind_round_trips() {
        for kind in [
            InteractionKind::Like,
            InteractionKind::Repost,
            InteractionKind::Reply,
        ] {
            assert_eq!(InteractionKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(InteractionKind::parse("view"), None);
    }

    #[test]
    fn repost_weight_is_double() {
        assert_eq!(InteractionKind::Repost.weight(), 2);
        assert_eq!(InteractionKind::Like.weight(), 1);
    }
}
