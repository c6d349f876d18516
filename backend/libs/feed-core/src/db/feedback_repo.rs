//! Explicit feedback log.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::models::{FeedbackDirection, FeedbackStrength};

#[derive(Clone)]
pub struct FeedbackRepo {
    pool: PgPool,
}

impl FeedbackRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn record(
        &self,
        user_did: &str,
        uri: &str,
        direction: FeedbackDirection,
        strength: FeedbackStrength,
    ) -> Result<()> {
        let direction = match direction {
            FeedbackDirection::More => "more",
            FeedbackDirection::Less => "less",
        };
        let strength = match strength {
            FeedbackStrength::Strong => "strong",
            FeedbackStrength::Weak => "weak",
        };
        sqlx::query(
            "INSERT INTO user_feedback_log (user_did, uri, direction, strength) VALUES ($1, $2, $3, $4)",
        )
        .bind(user_did)
        .bind(uri)
        .bind(direction)
        .bind(strength)
        .execute(&self.pool)
        .await
        .context("Failed to record feedback")?;
        Ok(())
    }

    /// URIs of positively-marked posts since `since` (semantic pipeline
    /// treats them like likes).
    pub async fn positive_uris(
        &self,
        user_did: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        sqlx::query_scalar(
            r#"
            SELECT DISTINCT uri FROM user_feedback_log
            WHERE user_did = $1 AND direction = 'more' AND created_at > $2
            "#,
        )
        .bind(user_did)
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .context("Feedback uris query failed")
    }
}
