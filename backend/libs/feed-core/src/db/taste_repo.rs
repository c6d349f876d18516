//! Taste similarity counters and taste reputation rows.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;

use crate::models::{TasteReputation, TasteSimilarity};

#[derive(Clone)]
pub struct TasteRepo {
    pool: PgPool,
}

impl TasteRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record one more co-liked post between U and X. Creates the pair on
    /// first agreement.
    pub async fn record_agreement(&self, user_did: &str, similar_did: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO taste_similarity
                (user_did, similar_user_did, agreement_count, total_co_liked_posts, last_agreement_at, updated_at)
            VALUES ($1, $2, 1, 1, NOW(), NOW())
            ON CONFLICT (user_did, similar_user_did) DO UPDATE SET
                agreement_count = taste_similarity.agreement_count + 1,
                total_co_liked_posts = taste_similarity.total_co_liked_posts + 1,
                last_agreement_at = NOW(),
                updated_at = NOW()
            "#,
        )
        .bind(user_did)
        .bind(similar_did)
        .execute(&self.pool)
        .await
        .context("Failed to record taste agreement")?;
        Ok(())
    }

    pub async fn get_similarity(
        &self,
        user_did: &str,
        similar_did: &str,
    ) -> Result<Option<TasteSimilarity>> {
        sqlx::query_as::<_, TasteSimilarity>(
            "SELECT * FROM taste_similarity WHERE user_did = $1 AND similar_user_did = $2",
        )
        .bind(user_did)
        .bind(similar_did)
        .fetch_optional(&self.pool)
        .await
        .context("Taste similarity query failed")
    }

    pub async fn get_reputation(
        &self,
        user_did: &str,
        similar_did: &str,
    ) -> Result<Option<TasteReputation>> {
        sqlx::query_as::<_, TasteReputation>(
            "SELECT * FROM taste_reputation WHERE user_did = $1 AND similar_user_did = $2",
        )
        .bind(user_did)
        .bind(similar_did)
        .fetch_optional(&self.pool)
        .await
        .context("Taste reputation query failed")
    }

    /// Write a fully-computed reputation row. The engine computes decay and
    /// multipliers first; this is a plain upsert of the result.
    pub async fn put_reputation(&self, rep: &TasteReputation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO taste_reputation
                (user_did, similar_user_did, reputation_score, agreement_history,
                 last_seen_at, decay_rate, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (user_did, similar_user_did) DO UPDATE SET
                reputation_score = EXCLUDED.reputation_score,
                agreement_history = EXCLUDED.agreement_history,
                last_seen_at = EXCLUDED.last_seen_at,
                decay_rate = EXCLUDED.decay_rate,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&rep.user_did)
        .bind(&rep.similar_user_did)
        .bind(rep.reputation_score)
        .bind(rep.agreement_history)
        .bind(rep.last_seen_at)
        .bind(rep.decay_rate)
        .bind(rep.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to upsert taste reputation")?;
        Ok(())
    }

    /// The user's taste-twins at or above `min_score`, strongest first.
    pub async fn top_twins(
        &self,
        user_did: &str,
        min_score: f64,
        limit: i64,
    ) -> Result<Vec<(String, f64)>> {
        sqlx::query_as(
            r#"
            SELECT similar_user_did, reputation_score FROM taste_reputation
            WHERE user_did = $1 AND reputation_score >= $2
            ORDER BY reputation_score DESC
            LIMIT $3
            "#,
        )
        .bind(user_did)
        .bind(min_score)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Top twins query failed")
    }

    /// Reputation scores the user holds for the given DIDs.
    pub async fn reputations_for(
        &self,
        user_did: &str,
        dids: &[String],
    ) -> Result<HashMap<String, f64>> {
        if dids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows: Vec<(String, f64)> = sqlx::query_as(
            r#"
            SELECT similar_user_did, reputation_score FROM taste_reputation
            WHERE user_did = $1 AND similar_user_did = ANY($2)
            "#,
        )
        .bind(user_did)
        .bind(dids)
        .fetch_all(&self.pool)
        .await
        .context("Reputations query failed")?;
        Ok(rows.into_iter().collect())
    }

    /// Twin DIDs above `min_score` across all of the given users. Used to
    /// widen the tracked-interaction set.
    pub async fn high_reputation_twins(
        &self,
        user_dids: &[String],
        min_score: f64,
    ) -> Result<Vec<String>> {
        if user_dids.is_empty() {
            return Ok(Vec::new());
        }
        sqlx::query_scalar(
            r#"
            SELECT DISTINCT similar_user_did FROM taste_reputation
            WHERE user_did = ANY($1) AND reputation_score >= $2
            "#,
        )
        .bind(user_dids)
        .bind(min_score)
        .fetch_all(&self.pool)
        .await
        .context("High reputation twins query failed")
    }

    /// Timestamp-bearing read used by tests and the engine's decay path.
    pub async fn last_updated(
        &self,
        user_did: &str,
        similar_did: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        sqlx::query_scalar(
            "SELECT updated_at FROM taste_reputation WHERE user_did = $1 AND similar_user_did = $2",
        )
        .bind(user_did)
        .bind(similar_did)
        .fetch_optional(&self.pool)
        .await
        .context("Reputation timestamp query failed")
    }
}
