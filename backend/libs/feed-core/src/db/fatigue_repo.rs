//! Author fatigue rows.

use anyhow::{Context, Result};
use sqlx::PgPool;
use std::collections::HashMap;

use crate::models::AuthorFatigue;

#[derive(Clone)]
pub struct FatigueRepo {
    pool: PgPool,
}

impl FatigueRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, user_did: &str, author_did: &str) -> Result<Option<AuthorFatigue>> {
        sqlx::query_as::<_, AuthorFatigue>(
            "SELECT * FROM user_author_fatigue WHERE user_did = $1 AND author_did = $2",
        )
        .bind(user_did)
        .bind(author_did)
        .fetch_optional(&self.pool)
        .await
        .context("Author fatigue query failed")
    }

    /// All fatigue rows the user holds, keyed by author.
    pub async fn map_for_user(&self, user_did: &str) -> Result<HashMap<String, AuthorFatigue>> {
        let rows = sqlx::query_as::<_, AuthorFatigue>(
            "SELECT * FROM user_author_fatigue WHERE user_did = $1",
        )
        .bind(user_did)
        .fetch_all(&self.pool)
        .await
        .context("Author fatigue map query failed")?;
        Ok(rows
            .into_iter()
            .map(|row| (row.author_did.clone(), row))
            .collect())
    }

    /// Write a fully-computed fatigue row. The engine owns the band math
    /// and clamps; this is a plain upsert of the result.
    pub async fn put(&self, row: &AuthorFatigue) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_author_fatigue
                (user_did, author_did, serve_count, last_served_at, fatigue_score,
                 affinity_score, interaction_weight, last_interaction_at, interaction_count, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (user_did, author_did) DO UPDATE SET
                serve_count = EXCLUDED.serve_count,
                last_served_at = EXCLUDED.last_served_at,
                fatigue_score = EXCLUDED.fatigue_score,
                affinity_score = EXCLUDED.affinity_score,
                interaction_weight = EXCLUDED.interaction_weight,
                last_interaction_at = EXCLUDED.last_interaction_at,
                interaction_count = EXCLUDED.interaction_count,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&row.user_did)
        .bind(&row.author_did)
        .bind(row.serve_count)
        .bind(row.last_served_at)
        .bind(row.fatigue_score)
        .bind(row.affinity_score)
        .bind(row.interaction_weight)
        .bind(row.last_interaction_at)
        .bind(row.interaction_count)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to upsert author fatigue")?;
        Ok(())
    }
}
