//! Per-user keyword scores.

use anyhow::{Context, Result};
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::models::UserKeyword;

use super::INSERT_CHUNK;

#[derive(Clone)]
pub struct KeywordRepo {
    pool: PgPool,
}

impl KeywordRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn for_user(&self, user_did: &str) -> Result<Vec<UserKeyword>> {
        sqlx::query_as::<_, UserKeyword>("SELECT * FROM user_keyword WHERE user_did = $1")
            .bind(user_did)
            .fetch_all(&self.pool)
            .await
            .context("User keywords query failed")
    }

    /// Upsert a set of (keyword, score) pairs for the user.
    pub async fn upsert_scores(&self, user_did: &str, scores: &[(String, f64)]) -> Result<()> {
        for chunk in scores.chunks(INSERT_CHUNK) {
            let mut qb: QueryBuilder<Postgres> =
                QueryBuilder::new("INSERT INTO user_keyword (user_did, keyword, score) ");
            qb.push_values(chunk, |mut b, (keyword, score)| {
                b.push_bind(user_did).push_bind(keyword).push_bind(score);
            });
            qb.push(
                " ON CONFLICT (user_did, keyword) DO UPDATE SET \
                 score = EXCLUDED.score, updated_at = NOW()",
            );
            qb.build()
                .execute(&self.pool)
                .await
                .context("Failed to upsert keyword scores")?;
        }
        Ok(())
    }

    /// Remove entries whose magnitude dropped below the floor.
    pub async fn prune_below(&self, user_did: &str, floor: f64) -> Result<u64> {
        let res = sqlx::query("DELETE FROM user_keyword WHERE user_did = $1 AND abs(score) < $2")
            .bind(user_did)
            .bind(floor)
            .execute(&self.pool)
            .await
            .context("Keyword prune failed")?;
        Ok(res.rows_affected())
    }
}
