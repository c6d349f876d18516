//! Served / seen logs.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::collections::HashMap;

use super::INSERT_CHUNK;

#[derive(Clone)]
pub struct ServingRepo {
    pool: PgPool,
}

impl ServingRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// One row per URI placed in a feed response.
    pub async fn record_served(&self, user_did: &str, uris: &[String]) -> Result<()> {
        for chunk in uris.chunks(INSERT_CHUNK) {
            let mut qb: QueryBuilder<Postgres> =
                QueryBuilder::new("INSERT INTO user_served_post (user_did, uri) ");
            qb.push_values(chunk, |mut b, uri| {
                b.push_bind(user_did).push_bind(uri);
            });
            qb.build()
                .execute(&self.pool)
                .await
                .context("Failed to record served posts")?;
        }
        Ok(())
    }

    /// One row per URI the client reported visible.
    pub async fn record_seen(&self, user_did: &str, uris: &[String]) -> Result<()> {
        for chunk in uris.chunks(INSERT_CHUNK) {
            let mut qb: QueryBuilder<Postgres> =
                QueryBuilder::new("INSERT INTO user_seen_post (user_did, uri) ");
            qb.push_values(chunk, |mut b, uri| {
                b.push_bind(user_did).push_bind(uri);
            });
            qb.build()
                .execute(&self.pool)
                .await
                .context("Failed to record seen posts")?;
        }
        Ok(())
    }

    /// Seen-row count per URI for the user.
    pub async fn seen_counts(&self, user_did: &str) -> Result<HashMap<String, i64>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT uri, COUNT(*) FROM user_seen_post WHERE user_did = $1 GROUP BY uri",
        )
        .bind(user_did)
        .fetch_all(&self.pool)
        .await
        .context("Seen counts query failed")?;
        Ok(rows.into_iter().collect())
    }

    /// Distinct URIs the user has seen (for consumption accounting).
    pub async fn seen_uris(&self, user_did: &str) -> Result<Vec<String>> {
        sqlx::query_scalar("SELECT DISTINCT uri FROM user_seen_post WHERE user_did = $1")
            .bind(user_did)
            .fetch_all(&self.pool)
            .await
            .context("Seen uris query failed")
    }

    pub async fn gc_served(&self, max_age: Duration) -> Result<u64> {
        let cutoff = Utc::now() - max_age;
        let res = sqlx::query("DELETE FROM user_served_post WHERE served_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .context("Served log GC failed")?;
        Ok(res.rows_affected())
    }

    pub async fn gc_seen(&self, max_age: Duration) -> Result<u64> {
        let cutoff = Utc::now() - max_age;
        let res = sqlx::query("DELETE FROM user_seen_post WHERE seen_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .context("Seen log GC failed")?;
        Ok(res.rows_affected())
    }
}
