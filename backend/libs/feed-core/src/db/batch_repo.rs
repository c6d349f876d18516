//! Materialized semantic candidate batches.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::models::CandidateBatchRow;

use super::{with_contention_retry, INSERT_CHUNK};

#[derive(Clone)]
pub struct BatchRepo {
    pool: PgPool,
}

impl BatchRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a freshly generated batch. Retried on store contention since
    /// the semantic pipeline competes with serve-time readers.
    pub async fn insert_batch(&self, rows: &[CandidateBatchRow]) -> Result<()> {
        for chunk in rows.chunks(INSERT_CHUNK) {
            with_contention_retry("candidate_batch_insert", || self.insert_chunk(chunk))
                .await
                .context("Failed to insert candidate batch")?;
        }
        Ok(())
    }

    async fn insert_chunk(&self, chunk: &[CandidateBatchRow]) -> Result<(), sqlx::Error> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO user_candidate_batch \
             (user_did, uri, semantic_score, pipeline_score, centroid_id, batch_id, generated_at) ",
        );
        qb.push_values(chunk, |mut b, row| {
            b.push_bind(&row.user_did)
                .push_bind(&row.uri)
                .push_bind(row.semantic_score)
                .push_bind(row.pipeline_score)
                .push_bind(row.centroid_id)
                .push_bind(&row.batch_id)
                .push_bind(row.generated_at);
        });
        qb.build().execute(&self.pool).await?;
        Ok(())
    }

    /// Batch rows for the user within the TTL, newest batches first.
    pub async fn load_fresh(&self, user_did: &str, ttl: Duration) -> Result<Vec<CandidateBatchRow>> {
        let cutoff = Utc::now() - ttl;
        sqlx::query_as::<_, CandidateBatchRow>(
            r#"
            SELECT * FROM user_candidate_batch
            WHERE user_did = $1 AND generated_at > $2
            ORDER BY generated_at DESC, semantic_score DESC
            "#,
        )
        .bind(user_did)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .context("Candidate batch query failed")
    }

    /// All URIs any batch still references for this user (orphan-point GC
    /// keeps these embeddings alive).
    pub async fn referenced_uris(&self, user_did: &str) -> Result<Vec<String>> {
        sqlx::query_scalar(
            "SELECT DISTINCT uri FROM user_candidate_batch WHERE user_did = $1",
        )
        .bind(user_did)
        .fetch_all(&self.pool)
        .await
        .context("Referenced uris query failed")
    }

    pub async fn gc_expired(&self, ttl: Duration) -> Result<u64> {
        let cutoff = Utc::now() - ttl;
        let res = sqlx::query("DELETE FROM user_candidate_batch WHERE generated_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .context("Candidate batch GC failed")?;
        Ok(res.rows_affected())
    }
}
