//! Small key/value state: the ingest cursor and per-user refresh stamps.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};

#[derive(Clone)]
pub struct MetaRepo {
    pool: PgPool,
}

impl MetaRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        sqlx::query_scalar("SELECT meta_value FROM meta WHERE meta_key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .context("Meta read failed")
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO meta (meta_key, meta_value, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (meta_key) DO UPDATE SET
                meta_value = EXCLUDED.meta_value,
                updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .context("Meta write failed")?;
        Ok(())
    }

    /// Ingest cursor for a named upstream service, in microseconds.
    pub async fn cursor(&self, service: &str) -> Result<Option<i64>> {
        let raw = self.get(&format!("cursor_{service}")).await?;
        Ok(raw.and_then(|v| v.parse().ok()))
    }

    /// Persist the cursor inside the flush transaction so it only advances
    /// when the batch commits.
    pub async fn set_cursor_tx(
        tx: &mut Transaction<'_, Postgres>,
        service: &str,
        time_us: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO meta (meta_key, meta_value, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (meta_key) DO UPDATE SET
                meta_value = EXCLUDED.meta_value,
                updated_at = NOW()
            "#,
        )
        .bind(format!("cursor_{service}"))
        .bind(time_us.to_string())
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Timestamp stamp used to debounce per-user graph rebuilds.
    pub async fn graph_last_update(&self, user_did: &str) -> Result<Option<DateTime<Utc>>> {
        let raw = self.get(&format!("graph_last_update_{user_did}")).await?;
        Ok(raw.and_then(|v| v.parse::<DateTime<Utc>>().ok()))
    }

    pub async fn stamp_graph_update(&self, user_did: &str, at: DateTime<Utc>) -> Result<()> {
        self.set(&format!("graph_last_update_{user_did}"), &at.to_rfc3339())
            .await
    }
}
