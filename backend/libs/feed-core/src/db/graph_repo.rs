//! Follow edges, interaction edges, and the influential-L2 cache.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use std::collections::{HashMap, HashSet};

use crate::models::{InfluentialL2, InteractionEdge, InteractionKind};

use super::INSERT_CHUNK;

/// A pending interaction edge produced by the ingester.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewInteraction {
    pub actor: String,
    pub target: String,
    pub kind: InteractionKind,
    pub interaction_uri: Option<String>,
    pub indexed_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct GraphRepo {
    pool: PgPool,
}

impl GraphRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert follow edges fetched from the external graph. Existing pairs
    /// are left untouched.
    pub async fn insert_follows(&self, follower: &str, followees: &[String]) -> Result<()> {
        for chunk in followees.chunks(INSERT_CHUNK) {
            let mut qb: QueryBuilder<Postgres> =
                QueryBuilder::new("INSERT INTO graph_follow (follower, followee) ");
            qb.push_values(chunk, |mut b, followee| {
                b.push_bind(follower).push_bind(followee);
            });
            qb.push(" ON CONFLICT (follower, followee) DO NOTHING");
            qb.build()
                .execute(&self.pool)
                .await
                .context("Failed to insert follow edges")?;
        }
        Ok(())
    }

    /// Accounts the user directly follows (Layer-1).
    pub async fn l1_follows(&self, user_did: &str) -> Result<Vec<String>> {
        sqlx::query_scalar("SELECT followee FROM graph_follow WHERE follower = $1")
            .bind(user_did)
            .fetch_all(&self.pool)
            .await
            .context("L1 follows query failed")
    }

    /// Accounts followed by the user's Layer-1 (Layer-2), excluding the
    /// L1 set and the user.
    pub async fn l2_follows(&self, user_did: &str, l1: &[String]) -> Result<Vec<String>> {
        if l1.is_empty() {
            return Ok(Vec::new());
        }
        sqlx::query_scalar(
            r#"
            SELECT DISTINCT followee FROM graph_follow
            WHERE follower = ANY($1)
              AND followee <> $2
              AND NOT (followee = ANY($1))
            "#,
        )
        .bind(l1)
        .bind(user_did)
        .fetch_all(&self.pool)
        .await
        .context("L2 follows query failed")
    }

    /// L1 members who follow the user back.
    pub async fn mutuals(&self, user_did: &str, l1: &[String]) -> Result<HashSet<String>> {
        if l1.is_empty() {
            return Ok(HashSet::new());
        }
        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT follower FROM graph_follow WHERE follower = ANY($1) AND followee = $2",
        )
        .bind(l1)
        .bind(user_did)
        .fetch_all(&self.pool)
        .await
        .context("Mutuals query failed")?;
        Ok(rows.into_iter().collect())
    }

    /// Upsert a single interaction edge (inline path for tracked users).
    pub async fn upsert_interaction(&self, edge: &NewInteraction) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO graph_interaction (actor, target, interaction_type, weight, interaction_uri, indexed_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (actor, target, interaction_type) DO NOTHING
            "#,
        )
        .bind(&edge.actor)
        .bind(&edge.target)
        .bind(edge.kind.as_str())
        .bind(edge.kind.weight())
        .bind(&edge.interaction_uri)
        .bind(edge.indexed_at)
        .execute(&self.pool)
        .await
        .context("Failed to upsert interaction edge")?;
        Ok(())
    }

    /// Bulk-insert interaction edges inside the flush transaction.
    pub async fn insert_interactions(
        tx: &mut Transaction<'_, Postgres>,
        edges: &[NewInteraction],
    ) -> Result<(), sqlx::Error> {
        for chunk in edges.chunks(INSERT_CHUNK) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO graph_interaction (actor, target, interaction_type, weight, \
                 interaction_uri, indexed_at) ",
            );
            qb.push_values(chunk, |mut b, e| {
                b.push_bind(&e.actor)
                    .push_bind(&e.target)
                    .push_bind(e.kind.as_str())
                    .push_bind(e.kind.weight())
                    .push_bind(&e.interaction_uri)
                    .push_bind(e.indexed_at);
            });
            qb.push(" ON CONFLICT (actor, target, interaction_type) DO NOTHING");
            qb.build().execute(&mut **tx).await?;
        }
        Ok(())
    }

    /// All interaction edges from the given actors onto the given targets.
    /// Feeds network-effort aggregation.
    pub async fn interactions_for_targets(
        &self,
        targets: &[String],
        actors: &[String],
    ) -> Result<Vec<InteractionEdge>> {
        if targets.is_empty() || actors.is_empty() {
            return Ok(Vec::new());
        }
        sqlx::query_as::<_, InteractionEdge>(
            r#"
            SELECT actor, target, interaction_type, weight, interaction_uri, indexed_at
            FROM graph_interaction
            WHERE target = ANY($1) AND actor = ANY($2)
            "#,
        )
        .bind(targets)
        .bind(actors)
        .fetch_all(&self.pool)
        .await
        .context("Network effort query failed")
    }

    /// Actors who liked the given post, excluding `exclude_actor`.
    pub async fn co_likers(&self, target: &str, exclude_actor: &str) -> Result<Vec<String>> {
        sqlx::query_scalar(
            r#"
            SELECT actor FROM graph_interaction
            WHERE target = $1 AND interaction_type = 'like' AND actor <> $2
            "#,
        )
        .bind(target)
        .bind(exclude_actor)
        .fetch_all(&self.pool)
        .await
        .context("Co-likers query failed")
    }

    /// The user's interacted URIs grouped by interaction type.
    pub async fn interacted_uris(
        &self,
        user_did: &str,
    ) -> Result<HashMap<InteractionKind, HashSet<String>>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT target, interaction_type FROM graph_interaction WHERE actor = $1",
        )
        .bind(user_did)
        .fetch_all(&self.pool)
        .await
        .context("Interacted uris query failed")?;

        let mut out: HashMap<InteractionKind, HashSet<String>> = HashMap::new();
        for (target, kind) in rows {
            if let Some(kind) = InteractionKind::parse(&kind) {
                out.entry(kind).or_default().insert(target);
            }
        }
        Ok(out)
    }

    /// Authors of posts the user recently engaged with.
    pub async fn interacted_authors(
        &self,
        user_did: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        sqlx::query_scalar(
            r#"
            SELECT DISTINCT p.author
            FROM graph_interaction gi
            JOIN post p ON p.uri = gi.target
            WHERE gi.actor = $1 AND gi.indexed_at > $2
            LIMIT 500
            "#,
        )
        .bind(user_did)
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .context("Interacted authors query failed")
    }

    /// Recent like subjects of the given taste-twins: (uri, twin) pairs,
    /// newest first, capped.
    pub async fn twin_recent_likes(
        &self,
        twins: &[String],
        since: DateTime<Utc>,
        cap: i64,
    ) -> Result<Vec<(String, String)>> {
        if twins.is_empty() {
            return Ok(Vec::new());
        }
        sqlx::query_as(
            r#"
            SELECT target, actor FROM graph_interaction
            WHERE actor = ANY($1) AND interaction_type = 'like' AND indexed_at > $2
            ORDER BY indexed_at DESC
            LIMIT $3
            "#,
        )
        .bind(twins)
        .bind(since)
        .bind(cap)
        .fetch_all(&self.pool)
        .await
        .context("Twin likes query failed")
    }

    /// URIs the user liked or reposted since `since` (semantic pipeline,
    /// liked-post embedding step).
    pub async fn recent_own_engagements(
        &self,
        user_did: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        sqlx::query_scalar(
            r#"
            SELECT DISTINCT target FROM graph_interaction
            WHERE actor = $1
              AND interaction_type IN ('like', 'repost')
              AND indexed_at > $2
            "#,
        )
        .bind(user_did)
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .context("Recent engagements query failed")
    }

    /// Number of stored followers for each DID (local fallback when the
    /// AppView profile fetch fails).
    pub async fn local_follower_counts(&self, dids: &[String]) -> Result<HashMap<String, i64>> {
        if dids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT followee, COUNT(*) FROM graph_follow
            WHERE followee = ANY($1)
            GROUP BY followee
            "#,
        )
        .bind(dids)
        .fetch_all(&self.pool)
        .await
        .context("Local follower counts query failed")?;
        Ok(rows.into_iter().collect())
    }

    /// For each L2 candidate, how many of the user's L1 follow them.
    pub async fn l1_follower_counts(
        &self,
        l2_candidates: &[String],
        l1: &[String],
    ) -> Result<HashMap<String, i64>> {
        if l2_candidates.is_empty() || l1.is_empty() {
            return Ok(HashMap::new());
        }
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT followee, COUNT(*) FROM graph_follow
            WHERE followee = ANY($1) AND follower = ANY($2)
            GROUP BY followee
            "#,
        )
        .bind(l2_candidates)
        .bind(l1)
        .fetch_all(&self.pool)
        .await
        .context("L1 follower counts query failed")?;
        Ok(rows.into_iter().collect())
    }

    /// Cached influential-L2 rows for the user if they are newer than `ttl`.
    pub async fn influential_l2(
        &self,
        user_did: &str,
        ttl: Duration,
    ) -> Result<Vec<InfluentialL2>> {
        let cutoff = Utc::now() - ttl;
        sqlx::query_as::<_, InfluentialL2>(
            r#"
            SELECT * FROM influential_l2_cache
            WHERE user_did = $1 AND updated_at > $2
            ORDER BY influence_score DESC
            "#,
        )
        .bind(user_did)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .context("Influential L2 cache query failed")
    }

    /// Replace the user's influential-L2 cache atomically.
    pub async fn replace_influential_l2(
        &self,
        user_did: &str,
        rows: &[(String, f64, i32)],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM influential_l2_cache WHERE user_did = $1")
            .bind(user_did)
            .execute(&mut *tx)
            .await?;
        for chunk in rows.chunks(INSERT_CHUNK) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO influential_l2_cache (user_did, l2_did, influence_score, l1_follower_count) ",
            );
            qb.push_values(chunk, |mut b, (l2, score, count)| {
                b.push_bind(user_did)
                    .push_bind(l2)
                    .push_bind(score)
                    .push_bind(count);
            });
            qb.build().execute(&mut *tx).await?;
        }
        tx.commit().await.context("Influential L2 replace failed")?;
        Ok(())
    }
}
