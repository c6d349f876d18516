//! Post table operations: ingest writes, recall queries, corpora fetches,
//! retention GC.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};

use crate::models::Post;

use super::INSERT_CHUNK;

/// Summed counter deltas for one URI within a flush batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterDelta {
    pub likes: i32,
    pub reposts: i32,
    pub replies: i32,
}

impl CounterDelta {
    pub fn is_zero(&self) -> bool {
        self.likes == 0 && self.reposts == 0 && self.replies == 0
    }
}

#[derive(Clone)]
pub struct PostRepo {
    pool: PgPool,
}

impl PostRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Bulk-insert posts inside the flush transaction. Replayed events are
    /// absorbed by the uri conflict target.
    pub async fn insert_posts(
        tx: &mut Transaction<'_, Postgres>,
        posts: &[Post],
    ) -> Result<(), sqlx::Error> {
        for chunk in posts.chunks(INSERT_CHUNK) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO post (uri, cid, indexed_at, author, like_count, reply_count, \
                 repost_count, reply_root, reply_parent, content_text, has_image, has_video, \
                 has_external) ",
            );
            qb.push_values(chunk, |mut b, p| {
                b.push_bind(&p.uri)
                    .push_bind(&p.cid)
                    .push_bind(p.indexed_at)
                    .push_bind(&p.author)
                    .push_bind(p.like_count)
                    .push_bind(p.reply_count)
                    .push_bind(p.repost_count)
                    .push_bind(&p.reply_root)
                    .push_bind(&p.reply_parent)
                    .push_bind(&p.text)
                    .push_bind(p.has_image)
                    .push_bind(p.has_video)
                    .push_bind(p.has_external);
            });
            qb.push(" ON CONFLICT (uri) DO NOTHING");
            qb.build().execute(&mut **tx).await?;
        }
        Ok(())
    }

    /// Hard-delete posts inside the flush transaction. No cascade: counters
    /// on other posts are unaffected.
    pub async fn delete_posts(
        tx: &mut Transaction<'_, Postgres>,
        uris: &[String],
    ) -> Result<(), sqlx::Error> {
        if uris.is_empty() {
            return Ok(());
        }
        sqlx::query("DELETE FROM post WHERE uri = ANY($1)")
            .bind(uris)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Apply summed counter increments. The caller passes deltas in
    /// URI-sorted order to keep lock acquisition order stable across
    /// concurrent writers.
    pub async fn apply_counter_deltas(
        tx: &mut Transaction<'_, Postgres>,
        deltas: &[(String, CounterDelta)],
    ) -> Result<(), sqlx::Error> {
        for (uri, delta) in deltas {
            if delta.is_zero() {
                continue;
            }
            sqlx::query(
                r#"
                UPDATE post
                SET like_count = GREATEST(0, like_count + $2),
                    repost_count = GREATEST(0, repost_count + $3),
                    reply_count = GREATEST(0, reply_count + $4)
                WHERE uri = $1
                "#,
            )
            .bind(uri)
            .bind(delta.likes)
            .bind(delta.reposts)
            .bind(delta.replies)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    pub async fn get_by_uri(&self, uri: &str) -> Result<Option<Post>> {
        sqlx::query_as::<_, Post>("SELECT * FROM post WHERE uri = $1")
            .bind(uri)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch post by uri")
    }

    pub async fn get_by_uris(&self, uris: &[String]) -> Result<Vec<Post>> {
        if uris.is_empty() {
            return Ok(Vec::new());
        }
        sqlx::query_as::<_, Post>("SELECT * FROM post WHERE uri = ANY($1)")
            .bind(uris)
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch posts by uris")
    }

    /// Fresh bucket: recent posts authored inside the social circle or with
    /// enough global engagement.
    pub async fn recall_fresh(
        &self,
        authors: &[String],
        max_age: Duration,
        min_like_count: i32,
        cap: i64,
    ) -> Result<Vec<Post>> {
        let cutoff = Utc::now() - max_age;
        sqlx::query_as::<_, Post>(
            r#"
            SELECT * FROM post
            WHERE indexed_at > $1
              AND (author = ANY($2) OR like_count > $3)
            ORDER BY indexed_at DESC
            LIMIT $4
            "#,
        )
        .bind(cutoff)
        .bind(authors)
        .bind(min_like_count)
        .bind(cap)
        .fetch_all(&self.pool)
        .await
        .context("Fresh recall query failed")
    }

    /// Bridge bucket: the 72 h – 7 d window with a mild engagement floor.
    pub async fn recall_bridge(
        &self,
        authors: &[String],
        newest: Duration,
        oldest: Duration,
        min_like_count: i32,
        cap: i64,
    ) -> Result<Vec<Post>> {
        let now = Utc::now();
        sqlx::query_as::<_, Post>(
            r#"
            SELECT * FROM post
            WHERE indexed_at <= $1 AND indexed_at > $2
              AND (author = ANY($3) OR like_count > $4)
            ORDER BY like_count DESC, indexed_at DESC
            LIMIT $5
            "#,
        )
        .bind(now - newest)
        .bind(now - oldest)
        .bind(authors)
        .bind(min_like_count)
        .bind(cap)
        .fetch_all(&self.pool)
        .await
        .context("Bridge recall query failed")
    }

    /// Global gems: anything within 30 d clearing the engagement floor,
    /// regardless of authorship.
    pub async fn recall_global(
        &self,
        max_age: Duration,
        min_like_count: i32,
        cap: i64,
    ) -> Result<Vec<Post>> {
        let cutoff = Utc::now() - max_age;
        sqlx::query_as::<_, Post>(
            r#"
            SELECT * FROM post
            WHERE indexed_at > $1 AND like_count > $2
            ORDER BY like_count DESC, indexed_at DESC
            LIMIT $3
            "#,
        )
        .bind(cutoff)
        .bind(min_like_count)
        .bind(cap)
        .fetch_all(&self.pool)
        .await
        .context("Global recall query failed")
    }

    /// Bubble bucket: the long tail from directly-connected authors.
    pub async fn recall_bubble(
        &self,
        authors: &[String],
        max_age: Duration,
        cap: i64,
    ) -> Result<Vec<Post>> {
        let cutoff = Utc::now() - max_age;
        sqlx::query_as::<_, Post>(
            r#"
            SELECT * FROM post
            WHERE indexed_at > $1 AND author = ANY($2)
            ORDER BY indexed_at DESC
            LIMIT $3
            "#,
        )
        .bind(cutoff)
        .bind(authors)
        .bind(cap)
        .fetch_all(&self.pool)
        .await
        .context("Bubble recall query failed")
    }

    /// Every stored reply under the given thread roots, for reply-cluster
    /// and self-reply-chain analysis.
    pub async fn thread_replies(&self, roots: &[String]) -> Result<Vec<Post>> {
        if roots.is_empty() {
            return Ok(Vec::new());
        }
        sqlx::query_as::<_, Post>(
            "SELECT * FROM post WHERE reply_root = ANY($1) ORDER BY indexed_at ASC",
        )
        .bind(roots)
        .fetch_all(&self.pool)
        .await
        .context("Thread replies query failed")
    }

    /// (total, with_image, with_video) over the user's recent like subjects;
    /// drives the media-mismatch penalty.
    pub async fn liked_media_stats(
        &self,
        user_did: &str,
        since: DateTime<Utc>,
    ) -> Result<(i64, i64, i64)> {
        let row: (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*),
                   COUNT(*) FILTER (WHERE p.has_image),
                   COUNT(*) FILTER (WHERE p.has_video)
            FROM graph_interaction gi
            JOIN post p ON p.uri = gi.target
            WHERE gi.actor = $1 AND gi.interaction_type = 'like' AND gi.indexed_at > $2
            "#,
        )
        .bind(user_did)
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .context("Liked media stats query failed")?;
        Ok(row)
    }

    /// Texts of the user's recent like subjects, newest first.
    pub async fn liked_texts(&self, user_did: &str, limit: i64) -> Result<Vec<String>> {
        sqlx::query_scalar(
            r#"
            SELECT p.content_text
            FROM graph_interaction gi
            JOIN post p ON p.uri = gi.target
            WHERE gi.actor = $1
              AND gi.interaction_type = 'like'
              AND p.content_text IS NOT NULL
              AND length(p.content_text) > 0
            ORDER BY gi.indexed_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_did)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Liked texts query failed")
    }

    /// Random background corpus for keyword extraction.
    pub async fn random_texts(&self, limit: i64) -> Result<Vec<String>> {
        sqlx::query_scalar(
            r#"
            SELECT content_text FROM post
            WHERE content_text IS NOT NULL AND length(content_text) > 0
            ORDER BY random()
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Background corpus query failed")
    }

    /// Retention GC: posts older than `max_age` with zero engagement, unless
    /// the author is followed by anyone we track. Returns the number of rows
    /// removed.
    pub async fn gc_stale_posts(&self, max_age: Duration) -> Result<u64> {
        let cutoff = Utc::now() - max_age;
        let result = sqlx::query(
            r#"
            DELETE FROM post
            WHERE indexed_at < $1
              AND like_count = 0 AND repost_count = 0 AND reply_count = 0
              AND NOT EXISTS (
                  SELECT 1 FROM graph_follow gf WHERE gf.followee = post.author
              )
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .context("Post retention GC failed")?;
        Ok(result.rows_affected())
    }
}
