//! Batched, transactional write path.
//!
//! All firehose mutations accumulate in a `PendingBatch` behind a mutex and
//! flush as one transaction: post inserts, post deletes, summed counter
//! increments in URI-sorted order, interaction-edge inserts, then the
//! cursor. A failed flush merges the batch back instead of discarding it.

use std::collections::HashMap;
use std::mem;
use std::sync::Arc;

use feed_core::db::graph_repo::{GraphRepo, NewInteraction};
use feed_core::db::meta_repo::MetaRepo;
use feed_core::db::post_repo::{CounterDelta, PostRepo};
use feed_core::db::with_contention_retry;
use feed_core::models::Post;
use sqlx::PgPool;
use tokio::sync::Mutex;
use tracing::{error, info};

#[derive(Debug, Default)]
pub struct PendingBatch {
    pub posts: Vec<Post>,
    pub deletes: Vec<String>,
    pub counters: HashMap<String, CounterDelta>,
    pub interactions: Vec<NewInteraction>,
    pub max_time_us: Option<i64>,
}

impl PendingBatch {
    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
            && self.deletes.is_empty()
            && self.counters.is_empty()
            && self.interactions.is_empty()
    }

    pub fn note_time(&mut self, time_us: i64) {
        self.max_time_us = Some(self.max_time_us.map_or(time_us, |t| t.max(time_us)));
    }

    /// Fold `other` back in after a failed flush.
    pub fn merge(&mut self, other: PendingBatch) {
        self.posts.extend(other.posts);
        self.deletes.extend(other.deletes);
        for (uri, delta) in other.counters {
            let entry = self.counters.entry(uri).or_default();
            entry.likes += delta.likes;
            entry.reposts += delta.reposts;
            entry.replies += delta.replies;
        }
        self.interactions.extend(other.interactions);
        if let Some(t) = other.max_time_us {
            self.note_time(t);
        }
    }

    /// Deltas in URI order, the store's lock-ordering contract.
    pub fn sorted_counters(&self) -> Vec<(String, CounterDelta)> {
        let mut deltas: Vec<(String, CounterDelta)> = self
            .counters
            .iter()
            .map(|(uri, delta)| (uri.clone(), *delta))
            .collect();
        deltas.sort_by(|a, b| a.0.cmp(&b.0));
        deltas
    }
}

#[derive(Clone)]
pub struct WriteBatcher {
    pool: PgPool,
    service: String,
    pending: Arc<Mutex<PendingBatch>>,
}

impl WriteBatcher {
    pub fn new(pool: PgPool, service: String) -> Self {
        Self {
            pool,
            service,
            pending: Arc::new(Mutex::new(PendingBatch::default())),
        }
    }

    pub async fn enqueue_post(&self, post: Post, time_us: i64) {
        let mut pending = self.pending.lock().await;
        pending.posts.push(post);
        pending.note_time(time_us);
    }

    pub async fn enqueue_delete(&self, uri: String, time_us: i64) {
        let mut pending = self.pending.lock().await;
        pending.deletes.push(uri);
        pending.note_time(time_us);
    }

    pub async fn bump_likes(&self, uri: &str, time_us: i64) {
        let mut pending = self.pending.lock().await;
        pending.counters.entry(uri.to_string()).or_default().likes += 1;
        pending.note_time(time_us);
    }

    pub async fn bump_reposts(&self, uri: &str, time_us: i64) {
        let mut pending = self.pending.lock().await;
        pending.counters.entry(uri.to_string()).or_default().reposts += 1;
        pending.note_time(time_us);
    }

    pub async fn bump_replies(&self, uri: &str, time_us: i64) {
        let mut pending = self.pending.lock().await;
        pending.counters.entry(uri.to_string()).or_default().replies += 1;
        pending.note_time(time_us);
    }

    pub async fn enqueue_interaction(&self, edge: NewInteraction, time_us: i64) {
        let mut pending = self.pending.lock().await;
        pending.interactions.push(edge);
        pending.note_time(time_us);
    }

    /// Flush everything pending in one transaction. On failure the batch is
    /// re-queued and the cursor does not advance.
    pub async fn flush(&self) -> anyhow::Result<usize> {
        let batch = {
            let mut pending = self.pending.lock().await;
            mem::take(&mut *pending)
        };
        if batch.is_empty() && batch.max_time_us.is_none() {
            return Ok(0);
        }

        let written =
            batch.posts.len() + batch.deletes.len() + batch.counters.len() + batch.interactions.len();

        let result = with_contention_retry("ingest_flush", || self.flush_once(&batch)).await;
        match result {
            Ok(()) => {
                info!(
                    posts = batch.posts.len(),
                    deletes = batch.deletes.len(),
                    counters = batch.counters.len(),
                    interactions = batch.interactions.len(),
                    cursor = batch.max_time_us,
                    "Flushed ingest batch"
                );
                Ok(written)
            }
            Err(e) => {
                error!(error = %e, "Flush failed, re-queueing batch");
                let mut pending = self.pending.lock().await;
                pending.merge(batch);
                Err(e.into())
            }
        }
    }

    async fn flush_once(&self, batch: &PendingBatch) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        PostRepo::insert_posts(&mut tx, &batch.posts).await?;
        PostRepo::delete_posts(&mut tx, &batch.deletes).await?;
        PostRepo::apply_counter_deltas(&mut tx, &batch.sorted_counters()).await?;
        GraphRepo::insert_interactions(&mut tx, &batch.interactions).await?;
        if let Some(time_us) = batch.max_time_us {
            MetaRepo::set_cursor_tx(&mut tx, &self.service, time_us).await?;
        }

        tx.commit().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use feed_core::models::InteractionKind;

    fn post(uri: &str) -> Post {
        Post {
            uri: uri.to_string(),
            cid: "bafy".into(),
            indexed_at: Utc::now(),
            author: "did:plc:a".into(),
            like_count: 0,
            reply_count: 0,
            repost_count: 0,
            reply_root: None,
            reply_parent: None,
            text: None,
            has_image: false,
            has_video: false,
            has_external: false,
        }
    }

    #[test]
    fn note_time_is_monotonic() {
        let mut batch = PendingBatch::default();
        batch.note_time(300);
        batch.note_time(150);
        assert_eq!(batch.max_time_us, Some(300));
        batch.note_time(400);
        assert_eq!(batch.max_time_us, Some(400));
    }

    #[test]
    fn counters_sum_per_uri_and_sort_by_uri() {
        let mut batch = PendingBatch::default();
        batch.counters.entry("at://b".into()).or_default().likes += 1;
        batch.counters.entry("at://a".into()).or_default().likes += 2;
        batch.counters.entry("at://b".into()).or_default().reposts += 1;

        let sorted = batch.sorted_counters();
        assert_eq!(sorted[0].0, "at://a");
        assert_eq!(sorted[0].1.likes, 2);
        assert_eq!(sorted[1].0, "at://b");
        assert_eq!(sorted[1].1, CounterDelta { likes: 1, reposts: 1, replies: 0 });
    }

    #[test]
    fn merge_requeues_everything() {
        let mut kept = PendingBatch::default();
        kept.counters.entry("at://x".into()).or_default().likes += 1;
        kept.note_time(100);

        let mut failed = PendingBatch::default();
        failed.posts.push(post("at://p"));
        failed.deletes.push("at://gone".into());
        failed.counters.entry("at://x".into()).or_default().likes += 3;
        failed.interactions.push(NewInteraction {
            actor: "did:plc:u".into(),
            target: "at://x".into(),
            kind: InteractionKind::Like,
            interaction_uri: None,
            indexed_at: Utc::now(),
        });
        failed.note_time(250);

        kept.merge(failed);
        assert_eq!(kept.posts.len(), 1);
        assert_eq!(kept.deletes.len(), 1);
        assert_eq!(kept.counters["at://x"].likes, 4);
        assert_eq!(kept.interactions.len(), 1);
        assert_eq!(kept.max_time_us, Some(250));
    }

    #[test]
    fn empty_batch_reports_empty() {
        let batch = PendingBatch::default();
        assert!(batch.is_empty());
    }
}
