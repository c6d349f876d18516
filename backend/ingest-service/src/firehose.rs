//! Firehose subscription: websocket client, per-event dispatch, reconnect.

use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::time::Duration;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use feed_core::db::graph_repo::{GraphRepo, NewInteraction};
use feed_core::db::meta_repo::MetaRepo;
use feed_core::db::post_repo::PostRepo;
use feed_core::fatigue::FatigueEngine;
use feed_core::models::{InteractionKind, Post};
use feed_core::taste::TasteEngine;

use crate::batcher::WriteBatcher;
use crate::config::IngestConfig;
use crate::event::{parse_event, FeedEvent, LIKE_COLLECTION, POST_COLLECTION, REPOST_COLLECTION};
use crate::tracked::TrackedSets;

pub struct Firehose {
    config: IngestConfig,
    batcher: WriteBatcher,
    tracked: TrackedSets,
    taste: TasteEngine,
    fatigue: FatigueEngine,
    graph_repo: GraphRepo,
    post_repo: PostRepo,
    meta_repo: MetaRepo,
}

impl Firehose {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: IngestConfig,
        batcher: WriteBatcher,
        tracked: TrackedSets,
        taste: TasteEngine,
        fatigue: FatigueEngine,
        graph_repo: GraphRepo,
        post_repo: PostRepo,
        meta_repo: MetaRepo,
    ) -> Self {
        Self {
            config,
            batcher,
            tracked,
            taste,
            fatigue,
            graph_repo,
            post_repo,
            meta_repo,
        }
    }

    /// Consume the upstream stream forever, reconnecting after the
    /// configured delay. Pending writes are flushed before each reconnect
    /// so the persisted cursor stays close to the live position.
    pub async fn run(&self) {
        loop {
            match self.subscribe_once().await {
                Ok(()) => info!("Upstream closed the subscription"),
                Err(e) => error!(error = %e, "Subscription failed"),
            }

            if let Err(e) = self.batcher.flush().await {
                warn!(error = %e, "Pre-reconnect flush failed");
            }
            tokio::time::sleep(Duration::from_secs(self.config.reconnect_delay_secs)).await;
            info!("Reconnecting to upstream");
        }
    }

    async fn subscribe_once(&self) -> anyhow::Result<()> {
        let url = self.subscription_url().await?;
        let (ws, _) = connect_async(url.as_str()).await?;
        let (mut tx, mut rx) = ws.split();
        info!("Subscribed to upstream event stream");

        // The tracked-DID list is too large for the URL; push it through the
        // post-connect options update instead.
        let wanted_dids = self.tracked.interaction_dids().await;
        let options = json!({
            "type": "options_update",
            "payload": {
                "wantedCollections": [POST_COLLECTION, LIKE_COLLECTION, REPOST_COLLECTION],
                "wantedDids": wanted_dids,
                "maxMessageSizeBytes": 0,
            }
        });
        tx.send(Message::Text(options.to_string())).await?;

        while let Some(message) = rx.next().await {
            match message? {
                Message::Text(text) => {
                    if let Some(event) = parse_event(&text) {
                        self.handle_event(event).await;
                    }
                }
                Message::Ping(payload) => tx.send(Message::Pong(payload)).await?,
                Message::Close(_) => break,
                _ => {}
            }
        }
        Ok(())
    }

    async fn subscription_url(&self) -> anyhow::Result<String> {
        let mut url = format!(
            "{}?wantedCollections={}&wantedCollections={}&wantedCollections={}",
            self.config.jetstream_endpoint,
            urlencoding::encode(POST_COLLECTION),
            urlencoding::encode(LIKE_COLLECTION),
            urlencoding::encode(REPOST_COLLECTION),
        );
        if let Some(cursor) = self.meta_repo.cursor(&self.config.service_name).await? {
            url.push_str(&format!("&cursor={cursor}"));
        }
        Ok(url)
    }

    async fn handle_event(&self, event: FeedEvent) {
        match event {
            FeedEvent::CreatePost {
                uri,
                cid,
                author,
                text,
                reply_root,
                reply_parent,
                has_image,
                has_video,
                has_external,
                time_us,
            } => {
                let indexed_at = micros_to_datetime(time_us);
                let parent = reply_parent.clone();
                let post = Post {
                    uri,
                    cid,
                    indexed_at,
                    author: author.clone(),
                    like_count: 0,
                    reply_count: 0,
                    repost_count: 0,
                    reply_root,
                    reply_parent,
                    text,
                    has_image,
                    has_video,
                    has_external,
                };
                self.batcher.enqueue_post(post, time_us).await;

                if let Some(parent_uri) = parent {
                    self.batcher.bump_replies(&parent_uri, time_us).await;
                    if self.tracked.is_interaction(&author).await {
                        self.batcher
                            .enqueue_interaction(
                                NewInteraction {
                                    actor: author,
                                    target: parent_uri,
                                    kind: InteractionKind::Reply,
                                    interaction_uri: None,
                                    indexed_at,
                                },
                                time_us,
                            )
                            .await;
                    }
                }
            }
            FeedEvent::DeletePost { uri, time_us } => {
                self.batcher.enqueue_delete(uri, time_us).await;
            }
            FeedEvent::CreateLike {
                actor,
                subject_uri,
                record_uri,
                time_us,
            } => {
                self.batcher.bump_likes(&subject_uri, time_us).await;
                self.record_engagement(
                    actor,
                    subject_uri,
                    record_uri,
                    InteractionKind::Like,
                    time_us,
                )
                .await;
            }
            FeedEvent::CreateRepost {
                actor,
                subject_uri,
                record_uri,
                time_us,
            } => {
                self.batcher.bump_reposts(&subject_uri, time_us).await;
                self.record_engagement(
                    actor,
                    subject_uri,
                    record_uri,
                    InteractionKind::Repost,
                    time_us,
                )
                .await;
            }
        }
    }

    /// Shared like/repost path: edge for the wide tracked set, taste and
    /// fatigue engines for the whitelist only.
    async fn record_engagement(
        &self,
        actor: String,
        subject_uri: String,
        record_uri: String,
        kind: InteractionKind,
        time_us: i64,
    ) {
        if self.tracked.is_interaction(&actor).await {
            self.batcher
                .enqueue_interaction(
                    NewInteraction {
                        actor: actor.clone(),
                        target: subject_uri.clone(),
                        kind,
                        interaction_uri: Some(record_uri),
                        indexed_at: micros_to_datetime(time_us),
                    },
                    time_us,
                )
                .await;
        }

        if !self.tracked.is_own(&actor).await {
            return;
        }

        let co_likers = match self.graph_repo.co_likers(&subject_uri, &actor).await {
            Ok(likers) => likers,
            Err(e) => {
                warn!(error = %e, "Co-liker lookup failed");
                Vec::new()
            }
        };
        if let Err(e) = self.taste.on_like(&actor, &subject_uri, &co_likers).await {
            warn!(user = %actor, error = %e, "Taste update failed");
        }

        match self.post_repo.get_by_uri(&subject_uri).await {
            Ok(Some(post)) => {
                if post.author != actor {
                    if let Err(e) = self.fatigue.on_interaction(&actor, &post.author, kind).await {
                        warn!(user = %actor, error = %e, "Fatigue update failed");
                    }
                }
            }
            Ok(None) => debug!(uri = %subject_uri, "Engagement on unindexed post"),
            Err(e) => warn!(error = %e, "Post lookup failed"),
        }
    }
}

fn micros_to_datetime(time_us: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(time_us).unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn micros_conversion_is_utc() {
        let dt = micros_to_datetime(1_700_000_000_000_000);
        assert_eq!(dt.timestamp_micros(), 1_700_000_000_000_000);
    }
}
