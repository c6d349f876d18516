//! Semantic batch pipeline.
//!
//! Periodic offline job, per tracked user: harvest the batch-mode scored
//! pool, embed new candidate and liked-post texts into the vector index,
//! cluster the liked-post vectors into weighted interest centroids, run a
//! per-centroid ANN search, and materialize the merged result as candidate
//! batch rows for serve-time fusion.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use chrono::{Duration, Utc};
use rand::Rng;
use serde_json::json;
use tracing::{debug, info, warn};

use feed_core::clients::appview::HYDRATION_CHUNK;
use feed_core::clients::embedder::EmbedInput;
use feed_core::clients::clusterer::ClusterInput;
use feed_core::clients::vector::{field_match, Point, POST_COLLECTION, PROFILE_COLLECTION};
use feed_core::clients::{AppViewClient, ClustererClient, EmbedderClient, VectorIndexClient};
use feed_core::db::batch_repo::BatchRepo;
use feed_core::db::feedback_repo::FeedbackRepo;
use feed_core::db::graph_repo::GraphRepo;
use feed_core::db::serving_repo::ServingRepo;
use feed_core::db::taste_repo::TasteRepo;
use feed_core::hashing::{point_id, profile_point_id};
use feed_core::models::CandidateBatchRow;

use crate::error::Result;
use crate::metrics;
use crate::services::ranking::{Ranker, ScoredCandidate};

/// Candidate texts shorter than this aren't worth embedding.
const MIN_EMBED_TEXT_LEN: usize = 10;

/// Liked/reposted lookback for profile building.
const LIKED_WINDOW_DAYS: i64 = 3;

/// Explicit-feedback lookback.
const FEEDBACK_WINDOW_DAYS: i64 = 7;

/// Minimum liked vectors before clustering is attempted.
const MIN_PROFILE_VECTORS: usize = 3;

/// ANN search shape per centroid.
const SEARCH_BASE_LIMIT: f64 = 200.0;
const SEARCH_WEIGHT_LIMIT: f64 = 400.0;
const SEARCH_SCORE_THRESHOLD: f32 = 0.25;

/// Twins below this reputation are filtered out of semantic hits.
const MIN_AUTHOR_REPUTATION: f64 = 0.1;

/// Seen this many times disqualifies a semantic hit.
const MAX_SEEN_COUNT: i64 = 3;

/// Hits outside the live pipeline pool start in the discovery sandbox.
const DISCOVERY_BASELINE_SCORE: f64 = -4000.0;

/// Batch output cap.
const BATCH_KEEP: usize = 1500;

/// Candidate batch TTL.
pub const BATCH_TTL_HOURS: i64 = 12;

pub struct SemanticPipeline {
    ranker: Ranker,
    graph_repo: GraphRepo,
    taste_repo: TasteRepo,
    serving_repo: ServingRepo,
    batch_repo: BatchRepo,
    feedback_repo: FeedbackRepo,
    appview: AppViewClient,
    vector: VectorIndexClient,
    embedder: EmbedderClient,
    clusterer: ClustererClient,
}

impl SemanticPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ranker: Ranker,
        graph_repo: GraphRepo,
        taste_repo: TasteRepo,
        serving_repo: ServingRepo,
        batch_repo: BatchRepo,
        feedback_repo: FeedbackRepo,
        appview: AppViewClient,
        vector: VectorIndexClient,
        embedder: EmbedderClient,
        clusterer: ClustererClient,
    ) -> Self {
        Self {
            ranker,
            graph_repo,
            taste_repo,
            serving_repo,
            batch_repo,
            feedback_repo,
            appview,
            vector,
            embedder,
            clusterer,
        }
    }

    /// One full pipeline pass for every user, sequentially.
    pub async fn run_for_all(&self, users: &[String]) {
        for user in users {
            let started = Instant::now();
            match self.run_for_user(user).await {
                Ok(written) => {
                    metrics::record_semantic_run("ok");
                    metrics::observe_semantic_duration(started.elapsed());
                    metrics::set_batch_candidates(written as i64);
                    info!(
                        user = %user,
                        candidates = written,
                        duration_ms = started.elapsed().as_millis(),
                        "Semantic batch complete"
                    );
                }
                Err(e) => {
                    metrics::record_semantic_run("error");
                    warn!(user = %user, error = %e, "Semantic batch failed");
                }
            }
        }
    }

    pub async fn run_for_user(&self, user_did: &str) -> Result<usize> {
        // 1. Batch-mode harvest.
        let pool = self.ranker.rank_batch(user_did).await?;
        if pool.is_empty() {
            debug!(user = user_did, "No pipeline candidates, skipping user");
            return Ok(0);
        }
        let pipeline_scores: HashMap<String, f64> = pool
            .iter()
            .map(|c| (c.post.uri.clone(), c.score))
            .collect();

        let already_embedded = self.embedded_uris(user_did).await;

        // 2. Candidate embedding.
        self.embed_candidates(user_did, &pool, &already_embedded)
            .await?;

        // 3. Liked-post embedding.
        let liked_uris = self.recent_positive_uris(user_did).await?;
        self.embed_liked(user_did, &liked_uris, &already_embedded, &pool)
            .await?;

        // 4. Interest-profile build.
        let centroids = self.build_profile(user_did, &liked_uris).await?;

        // 5–6. Per-centroid ANN search, filtered and deduplicated.
        let hits = self
            .semantic_search(user_did, &centroids, &pipeline_scores)
            .await?;
        if hits.is_empty() {
            return Ok(0);
        }

        // 7. Persist.
        let batch_id = new_batch_id();
        let now = Utc::now();
        let rows: Vec<CandidateBatchRow> = hits
            .into_iter()
            .map(|hit| CandidateBatchRow {
                user_did: user_did.to_string(),
                uri: hit.uri,
                semantic_score: hit.semantic_score,
                pipeline_score: hit.pipeline_score,
                centroid_id: hit.centroid_id,
                batch_id: batch_id.clone(),
                generated_at: now,
            })
            .collect();
        let written = rows.len();
        self.batch_repo.insert_batch(&rows).await?;

        // 8. GC.
        if let Err(e) = self.gc(user_did, &liked_uris).await {
            warn!(user = user_did, error = %e, "Semantic GC failed");
        }

        Ok(written)
    }

    /// URIs already embedded for this user.
    async fn embedded_uris(&self, user_did: &str) -> HashSet<String> {
        match self
            .vector
            .scroll_all(POST_COLLECTION, field_match("discoveredBy", user_did), false)
            .await
        {
            Ok(points) => points
                .into_iter()
                .filter_map(|p| p.payload.get("uri").and_then(|v| v.as_str()).map(str::to_string))
                .collect(),
            Err(e) => {
                warn!(user = user_did, error = %e, "Embedded-uri scroll failed");
                HashSet::new()
            }
        }
    }

    async fn embed_candidates(
        &self,
        user_did: &str,
        pool: &[ScoredCandidate],
        already_embedded: &HashSet<String>,
    ) -> Result<()> {
        let mut text_only: Vec<EmbedInput> = Vec::new();
        let mut needs_hydration: Vec<&ScoredCandidate> = Vec::new();

        for candidate in pool {
            let post = &candidate.post;
            if already_embedded.contains(&post.uri) {
                continue;
            }
            let text_len = post.text.as_deref().map(|t| t.chars().count()).unwrap_or(0);
            if post.has_image {
                if text_len > MIN_EMBED_TEXT_LEN || post.text.is_none() {
                    needs_hydration.push(candidate);
                }
            } else if text_len > MIN_EMBED_TEXT_LEN {
                text_only.push(EmbedInput {
                    uri: post.uri.clone(),
                    text: post.text.clone().unwrap_or_default(),
                    image_urls: Vec::new(),
                    alt_text: Vec::new(),
                });
            }
        }

        let mut inputs = text_only;
        inputs.extend(self.hydrate_inputs(&needs_hydration).await);
        if inputs.is_empty() {
            return Ok(());
        }

        let by_uri: HashMap<String, &ScoredCandidate> = pool
            .iter()
            .map(|c| (c.post.uri.clone(), c))
            .collect();

        let outputs = match self.embedder.embed(&inputs).await {
            Ok(outputs) => outputs,
            Err(e) => {
                warn!(user = user_did, error = %e, "Candidate embedding failed");
                return Ok(());
            }
        };

        let points: Vec<Point> = outputs
            .into_iter()
            .filter_map(|out| {
                let candidate = by_uri.get(&out.uri)?;
                Some(Point {
                    id: point_id(user_did, &out.uri),
                    vector: out.vector,
                    payload: json!({
                        "uri": out.uri,
                        "author": candidate.post.author,
                        "indexedAt": candidate.post.indexed_at.to_rfc3339(),
                        "likeCount": candidate.post.like_count,
                        "discoveredBy": user_did,
                    }),
                })
            })
            .collect();

        if let Err(e) = self.vector.upsert(POST_COLLECTION, &points).await {
            warn!(user = user_did, error = %e, "Candidate upsert failed");
        }
        Ok(())
    }

    /// Hydrate image posts through the AppView, 25 at a time. Failures fall
    /// back to stored text.
    async fn hydrate_inputs(&self, candidates: &[&ScoredCandidate]) -> Vec<EmbedInput> {
        let mut inputs = Vec::new();
        for chunk in candidates.chunks(HYDRATION_CHUNK) {
            let uris: Vec<String> = chunk.iter().map(|c| c.post.uri.clone()).collect();
            match self.appview.get_posts(&uris).await {
                Ok(views) => {
                    let by_uri: HashMap<&str, _> =
                        views.iter().map(|v| (v.uri.as_str(), v)).collect();
                    for candidate in chunk {
                        let post = &candidate.post;
                        match by_uri.get(post.uri.as_str()) {
                            Some(view) => inputs.push(EmbedInput {
                                uri: post.uri.clone(),
                                text: view
                                    .text
                                    .clone()
                                    .or_else(|| post.text.clone())
                                    .unwrap_or_default(),
                                image_urls: view.image_urls.clone(),
                                alt_text: view.alt_texts.clone(),
                            }),
                            None => {
                                if let Some(text) = post.text.clone() {
                                    inputs.push(EmbedInput {
                                        uri: post.uri.clone(),
                                        text,
                                        image_urls: Vec::new(),
                                        alt_text: Vec::new(),
                                    });
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Post hydration failed, using stored text");
                    for candidate in chunk {
                        if let Some(text) = candidate.post.text.clone() {
                            inputs.push(EmbedInput {
                                uri: candidate.post.uri.clone(),
                                text,
                                image_urls: Vec::new(),
                                alt_text: Vec::new(),
                            });
                        }
                    }
                }
            }
        }
        inputs
    }

    /// Recent likes/reposts plus positively-marked feedback posts.
    async fn recent_positive_uris(&self, user_did: &str) -> Result<Vec<String>> {
        let now = Utc::now();
        let mut uris: HashSet<String> = self
            .graph_repo
            .recent_own_engagements(user_did, now - Duration::days(LIKED_WINDOW_DAYS))
            .await?
            .into_iter()
            .collect();
        uris.extend(
            self.feedback_repo
                .positive_uris(user_did, now - Duration::days(FEEDBACK_WINDOW_DAYS))
                .await?,
        );
        Ok(uris.into_iter().collect())
    }

    /// Embed the user's liked posts that aren't in the index yet.
    async fn embed_liked(
        &self,
        user_did: &str,
        liked_uris: &[String],
        already_embedded: &HashSet<String>,
        pool: &[ScoredCandidate],
    ) -> Result<()> {
        let pool_posts: HashMap<&str, &ScoredCandidate> =
            pool.iter().map(|c| (c.post.uri.as_str(), c)).collect();

        let missing: Vec<String> = liked_uris
            .iter()
            .filter(|uri| !already_embedded.contains(*uri))
            .cloned()
            .collect();
        if missing.is_empty() {
            return Ok(());
        }

        let mut inputs: Vec<EmbedInput> = Vec::new();
        let mut authors: HashMap<String, (String, i32, chrono::DateTime<Utc>)> = HashMap::new();
        for chunk in missing.chunks(HYDRATION_CHUNK) {
            match self.appview.get_posts(chunk).await {
                Ok(views) => {
                    for view in views {
                        let text = view.text.clone().unwrap_or_default();
                        if text.chars().count() <= MIN_EMBED_TEXT_LEN && view.image_urls.is_empty()
                        {
                            continue;
                        }
                        // Payload metadata comes from the live pool when the
                        // liked post happens to be a candidate too.
                        let (author, like_count, indexed_at) =
                            match pool_posts.get(view.uri.as_str()) {
                                Some(c) => {
                                    (c.post.author.clone(), c.post.like_count, c.post.indexed_at)
                                }
                                None => (
                                    super::ranking::replies::author_from_uri(&view.uri)
                                        .unwrap_or_default()
                                        .to_string(),
                                    0,
                                    Utc::now(),
                                ),
                            };
                        authors.insert(view.uri.clone(), (author, like_count, indexed_at));
                        inputs.push(EmbedInput {
                            uri: view.uri,
                            text,
                            image_urls: view.image_urls,
                            alt_text: view.alt_texts,
                        });
                    }
                }
                Err(e) => warn!(error = %e, "Liked-post hydration failed"),
            }
        }
        if inputs.is_empty() {
            return Ok(());
        }

        let outputs = match self.embedder.embed(&inputs).await {
            Ok(outputs) => outputs,
            Err(e) => {
                warn!(user = user_did, error = %e, "Liked-post embedding failed");
                return Ok(());
            }
        };
        let points: Vec<Point> = outputs
            .into_iter()
            .map(|out| {
                let (author, like_count, indexed_at) = authors
                    .get(&out.uri)
                    .cloned()
                    .unwrap_or_else(|| (String::new(), 0, Utc::now()));
                Point {
                    id: point_id(user_did, &out.uri),
                    vector: out.vector,
                    payload: json!({
                        "uri": out.uri,
                        "author": author,
                        "indexedAt": indexed_at.to_rfc3339(),
                        "likeCount": like_count,
                        "discoveredBy": user_did,
                    }),
                }
            })
            .collect();
        if let Err(e) = self.vector.upsert(POST_COLLECTION, &points).await {
            warn!(user = user_did, error = %e, "Liked-post upsert failed");
        }
        Ok(())
    }

    /// Cluster the user's liked-post vectors into interest centroids and
    /// replace their profile points.
    async fn build_profile(
        &self,
        user_did: &str,
        liked_uris: &[String],
    ) -> Result<Vec<Centroid>> {
        let liked_set: HashSet<&str> = liked_uris.iter().map(String::as_str).collect();
        let points = match self
            .vector
            .scroll_all(POST_COLLECTION, field_match("discoveredBy", user_did), true)
            .await
        {
            Ok(points) => points,
            Err(e) => {
                warn!(user = user_did, error = %e, "Profile scroll failed");
                return Ok(Vec::new());
            }
        };

        let liked_vectors: Vec<Vec<f32>> = points
            .into_iter()
            .filter(|p| {
                p.payload
                    .get("uri")
                    .and_then(|v| v.as_str())
                    .is_some_and(|uri| liked_set.contains(uri))
            })
            .filter_map(|p| p.vector)
            .collect();
        if liked_vectors.len() < MIN_PROFILE_VECTORS {
            debug!(
                user = user_did,
                vectors = liked_vectors.len(),
                "Too few liked vectors for a profile"
            );
            return Ok(Vec::new());
        }

        let cluster_inputs: Vec<ClusterInput> = liked_vectors
            .into_iter()
            .map(|vector| ClusterInput {
                vector,
                weight: None,
                interaction_type: Some("like".to_string()),
            })
            .collect();
        let clusters = match self.clusterer.cluster(&cluster_inputs).await {
            Ok(clusters) => clusters,
            Err(e) => {
                warn!(user = user_did, error = %e, "Clustering failed");
                return Ok(Vec::new());
            }
        };

        let centroids: Vec<Centroid> = clusters
            .into_iter()
            .map(|c| Centroid {
                cluster_id: c.cluster_id,
                vector: l2_normalize(c.centroid),
                weight: c.weight,
                post_count: c.post_count,
            })
            .collect();

        // Replace the old profile atomically from the index's view: delete
        // then upsert.
        if let Err(e) = self
            .vector
            .delete_by_filter(PROFILE_COLLECTION, field_match("userDid", user_did))
            .await
        {
            warn!(user = user_did, error = %e, "Profile delete failed");
        }
        let now = Utc::now();
        let points: Vec<Point> = centroids
            .iter()
            .map(|c| Point {
                id: profile_point_id(user_did, c.cluster_id),
                vector: c.vector.clone(),
                payload: json!({
                    "userDid": user_did,
                    "clusterId": c.cluster_id,
                    "weight": c.weight,
                    "postCount": c.post_count,
                    "updatedAt": now.to_rfc3339(),
                }),
            })
            .collect();
        if let Err(e) = self.vector.upsert(PROFILE_COLLECTION, &points).await {
            warn!(user = user_did, error = %e, "Profile upsert failed");
        }

        Ok(centroids)
    }

    /// Per-centroid ANN search with liked/seen/reputation filtering.
    async fn semantic_search(
        &self,
        user_did: &str,
        centroids: &[Centroid],
        pipeline_scores: &HashMap<String, f64>,
    ) -> Result<Vec<SemanticHit>> {
        if centroids.is_empty() {
            return Ok(Vec::new());
        }

        let interacted = self.graph_repo.interacted_uris(user_did).await?;
        let liked: HashSet<String> = interacted
            .get(&feed_core::models::InteractionKind::Like)
            .cloned()
            .unwrap_or_default();
        let seen_counts = self.serving_repo.seen_counts(user_did).await?;

        let mut best: HashMap<String, SemanticHit> = HashMap::new();
        for centroid in centroids {
            let limit = (SEARCH_WEIGHT_LIMIT * centroid.weight).round() + SEARCH_BASE_LIMIT;
            let hits = match self
                .vector
                .search(
                    POST_COLLECTION,
                    &centroid.vector,
                    limit as u64,
                    SEARCH_SCORE_THRESHOLD,
                    field_match("discoveredBy", user_did),
                )
                .await
            {
                Ok(hits) => hits,
                Err(e) => {
                    warn!(user = user_did, cluster = centroid.cluster_id, error = %e, "ANN search failed");
                    continue;
                }
            };

            for hit in hits {
                let Some(uri) = hit.payload.get("uri").and_then(|v| v.as_str()) else {
                    continue;
                };
                if liked.contains(uri) {
                    continue;
                }
                if seen_counts.get(uri).copied().unwrap_or(0) >= MAX_SEEN_COUNT {
                    continue;
                }
                let candidate = SemanticHit {
                    uri: uri.to_string(),
                    author: hit
                        .payload
                        .get("author")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    semantic_score: hit.score as f64,
                    pipeline_score: pipeline_scores
                        .get(uri)
                        .copied()
                        .unwrap_or(DISCOVERY_BASELINE_SCORE),
                    centroid_id: centroid.cluster_id,
                };
                best.entry(candidate.uri.clone())
                    .and_modify(|existing| {
                        if candidate.semantic_score > existing.semantic_score {
                            *existing = candidate.clone();
                        }
                    })
                    .or_insert(candidate);
            }
        }

        // Author-reputation filter over the deduplicated set.
        let authors: Vec<String> = best
            .values()
            .map(|h| h.author.clone())
            .filter(|a| !a.is_empty())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let reputations = self.taste_repo.reputations_for(user_did, &authors).await?;

        let mut hits: Vec<SemanticHit> = best
            .into_values()
            .filter(|hit| {
                reputations
                    .get(&hit.author)
                    .copied()
                    .unwrap_or(1.0)
                    >= MIN_AUTHOR_REPUTATION
            })
            .collect();
        hits.sort_by(|a, b| {
            b.semantic_score
                .partial_cmp(&a.semantic_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(BATCH_KEEP);
        Ok(hits)
    }

    /// Expired-row GC plus orphaned-point cleanup.
    async fn gc(&self, user_did: &str, liked_uris: &[String]) -> Result<()> {
        self.batch_repo
            .gc_expired(Duration::hours(BATCH_TTL_HOURS))
            .await?;

        let referenced: HashSet<String> = self
            .batch_repo
            .referenced_uris(user_did)
            .await?
            .into_iter()
            .chain(liked_uris.iter().cloned())
            .collect();

        let points = self
            .vector
            .scroll_all(POST_COLLECTION, field_match("discoveredBy", user_did), false)
            .await?;
        let orphans: Vec<u64> = points
            .into_iter()
            .filter(|p| {
                p.payload
                    .get("uri")
                    .and_then(|v| v.as_str())
                    .is_some_and(|uri| !referenced.contains(uri))
            })
            .map(|p| p.id)
            .collect();
        if !orphans.is_empty() {
            debug!(user = user_did, orphans = orphans.len(), "Deleting orphaned points");
            self.vector.delete_points(POST_COLLECTION, &orphans).await?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Centroid {
    pub cluster_id: i32,
    pub vector: Vec<f32>,
    pub weight: f64,
    pub post_count: i32,
}

#[derive(Debug, Clone)]
struct SemanticHit {
    uri: String,
    author: String,
    semantic_score: f64,
    pipeline_score: f64,
    centroid_id: i32,
}

/// Short hex batch id: two timestamp bytes plus two random bytes.
pub fn new_batch_id() -> String {
    let ts = (Utc::now().timestamp() & 0xFFFF) as u16;
    let noise: u16 = rand::thread_rng().gen();
    let mut bytes = [0u8; 4];
    bytes[..2].copy_from_slice(&ts.to_be_bytes());
    bytes[2..].copy_from_slice(&noise.to_be_bytes());
    hex::encode(bytes)
}

fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_ids_are_eight_hex_chars() {
        let id = new_batch_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn l2_normalize_produces_unit_vectors() {
        let v = l2_normalize(vec![3.0, 4.0]);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
        assert!((v[0] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn l2_normalize_leaves_zero_vector_alone() {
        let v = l2_normalize(vec![0.0, 0.0]);
        assert_eq!(v, vec![0.0, 0.0]);
    }
}
