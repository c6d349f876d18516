//! ANN vector-index client.
//!
//! The index is an opaque cosine-distance store with a Qdrant-shaped REST
//! surface: collections of 512-dim points with JSON payloads, filtered
//! search/scroll/delete. Two collections exist: `post_embeddings`
//! (per-user discovered posts) and `user_profiles` (interest centroids).

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::error::{CoreError, Result};

pub const POST_COLLECTION: &str = "post_embeddings";
pub const PROFILE_COLLECTION: &str = "user_profiles";
pub const VECTOR_DIM: usize = 512;

const VECTOR_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct VectorIndexClient {
    http: Client,
    base_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Point {
    pub id: u64,
    pub vector: Vec<f32>,
    pub payload: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScoredPoint {
    pub id: u64,
    pub score: f32,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScrolledPoint {
    pub id: u64,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub vector: Option<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
struct ScrollResult {
    points: Vec<ScrolledPoint>,
    #[serde(default)]
    next_page_offset: Option<Value>,
}

impl VectorIndexClient {
    pub fn new(base_url: String) -> Result<Self> {
        let http = Client::builder()
            .timeout(VECTOR_TIMEOUT)
            .build()
            .map_err(|e| CoreError::Config(format!("vector client: {e}")))?;
        Ok(Self { http, base_url })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Create both collections and their payload indexes. Safe to call on
    /// every startup; "already exists" responses are ignored.
    pub async fn ensure_collections(&self) -> Result<()> {
        for collection in [POST_COLLECTION, PROFILE_COLLECTION] {
            let resp = self
                .http
                .put(self.url(&format!("/collections/{collection}")))
                .json(&json!({
                    "vectors": {"size": VECTOR_DIM, "distance": "Cosine"}
                }))
                .send()
                .await?;
            if !resp.status().is_success() && resp.status() != reqwest::StatusCode::CONFLICT {
                return Err(CoreError::External(format!(
                    "create collection {collection}: {}",
                    resp.status()
                )));
            }
        }

        let payload_indexes = [
            (POST_COLLECTION, "discoveredBy", "keyword"),
            (POST_COLLECTION, "author", "keyword"),
            (POST_COLLECTION, "uri", "keyword"),
            (POST_COLLECTION, "indexedAt", "keyword"),
            (POST_COLLECTION, "likeCount", "integer"),
            (PROFILE_COLLECTION, "userDid", "keyword"),
            (PROFILE_COLLECTION, "clusterId", "integer"),
            (PROFILE_COLLECTION, "updatedAt", "keyword"),
        ];
        for (collection, field, schema) in payload_indexes {
            let resp = self
                .http
                .put(self.url(&format!("/collections/{collection}/index")))
                .json(&json!({"field_name": field, "field_schema": schema}))
                .send()
                .await?;
            if !resp.status().is_success() && resp.status() != reqwest::StatusCode::CONFLICT {
                debug!(collection, field, status = %resp.status(), "Payload index not created");
            }
        }
        Ok(())
    }

    pub async fn upsert(&self, collection: &str, points: &[Point]) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        self.http
            .put(self.url(&format!("/collections/{collection}/points?wait=true")))
            .json(&json!({"points": points}))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: u64,
        score_threshold: f32,
        filter: Value,
    ) -> Result<Vec<ScoredPoint>> {
        let resp: ApiEnvelope<Vec<ScoredPoint>> = self
            .http
            .post(self.url(&format!("/collections/{collection}/points/search")))
            .json(&json!({
                "vector": vector,
                "limit": limit,
                "score_threshold": score_threshold,
                "filter": filter,
                "with_payload": true,
            }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(resp.result)
    }

    /// Scroll every point matching the filter. Pages internally until the
    /// index reports no further offset.
    pub async fn scroll_all(
        &self,
        collection: &str,
        filter: Value,
        with_vector: bool,
    ) -> Result<Vec<ScrolledPoint>> {
        let mut out = Vec::new();
        let mut offset: Option<Value> = None;
        loop {
            let mut body = json!({
                "filter": filter,
                "limit": 256,
                "with_payload": true,
                "with_vector": with_vector,
            });
            if let Some(ref off) = offset {
                body["offset"] = off.clone();
            }
            let resp: ApiEnvelope<ScrollResult> = self
                .http
                .post(self.url(&format!("/collections/{collection}/points/scroll")))
                .json(&body)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            out.extend(resp.result.points);
            match resp.result.next_page_offset {
                Some(next) if !next.is_null() => offset = Some(next),
                _ => break,
            }
        }
        Ok(out)
    }

    pub async fn delete_by_filter(&self, collection: &str, filter: Value) -> Result<()> {
        self.http
            .post(self.url(&format!("/collections/{collection}/points/delete")))
            .json(&json!({"filter": filter}))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn delete_points(&self, collection: &str, ids: &[u64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.http
            .post(self.url(&format!("/collections/{collection}/points/delete")))
            .json(&json!({"points": ids}))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Filter matching a single payload field value.
pub fn field_match(key: &str, value: impl Into<Value>) -> Value {
    json!({"must": [{"key": key, "match": {"value": value.into()}}]})
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_match_builds_must_clause() {
        let f = field_match("discoveredBy", "did:plc:u");
        assert_eq!(f["must"][0]["key"], "discoveredBy");
        assert_eq!(f["must"][0]["match"]["value"], "did:plc:u");
    }
}
