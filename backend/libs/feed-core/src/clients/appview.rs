//! AppView client: social-graph fetches, post likers, post hydration, and
//! profile stats over XRPC.

use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

use crate::error::{CoreError, Result};

const APPVIEW_TIMEOUT: Duration = Duration::from_secs(30);

/// Page size for follow pagination.
const FOLLOWS_PAGE: u32 = 100;

/// XRPC batch limit for getPosts / getProfiles.
pub const HYDRATION_CHUNK: usize = 25;

#[derive(Clone)]
pub struct AppViewClient {
    http: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct FollowsResponse {
    follows: Vec<ActorRef>,
    cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ActorRef {
    did: String,
}

#[derive(Debug, Deserialize)]
struct LikesResponse {
    likes: Vec<LikeEntry>,
}

#[derive(Debug, Deserialize)]
struct LikeEntry {
    actor: ActorRef,
}

#[derive(Debug, Deserialize)]
struct PostsResponse {
    posts: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct ProfilesResponse {
    profiles: Vec<ProfileView>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileView {
    did: String,
    #[serde(default)]
    followers_count: i64,
}

/// A hydrated post view reduced to what the embedding stage needs.
#[derive(Debug, Clone)]
pub struct HydratedPost {
    pub uri: String,
    pub text: Option<String>,
    pub image_urls: Vec<String>,
    pub alt_texts: Vec<String>,
}

impl AppViewClient {
    pub fn new(base_url: String) -> Result<Self> {
        let http = Client::builder()
            .timeout(APPVIEW_TIMEOUT)
            .build()
            .map_err(|e| CoreError::Config(format!("appview client: {e}")))?;
        Ok(Self { http, base_url })
    }

    fn xrpc(&self, method: &str) -> String {
        format!("{}/xrpc/{}", self.base_url.trim_end_matches('/'), method)
    }

    /// One page of the actor's follows.
    pub async fn get_follows(
        &self,
        actor: &str,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<(Vec<String>, Option<String>)> {
        let mut query: Vec<(&str, String)> = vec![
            ("actor", actor.to_string()),
            ("limit", limit.min(FOLLOWS_PAGE).to_string()),
        ];
        if let Some(c) = cursor {
            query.push(("cursor", c.to_string()));
        }
        let resp: FollowsResponse = self
            .http
            .get(self.xrpc("app.bsky.graph.getFollows"))
            .query(&query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok((
            resp.follows.into_iter().map(|f| f.did).collect(),
            resp.cursor,
        ))
    }

    /// DIDs of actors who liked the post. Failure degrades to an empty list
    /// at the call site.
    pub async fn get_post_likers(&self, uri: &str, limit: u32) -> Result<Vec<String>> {
        let resp: LikesResponse = self
            .http
            .get(self.xrpc("app.bsky.feed.getLikes"))
            .query(&[("uri", uri), ("limit", &limit.to_string())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(resp.likes.into_iter().map(|l| l.actor.did).collect())
    }

    /// Hydrate up to 25 posts, extracting text plus embedded image URLs and
    /// alt texts for the embedder.
    pub async fn get_posts(&self, uris: &[String]) -> Result<Vec<HydratedPost>> {
        if uris.is_empty() {
            return Ok(Vec::new());
        }
        let query: Vec<(&str, &str)> = uris
            .iter()
            .take(HYDRATION_CHUNK)
            .map(|u| ("uris", u.as_str()))
            .collect();
        let resp: PostsResponse = self
            .http
            .get(self.xrpc("app.bsky.feed.getPosts"))
            .query(&query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(resp.posts.iter().filter_map(parse_post_view).collect())
    }

    /// Follower counts for up to 25 DIDs.
    pub async fn get_follower_counts(&self, dids: &[String]) -> Result<HashMap<String, i64>> {
        if dids.is_empty() {
            return Ok(HashMap::new());
        }
        let query: Vec<(&str, &str)> = dids
            .iter()
            .take(HYDRATION_CHUNK)
            .map(|d| ("actors", d.as_str()))
            .collect();
        let resp: ProfilesResponse = self
            .http
            .get(self.xrpc("app.bsky.actor.getProfiles"))
            .query(&query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(resp
            .profiles
            .into_iter()
            .map(|p| (p.did, p.followers_count))
            .collect())
    }
}

/// Pull the fields the embedder cares about out of a raw post view. Views
/// with malformed embeds are skipped, not fatal.
fn parse_post_view(view: &Value) -> Option<HydratedPost> {
    let uri = view.get("uri")?.as_str()?.to_string();
    let text = view
        .pointer("/record/text")
        .and_then(Value::as_str)
        .map(str::to_string);

    let mut image_urls = Vec::new();
    let mut alt_texts = Vec::new();
    if let Some(images) = view.pointer("/embed/images").and_then(Value::as_array) {
        for img in images {
            match img.get("fullsize").and_then(Value::as_str) {
                Some(url) => {
                    image_urls.push(url.to_string());
                    alt_texts.push(
                        img.get("alt")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                    );
                }
                None => warn!(uri = %uri, "Skipping malformed image embed"),
            }
        }
    }

    Some(HydratedPost {
        uri,
        text,
        image_urls,
        alt_texts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_post_view_extracts_images_and_alts() {
        let view = json!({
            "uri": "at://did:plc:a/app.bsky.feed.post/1",
            "record": {"text": "hello"},
            "embed": {"images": [
                {"fullsize": "https://cdn/img1.jpg", "alt": "a dog"},
                {"thumb": "https://cdn/broken.jpg"}
            ]}
        });
        let parsed = parse_post_view(&view).unwrap();
        assert_eq!(parsed.text.as_deref(), Some("hello"));
        assert_eq!(parsed.image_urls, vec!["https://cdn/img1.jpg"]);
        assert_eq!(parsed.alt_texts, vec!["a dog"]);
    }

    #[test]
    fn parse_post_view_requires_uri() {
        assert!(parse_post_view(&json!({"record": {"text": "x"}})).is_none());
    }
}
