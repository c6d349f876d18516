//! Upstream event parsing.
//!
//! The firehose payload is untyped JSON; it is parsed exactly once, here,
//! into a tagged `FeedEvent`. Anything unrecognized (account events,
//! unknown collections, updates) maps to `None` and is skipped.

use feed_core::models::sanitize_text;
use serde::Deserialize;
use serde_json::Value;

pub const POST_COLLECTION: &str = "app.bsky.feed.post";
pub const LIKE_COLLECTION: &str = "app.bsky.feed.like";
pub const REPOST_COLLECTION: &str = "app.bsky.feed.repost";

/// Raw firehose envelope.
#[derive(Debug, Deserialize)]
pub struct RawEvent {
    pub did: String,
    pub time_us: i64,
    pub kind: String,
    #[serde(default)]
    pub commit: Option<RawCommit>,
}

#[derive(Debug, Deserialize)]
pub struct RawCommit {
    pub operation: String,
    pub collection: String,
    pub rkey: String,
    #[serde(default)]
    pub record: Option<Value>,
    #[serde(default)]
    pub cid: Option<String>,
}

/// The events the ingester acts on.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    CreatePost {
        uri: String,
        cid: String,
        author: String,
        text: Option<String>,
        reply_root: Option<String>,
        reply_parent: Option<String>,
        has_image: bool,
        has_video: bool,
        has_external: bool,
        time_us: i64,
    },
    DeletePost {
        uri: String,
        time_us: i64,
    },
    CreateLike {
        actor: String,
        subject_uri: String,
        record_uri: String,
        time_us: i64,
    },
    CreateRepost {
        actor: String,
        subject_uri: String,
        record_uri: String,
        time_us: i64,
    },
}

impl FeedEvent {
    pub fn time_us(&self) -> i64 {
        match self {
            Self::CreatePost { time_us, .. }
            | Self::DeletePost { time_us, .. }
            | Self::CreateLike { time_us, .. }
            | Self::CreateRepost { time_us, .. } => *time_us,
        }
    }
}

/// Parse one raw message. Returns `None` for messages the ingester does not
/// care about; malformed records inside a known collection are dropped the
/// same way rather than failing the batch.
pub fn parse_event(raw: &str) -> Option<FeedEvent> {
    let event: RawEvent = serde_json::from_str(raw).ok()?;
    if event.kind != "commit" {
        return None;
    }
    let commit = event.commit?;
    let uri = record_uri(&event.did, &commit.collection, &commit.rkey);

    match (commit.operation.as_str(), commit.collection.as_str()) {
        ("create", POST_COLLECTION) => {
            let record = commit.record?;
            let text = record
                .get("text")
                .and_then(Value::as_str)
                .map(sanitize_text)
                .filter(|t| !t.is_empty());
            let (has_image, has_video, has_external) = embed_flags(&record);
            Some(FeedEvent::CreatePost {
                uri,
                cid: commit.cid.unwrap_or_default(),
                author: event.did,
                text,
                reply_root: record
                    .pointer("/reply/root/uri")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                reply_parent: record
                    .pointer("/reply/parent/uri")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                has_image,
                has_video,
                has_external,
                time_us: event.time_us,
            })
        }
        ("delete", POST_COLLECTION) => Some(FeedEvent::DeletePost {
            uri,
            time_us: event.time_us,
        }),
        ("create", LIKE_COLLECTION) => {
            let subject_uri = subject_uri(commit.record.as_ref()?)?;
            Some(FeedEvent::CreateLike {
                actor: event.did,
                subject_uri,
                record_uri: uri,
                time_us: event.time_us,
            })
        }
        ("create", REPOST_COLLECTION) => {
            let subject_uri = subject_uri(commit.record.as_ref()?)?;
            Some(FeedEvent::CreateRepost {
                actor: event.did,
                subject_uri,
                record_uri: uri,
                time_us: event.time_us,
            })
        }
        _ => None,
    }
}

fn record_uri(did: &str, collection: &str, rkey: &str) -> String {
    format!("at://{did}/{collection}/{rkey}")
}

fn subject_uri(record: &Value) -> Option<String> {
    record
        .pointer("/subject/uri")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// (has_image, has_video, has_external) from the record's embed union,
/// including media wrapped in a record-with-media embed.
fn embed_flags(record: &Value) -> (bool, bool, bool) {
    let embed_type = |v: &Value| {
        v.get("$type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let Some(embed) = record.get("embed") else {
        return (false, false, false);
    };

    let mut ty = embed_type(embed);
    if ty.ends_with("recordWithMedia") {
        if let Some(media) = embed.get("media") {
            ty = embed_type(media);
        }
    }

    (
        ty.ends_with("images"),
        ty.ends_with("video"),
        ty.ends_with("external") || ty.ends_with("record") || ty.ends_with("recordWithMedia"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn commit_msg(collection: &str, operation: &str, record: Value) -> String {
        json!({
            "did": "did:plc:author",
            "time_us": 1_700_000_000_000_000i64,
            "kind": "commit",
            "commit": {
                "operation": operation,
                "collection": collection,
                "rkey": "3kabc",
                "cid": "bafyrei",
                "record": record,
            }
        })
        .to_string()
    }

    #[test]
    fn parses_create_post_with_reply() {
        let msg = commit_msg(
            POST_COLLECTION,
            "create",
            json!({
                "text": "hi\u{0000}there",
                "reply": {
                    "root": {"uri": "at://did:plc:r/app.bsky.feed.post/1"},
                    "parent": {"uri": "at://did:plc:p/app.bsky.feed.post/2"}
                }
            }),
        );
        match parse_event(&msg).unwrap() {
            FeedEvent::CreatePost {
                uri,
                author,
                text,
                reply_root,
                reply_parent,
                time_us,
                ..
            } => {
                assert_eq!(uri, "at://did:plc:author/app.bsky.feed.post/3kabc");
                assert_eq!(author, "did:plc:author");
                assert_eq!(text.as_deref(), Some("hithere"));
                assert_eq!(
                    reply_root.as_deref(),
                    Some("at://did:plc:r/app.bsky.feed.post/1")
                );
                assert_eq!(
                    reply_parent.as_deref(),
                    Some("at://did:plc:p/app.bsky.feed.post/2")
                );
                assert_eq!(time_us, 1_700_000_000_000_000);
            }
            other => panic!("wrong event: {other:?}"),
        }
    }

    #[test]
    fn parses_like_subject() {
        let msg = commit_msg(
            LIKE_COLLECTION,
            "create",
            json!({"subject": {"uri": "at://did:plc:x/app.bsky.feed.post/9", "cid": "bafy"}}),
        );
        match parse_event(&msg).unwrap() {
            FeedEvent::CreateLike {
                actor,
                subject_uri,
                record_uri,
                ..
            } => {
                assert_eq!(actor, "did:plc:author");
                assert_eq!(subject_uri, "at://did:plc:x/app.bsky.feed.post/9");
                assert_eq!(record_uri, "at://did:plc:author/app.bsky.feed.like/3kabc");
            }
            other => panic!("wrong event: {other:?}"),
        }
    }

    #[test]
    fn detects_image_embeds_behind_record_with_media() {
        let msg = commit_msg(
            POST_COLLECTION,
            "create",
            json!({
                "text": "look",
                "embed": {
                    "$type": "app.bsky.embed.recordWithMedia",
                    "media": {"$type": "app.bsky.embed.images", "images": []}
                }
            }),
        );
        match parse_event(&msg).unwrap() {
            FeedEvent::CreatePost { has_image, .. } => assert!(has_image),
            other => panic!("wrong event: {other:?}"),
        }
    }

    #[test]
    fn ignores_unknown_collections_and_kinds() {
        let msg = commit_msg("app.bsky.graph.follow", "create", json!({}));
        assert!(parse_event(&msg).is_none());

        let identity = json!({"did": "did:plc:a", "time_us": 1i64, "kind": "identity"});
        assert!(parse_event(&identity.to_string()).is_none());
    }

    #[test]
    fn malformed_like_is_dropped_not_fatal() {
        let msg = commit_msg(LIKE_COLLECTION, "create", json!({"subject": {}}));
        assert!(parse_event(&msg).is_none());
    }
}
