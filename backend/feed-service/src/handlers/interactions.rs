//! `app.bsky.feed.sendInteractions`.
//!
//! Seen reports feed the seen log and affinity decay; like/dislike and
//! request-more/less run the explicit-feedback path. Everything else is
//! logged and acknowledged.

use actix_web::{post, web, HttpRequest, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use feed_core::models::{FeedbackDirection, FeedbackStrength};

use crate::auth::requester_did;
use crate::error::{AppError, Result};
use crate::metrics;

use super::ApiState;

#[derive(Debug, Deserialize)]
pub struct InteractionsBody {
    #[serde(default)]
    pub interactions: Vec<Interaction>,
}

#[derive(Debug, Deserialize)]
pub struct Interaction {
    #[serde(default)]
    pub item: Option<String>,
    #[serde(default)]
    pub event: Option<String>,
}

/// The feedback path each event maps onto.
#[derive(Debug, PartialEq, Eq)]
enum EventKind {
    Seen,
    Feedback(FeedbackDirection, FeedbackStrength),
    Ignored,
}

fn classify_event(event: &str) -> EventKind {
    // Events arrive as full lexicon refs; match on the fragment.
    match event.rsplit('#').next().unwrap_or(event) {
        "interactionSeen" => EventKind::Seen,
        "interactionLike" => EventKind::Feedback(FeedbackDirection::More, FeedbackStrength::Weak),
        "requestMore" => EventKind::Feedback(FeedbackDirection::More, FeedbackStrength::Strong),
        "interactionDislike" => {
            EventKind::Feedback(FeedbackDirection::Less, FeedbackStrength::Weak)
        }
        "requestLess" => EventKind::Feedback(FeedbackDirection::Less, FeedbackStrength::Strong),
        _ => EventKind::Ignored,
    }
}

#[post("/xrpc/app.bsky.feed.sendInteractions")]
pub async fn send_interactions(
    req: HttpRequest,
    body: web::Json<InteractionsBody>,
    state: web::Data<ApiState>,
) -> Result<HttpResponse> {
    let requester = requester_did(&req)?;
    if !state.feed.whitelist.contains(&requester) {
        metrics::observe_http_request("sendInteractions", 403);
        return Err(AppError::AccountRestricted(requester));
    }

    let mut seen_uris: Vec<String> = Vec::new();
    for interaction in &body.interactions {
        let (Some(item), Some(event)) = (&interaction.item, &interaction.event) else {
            continue;
        };
        match classify_event(event) {
            EventKind::Seen => seen_uris.push(item.clone()),
            EventKind::Feedback(direction, strength) => {
                if let Err(e) = state
                    .feedback
                    .apply(&requester, item, direction, strength)
                    .await
                {
                    warn!(user = %requester, uri = %item, error = %e, "Feedback failed");
                }
            }
            EventKind::Ignored => {
                debug!(user = %requester, event = %event, "Ignoring interaction event");
            }
        }
    }

    if !seen_uris.is_empty() {
        if let Err(e) = state.serving_repo.record_seen(&requester, &seen_uris).await {
            warn!(user = %requester, error = %e, "Seen-log write failed");
        }
        // Visibility without engagement cools author affinity.
        for uri in &seen_uris {
            match state.post_repo.get_by_uri(uri).await {
                Ok(Some(post)) => {
                    if let Err(e) = state.fatigue_engine.on_seen(&requester, &post.author).await {
                        warn!(user = %requester, error = %e, "Seen affinity decay failed");
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(uri = %uri, error = %e, "Post lookup failed for seen event"),
            }
        }
    }

    metrics::observe_http_request("sendInteractions", 200);
    Ok(HttpResponse::Ok().json(json!({})))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_lexicon_fragments() {
        assert_eq!(
            classify_event("app.bsky.feed.defs#interactionSeen"),
            EventKind::Seen
        );
        assert_eq!(
            classify_event("app.bsky.feed.defs#requestLess"),
            EventKind::Feedback(FeedbackDirection::Less, FeedbackStrength::Strong)
        );
        assert_eq!(
            classify_event("interactionLike"),
            EventKind::Feedback(FeedbackDirection::More, FeedbackStrength::Weak)
        );
        assert_eq!(
            classify_event("app.bsky.feed.defs#clickthroughItem"),
            EventKind::Ignored
        );
        assert_eq!(
            classify_event("app.bsky.feed.defs#interactionShare"),
            EventKind::Ignored
        );
    }
}
