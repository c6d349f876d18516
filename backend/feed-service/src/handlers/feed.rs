//! `app.bsky.feed.getFeedSkeleton`.

use actix_web::{get, web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::auth::requester_did;
use crate::error::{AppError, Result};
use crate::metrics;
use crate::services::ranking::Cursor;

use super::ApiState;

#[derive(Debug, Deserialize)]
pub struct FeedSkeletonParams {
    pub feed: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    pub cursor: Option<String>,
}

fn default_limit() -> usize {
    50
}

#[derive(Debug, Serialize)]
struct SkeletonReason {
    #[serde(rename = "$type")]
    type_: &'static str,
    repost: String,
}

#[derive(Debug, Serialize)]
struct SkeletonItem {
    post: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<SkeletonReason>,
}

#[derive(Debug, Serialize)]
struct SkeletonResponse {
    feed: Vec<SkeletonItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cursor: Option<String>,
}

#[get("/xrpc/app.bsky.feed.getFeedSkeleton")]
pub async fn get_feed_skeleton(
    req: HttpRequest,
    params: web::Query<FeedSkeletonParams>,
    state: web::Data<ApiState>,
) -> Result<HttpResponse> {
    let requester = requester_did(&req)?;

    if params.feed != state.feed.feed_uri() {
        metrics::observe_http_request("getFeedSkeleton", 400);
        return Err(AppError::UnsupportedAlgorithm(params.feed.clone()));
    }
    if !state.feed.whitelist.contains(&requester) {
        metrics::observe_http_request("getFeedSkeleton", 403);
        return Err(AppError::AccountRestricted(requester));
    }
    if let Some(identity) = &state.identity {
        if !identity.did_resolves(&requester).await {
            metrics::observe_http_request("getFeedSkeleton", 401);
            return Err(AppError::Unauthorized("Requester DID does not resolve".into()));
        }
    }

    let cursor = match params.cursor.as_deref() {
        Some(raw) if !raw.is_empty() => Some(
            Cursor::decode(raw).ok_or_else(|| AppError::BadRequest("Malformed cursor".into()))?,
        ),
        _ => None,
    };

    debug!(
        requester = %requester,
        limit = params.limit,
        has_cursor = cursor.is_some(),
        "Feed skeleton request"
    );

    let page = match state.fusion.serve(&requester, params.limit, cursor).await {
        Ok(page) => page,
        Err(e) => {
            warn!(requester = %requester, error = %e, "Feed serve failed");
            metrics::observe_http_request("getFeedSkeleton", 500);
            return Err(e);
        }
    };

    let response = SkeletonResponse {
        feed: page
            .items
            .into_iter()
            .map(|item| SkeletonItem {
                post: item.uri,
                reason: item.repost_uri.map(|repost| SkeletonReason {
                    type_: "app.bsky.feed.defs#skeletonReasonRepost",
                    repost,
                }),
            })
            .collect(),
        cursor: page.cursor,
    };
    metrics::observe_http_request("getFeedSkeleton", 200);
    Ok(HttpResponse::Ok().json(response))
}
