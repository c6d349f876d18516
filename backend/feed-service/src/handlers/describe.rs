//! Generator descriptor endpoints: `describeFeedGenerator`, the did:web
//! document, and the health probe (backed by a store connectivity check).

use actix_web::{get, web, HttpResponse};
use serde_json::json;

use crate::error::Result;

use super::ApiState;

#[get("/xrpc/app.bsky.feed.describeFeedGenerator")]
pub async fn describe_feed_generator(state: web::Data<ApiState>) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(json!({
        "did": state.feed.service_did,
        "feeds": [{"uri": state.feed.feed_uri()}],
    })))
}

#[get("/.well-known/did.json")]
pub async fn did_document(state: web::Data<ApiState>) -> Result<HttpResponse> {
    let hostname = state
        .feed
        .service_did
        .strip_prefix("did:web:")
        .unwrap_or(&state.feed.service_did);
    Ok(HttpResponse::Ok().json(json!({
        "@context": ["https://www.w3.org/ns/did/v1"],
        "id": state.feed.service_did,
        "service": [{
            "id": "#bsky_fg",
            "type": "BskyFeedGenerator",
            "serviceEndpoint": format!("https://{hostname}"),
        }],
    })))
}

#[get("/health")]
pub async fn health(state: web::Data<ApiState>) -> HttpResponse {
    if db_pool::health_check(&state.pool).await {
        HttpResponse::Ok().body("OK")
    } else {
        HttpResponse::ServiceUnavailable().body("database unreachable")
    }
}
