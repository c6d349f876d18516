//! HTTP handlers for the generator's XRPC surface.

pub mod describe;
pub mod feed;
pub mod interactions;

use feed_core::clients::IdentityClient;
use feed_core::db::post_repo::PostRepo;
use feed_core::db::serving_repo::ServingRepo;
use feed_core::fatigue::FatigueEngine;
use sqlx::PgPool;

use crate::config::FeedConfig;
use crate::services::feedback::FeedbackService;
use crate::services::fusion::FusionService;

pub use describe::{describe_feed_generator, did_document, health};
pub use feed::get_feed_skeleton;
pub use interactions::send_interactions;

/// Shared handler state.
pub struct ApiState {
    pub feed: FeedConfig,
    pub fusion: FusionService,
    pub feedback: FeedbackService,
    pub serving_repo: ServingRepo,
    pub fatigue_engine: FatigueEngine,
    pub post_repo: PostRepo,
    pub identity: Option<IdentityClient>,
    pub pool: PgPool,
}
