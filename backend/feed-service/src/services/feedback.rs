//! Explicit feedback propagation.
//!
//! A more/less signal on a post fans out four ways: author affinity and
//! fatigue, keyword scores for the post's words, taste reputation of the
//! post's external likers, and the feedback log the semantic pipeline
//! reads.

use tracing::{info, warn};

use feed_core::db::feedback_repo::FeedbackRepo;
use feed_core::db::post_repo::PostRepo;
use feed_core::fatigue::FatigueEngine;
use feed_core::graph::GraphService;
use feed_core::keywords::KeywordEngine;
use feed_core::models::{FeedbackDirection, FeedbackStrength, ReputationAction};
use feed_core::taste::TasteEngine;

use crate::error::Result;

/// External likers consulted per feedback event.
const FEEDBACK_LIKERS_CAP: u32 = 50;

#[derive(Clone)]
pub struct FeedbackService {
    post_repo: PostRepo,
    feedback_repo: FeedbackRepo,
    fatigue: FatigueEngine,
    keywords: KeywordEngine,
    taste: TasteEngine,
    graph: GraphService,
}

impl FeedbackService {
    pub fn new(
        post_repo: PostRepo,
        feedback_repo: FeedbackRepo,
        fatigue: FatigueEngine,
        keywords: KeywordEngine,
        taste: TasteEngine,
        graph: GraphService,
    ) -> Self {
        Self {
            post_repo,
            feedback_repo,
            fatigue,
            keywords,
            taste,
            graph,
        }
    }

    pub async fn apply(
        &self,
        user_did: &str,
        post_uri: &str,
        direction: FeedbackDirection,
        strength: FeedbackStrength,
    ) -> Result<()> {
        self.feedback_repo
            .record(user_did, post_uri, direction, strength)
            .await?;

        let post = self.post_repo.get_by_uri(post_uri).await?;
        let Some(post) = post else {
            // Feedback on a post we never indexed still reaches the likers.
            self.adjust_likers(user_did, post_uri, direction).await;
            return Ok(());
        };

        self.fatigue
            .on_feedback(user_did, &post.author, direction, strength)
            .await?;

        if let Some(text) = post.text.as_deref() {
            if let Err(e) = self
                .keywords
                .apply_feedback(user_did, text, direction, strength)
                .await
            {
                warn!(user = user_did, error = %e, "Keyword feedback failed");
            }
        }

        self.adjust_likers(user_did, post_uri, direction).await;

        info!(
            user = user_did,
            uri = post_uri,
            ?direction,
            ?strength,
            "Explicit feedback applied"
        );
        Ok(())
    }

    /// Reputation fan-out to the post's external likers.
    async fn adjust_likers(&self, user_did: &str, post_uri: &str, direction: FeedbackDirection) {
        let action = match direction {
            FeedbackDirection::More => ReputationAction::ExplicitMore,
            FeedbackDirection::Less => ReputationAction::ExplicitLess,
        };
        let likers = self.graph.post_likers(post_uri, FEEDBACK_LIKERS_CAP).await;
        for liker in likers {
            if liker == user_did {
                continue;
            }
            if let Err(e) = self.taste.update_reputation(user_did, &liker, action).await {
                warn!(user = user_did, liker = %liker, error = %e, "Liker reputation update failed");
            }
        }
    }
}
