//! Tracked DID sets.
//!
//! Two distinct sets drive per-event behavior: `own` is the whitelist the
//! system serves feeds for; `interaction` widens that to Layer-1 follows
//! and high-reputation taste-twins. Both refresh on a 15-minute clock.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use feed_core::db::graph_repo::GraphRepo;
use feed_core::db::taste_repo::TasteRepo;
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Clone)]
pub struct TrackedSets {
    own: Arc<RwLock<HashSet<String>>>,
    interaction: Arc<RwLock<HashSet<String>>>,
}

impl TrackedSets {
    pub fn new(whitelist: HashSet<String>) -> Self {
        Self {
            own: Arc::new(RwLock::new(whitelist.clone())),
            interaction: Arc::new(RwLock::new(whitelist)),
        }
    }

    pub async fn is_own(&self, did: &str) -> bool {
        self.own.read().await.contains(did)
    }

    pub async fn is_interaction(&self, did: &str) -> bool {
        self.interaction.read().await.contains(did)
    }

    pub async fn own_dids(&self) -> Vec<String> {
        self.own.read().await.iter().cloned().collect()
    }

    pub async fn interaction_dids(&self) -> Vec<String> {
        self.interaction.read().await.iter().cloned().collect()
    }

    /// Recompute the interaction set: whitelist ∪ each member's L1 ∪
    /// their high-reputation taste-twins.
    pub async fn refresh(
        &self,
        graph_repo: &GraphRepo,
        taste_repo: &TasteRepo,
        whitelist: &HashSet<String>,
        min_twin_reputation: f64,
    ) {
        let mut interaction: HashSet<String> = whitelist.clone();

        for did in whitelist {
            match graph_repo.l1_follows(did).await {
                Ok(follows) => interaction.extend(follows),
                Err(e) => warn!(user = %did, error = %e, "L1 fetch failed during tracked refresh"),
            }
        }

        let whitelist_vec: Vec<String> = whitelist.iter().cloned().collect();
        match taste_repo
            .high_reputation_twins(&whitelist_vec, min_twin_reputation)
            .await
        {
            Ok(twins) => interaction.extend(twins),
            Err(e) => warn!(error = %e, "Twin fetch failed during tracked refresh"),
        }

        let interaction_len = interaction.len();
        *self.own.write().await = whitelist.clone();
        *self.interaction.write().await = interaction;
        info!(
            own = whitelist.len(),
            interaction = interaction_len,
            "Tracked sets refreshed"
        );
    }
}

/// Periodic refresh loop; one instance per process.
pub async fn run_refresher(
    tracked: TrackedSets,
    graph_repo: GraphRepo,
    taste_repo: TasteRepo,
    whitelist: HashSet<String>,
    min_twin_reputation: f64,
    interval_secs: u64,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    loop {
        interval.tick().await;
        tracked
            .refresh(&graph_repo, &taste_repo, &whitelist, min_twin_reputation)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_sets_start_from_whitelist() {
        let whitelist: HashSet<String> =
            ["did:plc:a".to_string(), "did:plc:b".to_string()].into();
        let tracked = TrackedSets::new(whitelist);
        assert!(tracked.is_own("did:plc:a").await);
        assert!(tracked.is_interaction("did:plc:b").await);
        assert!(!tracked.is_own("did:plc:z").await);
    }
}
