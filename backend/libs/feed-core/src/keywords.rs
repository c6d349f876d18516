//! Keyword interest engine.
//!
//! Daily rebuilds merge fresh extractor output into the stored profile with
//! a parabolic decay: scores near ±1 decay harder than scores near zero, so
//! a profile can't saturate permanently. Explicit feedback nudges the words
//! of a single post directly.

use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use crate::clients::KeywordExtractorClient;
use crate::db::keyword_repo::KeywordRepo;
use crate::db::post_repo::PostRepo;
use crate::error::Result;
use crate::models::{FeedbackDirection, FeedbackStrength};

/// Entries below this magnitude are pruned.
pub const KEYWORD_PRUNE_FLOOR: f64 = 0.1;

/// Liked-corpus size per rebuild.
const LIKED_CORPUS_LIMIT: i64 = 200;

/// Background-corpus size per rebuild.
const BACKGROUND_CORPUS_LIMIT: i64 = 1000;

/// Minimum word length eligible for feedback adjustment.
const FEEDBACK_MIN_WORD_LEN: usize = 4;

/// `1 − (0.03 + 0.12·(1 − (1−|s|)²))`: the decay factor shrinks as the
/// stored score's magnitude grows.
pub fn parabolic_decay_factor(existing: f64) -> f64 {
    let abs = existing.abs().min(1.0);
    let parabolic = 1.0 - (1.0 - abs) * (1.0 - abs);
    1.0 - (0.03 + 0.12 * parabolic)
}

/// Merge fresh extractor output into the stored profile. Keywords absent
/// from the fresh round decay on their own; everything is clamped to
/// [-1, 1] and sub-floor results are dropped.
pub fn merge_keyword_scores(
    existing: &HashMap<String, f64>,
    fresh: &[(String, f64)],
) -> Vec<(String, f64)> {
    let mut merged: HashMap<String, f64> = HashMap::new();

    for (keyword, new_score) in fresh {
        let old = existing.get(keyword).copied().unwrap_or(0.0);
        let score = (parabolic_decay_factor(old) * old + new_score).clamp(-1.0, 1.0);
        merged.insert(keyword.clone(), score);
    }

    let fresh_keys: HashSet<&str> = fresh.iter().map(|(k, _)| k.as_str()).collect();
    for (keyword, old) in existing {
        if fresh_keys.contains(keyword.as_str()) {
            continue;
        }
        let decayed = parabolic_decay_factor(*old) * old;
        merged.insert(keyword.clone(), decayed.clamp(-1.0, 1.0));
    }

    merged
        .into_iter()
        .filter(|(_, score)| score.abs() >= KEYWORD_PRUNE_FLOOR)
        .collect()
}

/// Lowercased words of a post eligible for feedback adjustment.
pub fn feedback_words(text: &str, restricted: &HashSet<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= FEEDBACK_MIN_WORD_LEN)
    {
        let lower = word.to_lowercase();
        if restricted.contains(&lower) || !seen.insert(lower.clone()) {
            continue;
        }
        out.push(lower);
    }
    out
}

#[derive(Clone)]
pub struct KeywordEngine {
    keyword_repo: KeywordRepo,
    post_repo: PostRepo,
    extractor: KeywordExtractorClient,
    restricted: HashSet<String>,
}

impl KeywordEngine {
    pub fn new(
        keyword_repo: KeywordRepo,
        post_repo: PostRepo,
        extractor: KeywordExtractorClient,
        restricted: HashSet<String>,
    ) -> Self {
        Self {
            keyword_repo,
            post_repo,
            extractor,
            restricted,
        }
    }

    /// One daily rebuild round for a user.
    pub async fn rebuild_for_user(&self, user_did: &str) -> Result<usize> {
        let liked = self.post_repo.liked_texts(user_did, LIKED_CORPUS_LIMIT).await?;
        if liked.is_empty() {
            debug!(user = user_did, "No liked corpus, skipping keyword rebuild");
            return Ok(0);
        }
        let background = self.post_repo.random_texts(BACKGROUND_CORPUS_LIMIT).await?;

        let fresh = self.extractor.extract(&liked, &background).await?;
        let existing: HashMap<String, f64> = self
            .keyword_repo
            .for_user(user_did)
            .await?
            .into_iter()
            .map(|k| (k.keyword, k.score))
            .collect();

        let merged = merge_keyword_scores(&existing, &fresh);
        self.keyword_repo.upsert_scores(user_did, &merged).await?;
        let pruned = self
            .keyword_repo
            .prune_below(user_did, KEYWORD_PRUNE_FLOOR)
            .await?;

        info!(
            user = user_did,
            keywords = merged.len(),
            pruned,
            "Keyword profile rebuilt"
        );
        Ok(merged.len())
    }

    /// Nudge the scores of a post's words after explicit more/less
    /// feedback. Restricted keywords never move.
    pub async fn apply_feedback(
        &self,
        user_did: &str,
        post_text: &str,
        direction: FeedbackDirection,
        strength: FeedbackStrength,
    ) -> Result<()> {
        let delta = match (direction, strength) {
            (FeedbackDirection::More, FeedbackStrength::Strong) => 0.3,
            (FeedbackDirection::More, FeedbackStrength::Weak) => 0.1,
            (FeedbackDirection::Less, FeedbackStrength::Strong) => -0.3,
            (FeedbackDirection::Less, FeedbackStrength::Weak) => -0.1,
        };

        let words = feedback_words(post_text, &self.restricted);
        if words.is_empty() {
            return Ok(());
        }

        let existing: HashMap<String, f64> = self
            .keyword_repo
            .for_user(user_did)
            .await?
            .into_iter()
            .map(|k| (k.keyword, k.score))
            .collect();

        let updates: Vec<(String, f64)> = words
            .into_iter()
            .map(|w| {
                let old = existing.get(&w).copied().unwrap_or(0.0);
                (w, (old + delta).clamp(-1.0, 1.0))
            })
            .collect();
        Ok(self.keyword_repo.upsert_scores(user_did, &updates).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decay_factor_is_parabolic() {
        // Fresh keyword: only the base decay applies.
        assert!((parabolic_decay_factor(0.0) - 0.97).abs() < 1e-9);
        // Saturated keyword: full decay.
        assert!((parabolic_decay_factor(1.0) - 0.85).abs() < 1e-9);
        assert!((parabolic_decay_factor(-1.0) - 0.85).abs() < 1e-9);
        // Midpoint decays harder than fresh but softer than saturated.
        let mid = parabolic_decay_factor(0.5);
        assert!(mid < 0.97 && mid > 0.85);
    }

    #[test]
    fn merge_adds_new_scores_onto_decayed_existing() {
        let existing = HashMap::from([("rust".to_string(), 0.5)]);
        let fresh = vec![("rust".to_string(), 0.2)];
        let merged = merge_keyword_scores(&existing, &fresh);
        let factor = parabolic_decay_factor(0.5);
        let expected = factor * 0.5 + 0.2;
        let got = merged.iter().find(|(k, _)| k == "rust").unwrap().1;
        assert!((got - expected).abs() < 1e-9);
    }

    #[test]
    fn unseen_keywords_decay_and_prune() {
        let existing = HashMap::from([
            ("strong".to_string(), 0.8),
            ("fading".to_string(), 0.102),
        ]);
        let merged = merge_keyword_scores(&existing, &[]);
        // 0.102 decays below the 0.1 floor and is dropped.
        assert!(merged.iter().all(|(k, _)| k != "fading"));
        assert!(merged.iter().any(|(k, _)| k == "strong"));
    }

    #[test]
    fn merge_clamps_to_unit_interval() {
        let existing = HashMap::from([("hot".to_string(), 0.9)]);
        let fresh = vec![("hot".to_string(), 0.9)];
        let merged = merge_keyword_scores(&existing, &fresh);
        assert_eq!(merged.iter().find(|(k, _)| k == "hot").unwrap().1, 1.0);
    }

    #[test]
    fn feedback_words_filters_short_and_restricted() {
        let restricted = HashSet::from(["politics".to_string()]);
        let words = feedback_words("Politics and big cats, big CATS!", &restricted);
        assert_eq!(words, vec!["cats".to_string()]);
    }
}
