//! Step G: author diversity.
//!
//! Greedy interleave: each slot takes the highest-scoring candidate whose
//! author isn't one of the two most recently placed; every third slot the
//! ban relaxes to just "don't make it three in a row". If the strict pass
//! would throw away more than half the pool, the pre-diversity order wins,
//! minimally adjusted so no author ever takes three consecutive slots.

use super::ScoredCandidate;

pub fn diversify(sorted: Vec<ScoredCandidate>) -> Vec<ScoredCandidate> {
    diversify_by(sorted, |c| c.post.author.as_str())
}

/// Generic over the item type so serve-time fusion can reuse the same
/// policy on its fused candidates.
pub fn diversify_by<T, F>(sorted: Vec<T>, author_of: F) -> Vec<T>
where
    T: Clone,
    F: Fn(&T) -> &str + Copy,
{
    if sorted.len() <= 2 {
        return sorted;
    }
    let total = sorted.len();
    let strict = greedy_pass(sorted.clone(), author_of);
    if strict.len() * 2 >= total {
        return strict;
    }
    no_triple_pass(sorted, author_of)
}

fn last_authors<'a, T, F>(out: &'a [T], n: usize, author_of: F) -> Vec<&'a str>
where
    F: Fn(&T) -> &str,
{
    out.iter().rev().take(n).map(|c| author_of(c)).collect()
}

fn would_make_triple<T, F>(out: &[T], author: &str, author_of: F) -> bool
where
    F: Fn(&T) -> &str,
{
    let recent = last_authors(out, 2, author_of);
    recent.len() == 2 && recent.iter().all(|a| *a == author)
}

fn greedy_pass<T, F>(mut pool: Vec<T>, author_of: F) -> Vec<T>
where
    F: Fn(&T) -> &str + Copy,
{
    let mut out: Vec<T> = Vec::with_capacity(pool.len());
    while !pool.is_empty() {
        let relaxed = out.len() % 3 == 2;
        let recent = last_authors(&out, 2, author_of);

        let pick = pool.iter().position(|c| {
            if relaxed {
                !would_make_triple(&out, author_of(c), author_of)
            } else {
                !recent.contains(&author_of(c))
            }
        });
        match pick {
            Some(idx) => out.push(pool.remove(idx)),
            // Everything left would repeat the recent authors; drop it.
            None => break,
        }
    }
    out
}

/// Keep the score order but never allow an author three consecutive slots.
fn no_triple_pass<T, F>(pool: Vec<T>, author_of: F) -> Vec<T>
where
    F: Fn(&T) -> &str + Copy,
{
    let mut out: Vec<T> = Vec::with_capacity(pool.len());
    let mut deferred: Vec<T> = Vec::new();

    for candidate in pool {
        if would_make_triple(&out, author_of(&candidate), author_of) {
            deferred.push(candidate);
        } else {
            out.push(candidate);
            // A new author may unblock earlier deferrals.
            let mut i = 0;
            while i < deferred.len() {
                if !would_make_triple(&out, author_of(&deferred[i]), author_of) {
                    let unblocked = deferred.remove(i);
                    out.push(unblocked);
                    i = 0;
                } else {
                    i += 1;
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ranking::Signals;
    use chrono::Utc;
    use feed_core::models::Post;

    fn candidate(uri: &str, author: &str, score: f64) -> ScoredCandidate {
        ScoredCandidate {
            post: Post {
                uri: uri.to_string(),
                cid: "bafy".into(),
                indexed_at: Utc::now(),
                author: author.to_string(),
                like_count: 0,
                reply_count: 0,
                repost_count: 0,
                reply_root: None,
                reply_parent: None,
                text: None,
                has_image: false,
                has_video: false,
                has_external: false,
            },
            score,
            signals: Signals::default(),
            repost_uri: None,
            repost_from_l1: false,
        }
    }

    fn authors(items: &[ScoredCandidate]) -> Vec<&str> {
        items.iter().map(|c| c.post.author.as_str()).collect()
    }

    fn assert_no_triples(items: &[ScoredCandidate]) {
        for window in items.windows(3) {
            let a = &window[0].post.author;
            assert!(
                !(a == &window[1].post.author && a == &window[2].post.author),
                "three consecutive posts by {a}"
            );
        }
    }

    #[test]
    fn interleaves_dominant_author() {
        let items = vec![
            candidate("at://1", "did:plc:a", 100.0),
            candidate("at://2", "did:plc:a", 90.0),
            candidate("at://3", "did:plc:a", 80.0),
            candidate("at://4", "did:plc:b", 70.0),
            candidate("at://5", "did:plc:c", 60.0),
            candidate("at://6", "did:plc:b", 50.0),
        ];
        let out = diversify(items);
        assert_no_triples(&out);
        assert_eq!(out[0].post.author, "did:plc:a");
        assert_ne!(authors(&out)[1], "did:plc:a");
    }

    #[test]
    fn falls_back_when_diversity_would_cut_more_than_half() {
        // Six posts by one author and one by another: strict interleaving
        // keeps three of seven, so the fallback ordering is used instead.
        let items = vec![
            candidate("at://1", "did:plc:a", 100.0),
            candidate("at://2", "did:plc:a", 90.0),
            candidate("at://3", "did:plc:a", 80.0),
            candidate("at://4", "did:plc:a", 70.0),
            candidate("at://5", "did:plc:a", 60.0),
            candidate("at://6", "did:plc:a", 55.0),
            candidate("at://7", "did:plc:b", 50.0),
        ];
        let out = diversify(items);
        assert!(out.len() >= 4, "fallback should preserve most of the pool");
        assert_no_triples(&out);
    }

    #[test]
    fn distinct_authors_pass_through_in_score_order() {
        let items = vec![
            candidate("at://1", "did:plc:a", 100.0),
            candidate("at://2", "did:plc:b", 90.0),
            candidate("at://3", "did:plc:c", 80.0),
            candidate("at://4", "did:plc:d", 70.0),
        ];
        let out = diversify(items.clone());
        assert_eq!(authors(&out), authors(&items));
    }

    #[test]
    fn no_triple_pass_defers_and_recovers() {
        let items = vec![
            candidate("at://1", "did:plc:a", 100.0),
            candidate("at://2", "did:plc:a", 90.0),
            candidate("at://3", "did:plc:a", 80.0),
            candidate("at://4", "did:plc:b", 70.0),
        ];
        let out = no_triple_pass(items, |c: &ScoredCandidate| c.post.author.as_str());
        assert_eq!(out.len(), 4);
        assert_no_triples(&out);
    }
}
