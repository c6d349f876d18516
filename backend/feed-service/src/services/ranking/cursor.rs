//! Step H: total ordering and opaque cursors.
//!
//! The sort key `(−score, −indexedAtMs, uri)` is total, so pagination is
//! stable on a fixed snapshot. Cursors serialize that triple as
//! `score::timestampMs::uri` and apply as "strictly after".

use std::cmp::Ordering;

use super::ScoredCandidate;

#[derive(Debug, Clone, PartialEq)]
pub struct Cursor {
    pub score: f64,
    pub indexed_at_ms: i64,
    pub uri: String,
}

impl Cursor {
    pub fn encode(&self) -> String {
        format!("{}::{}::{}", self.score, self.indexed_at_ms, self.uri)
    }

    pub fn decode(raw: &str) -> Option<Self> {
        let mut parts = raw.splitn(3, "::");
        let score = parts.next()?.parse::<f64>().ok()?;
        let indexed_at_ms = parts.next()?.parse::<i64>().ok()?;
        let uri = parts.next()?.to_string();
        if uri.is_empty() || !score.is_finite() {
            return None;
        }
        Some(Self {
            score,
            indexed_at_ms,
            uri,
        })
    }

    /// Does (score, ts, uri) sort strictly after this cursor in the page
    /// ordering (higher score first, newer first, then uri ascending)?
    pub fn is_strictly_after(&self, score: f64, indexed_at_ms: i64, uri: &str) -> bool {
        match compare_key(score, indexed_at_ms, uri, self.score, self.indexed_at_ms, &self.uri) {
            Ordering::Greater => true,
            _ => false,
        }
    }
}

/// Page ordering: a "greater" item appears later in the page.
fn compare_key(
    score_a: f64,
    ts_a: i64,
    uri_a: &str,
    score_b: f64,
    ts_b: i64,
    uri_b: &str,
) -> Ordering {
    score_b
        .partial_cmp(&score_a)
        .unwrap_or(Ordering::Equal)
        .then(ts_b.cmp(&ts_a))
        .then(uri_a.cmp(uri_b))
}

/// Sort candidates into page order.
pub fn sort_by_key(items: &mut [ScoredCandidate]) {
    items.sort_by(|a, b| {
        compare_key(
            a.score,
            a.indexed_at_ms(),
            &a.post.uri,
            b.score,
            b.indexed_at_ms(),
            &b.post.uri,
        )
    });
}

/// Cursor for the next page: the key-wise last item of this page.
pub fn page_cursor(items: &[ScoredCandidate]) -> Option<String> {
    items
        .iter()
        .max_by(|a, b| {
            compare_key(
                a.score,
                a.indexed_at_ms(),
                &a.post.uri,
                b.score,
                b.indexed_at_ms(),
                &b.post.uri,
            )
        })
        .map(|last| {
            Cursor {
                score: last.score,
                indexed_at_ms: last.indexed_at_ms(),
                uri: last.post.uri.clone(),
            }
            .encode()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ranking::Signals;
    use chrono::{TimeZone, Utc};
    use feed_core::models::Post;

    fn candidate(uri: &str, score: f64, ts_ms: i64) -> ScoredCandidate {
        ScoredCandidate {
            post: Post {
                uri: uri.to_string(),
                cid: "bafy".into(),
                indexed_at: Utc.timestamp_millis_opt(ts_ms).unwrap(),
                author: "did:plc:a".into(),
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

    #[test]
    fn cursor_round_trips() {
        let cursor = Cursor {
            score: 1234.5,
            indexed_at_ms: 1_700_000_000_000,
            uri: "at://did:plc:a/app.bsky.feed.post/1".into(),
        };
        let decoded = Cursor::decode(&cursor.encode()).unwrap();
        assert_eq!(decoded, cursor);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(Cursor::decode("").is_none());
        assert!(Cursor::decode("abc::def::ghi").is_none());
        assert!(Cursor::decode("1.0::notanumber::uri").is_none());
        assert!(Cursor::decode("1.0::123::").is_none());
    }

    #[test]
    fn sort_orders_score_then_recency_then_uri() {
        let mut items = vec![
            candidate("at://c", 10.0, 100),
            candidate("at://b", 20.0, 100),
            candidate("at://a", 10.0, 200),
            candidate("at://aa", 10.0, 100),
        ];
        sort_by_key(&mut items);
        let uris: Vec<&str> = items.iter().map(|c| c.post.uri.as_str()).collect();
        assert_eq!(uris, vec!["at://b", "at://a", "at://aa", "at://c"]);
    }

    #[test]
    fn pagination_is_disjoint_and_complete() {
        let mut items: Vec<ScoredCandidate> = (0..10)
            .map(|i| candidate(&format!("at://p/{i}"), (100 - i) as f64, 1000))
            .collect();
        sort_by_key(&mut items);

        let page1: Vec<_> = items.iter().take(4).cloned().collect();
        let cursor = Cursor::decode(&page_cursor(&page1).unwrap()).unwrap();

        let page2: Vec<_> = items
            .iter()
            .filter(|c| cursor.is_strictly_after(c.score, c.indexed_at_ms(), &c.post.uri))
            .take(4)
            .cloned()
            .collect();

        let uris1: Vec<&str> = page1.iter().map(|c| c.post.uri.as_str()).collect();
        let uris2: Vec<&str> = page2.iter().map(|c| c.post.uri.as_str()).collect();
        assert!(uris1.iter().all(|u| !uris2.contains(u)));

        let combined: Vec<&str> = items.iter().take(8).map(|c| c.post.uri.as_str()).collect();
        let mut concat = uris1.clone();
        concat.extend(&uris2);
        assert_eq!(concat, combined);
    }
}
