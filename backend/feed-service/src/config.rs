//! Feed-service configuration.

use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct Config {
    pub app: AppConfig,
    pub feed: FeedConfig,
    pub external: ExternalConfig,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// DID that published the feed record.
    pub publisher_did: String,
    /// DID this service answers for (did:web of the hostname).
    pub service_did: String,
    /// Record key of the published feed.
    pub feed_rkey: String,
    /// Users the generator serves.
    pub whitelist: HashSet<String>,
    /// Keywords excluded from explicit-feedback adjustment.
    pub restricted_keywords: HashSet<String>,
}

#[derive(Debug, Clone)]
pub struct ExternalConfig {
    pub appview_url: String,
    pub identity_resolver_url: Option<String>,
    pub vector_index_url: String,
    pub embedder_bin: String,
    pub embedder_model_path: String,
    pub clusterer_bin: String,
    pub keyword_extractor_bin: String,
}

impl FeedConfig {
    /// Canonical at:// URI of the published feed.
    pub fn feed_uri(&self) -> String {
        format!(
            "at://{}/app.bsky.feed.generator/{}",
            self.publisher_did, self.feed_rkey
        )
    }
}

fn env_set(name: &str) -> HashSet<String> {
    std::env::var(name)
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl Config {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Config {
            app: AppConfig {
                host: std::env::var("FEEDGEN_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: std::env::var("FEEDGEN_PORT")
                    .unwrap_or_else(|_| "3000".to_string())
                    .parse()?,
            },
            feed: FeedConfig {
                publisher_did: std::env::var("FEEDGEN_PUBLISHER_DID")
                    .unwrap_or_else(|_| "did:plc:publisher".to_string()),
                service_did: std::env::var("FEEDGEN_SERVICE_DID")
                    .unwrap_or_else(|_| "did:web:feedgen.example.com".to_string()),
                feed_rkey: std::env::var("FEEDGEN_FEED_RKEY")
                    .unwrap_or_else(|_| "for-you".to_string()),
                whitelist: env_set("FEEDGEN_WHITELIST"),
                restricted_keywords: env_set("RESTRICTED_KEYWORDS"),
            },
            external: ExternalConfig {
                appview_url: std::env::var("APPVIEW_URL")
                    .unwrap_or_else(|_| "https://api.bsky.app".to_string()),
                identity_resolver_url: std::env::var("IDENTITY_RESOLVER_URL").ok(),
                vector_index_url: std::env::var("VECTOR_INDEX_URL")
                    .unwrap_or_else(|_| "http://localhost:6333".to_string()),
                embedder_bin: std::env::var("EMBEDDER_BIN")
                    .unwrap_or_else(|_| "embed".to_string()),
                embedder_model_path: std::env::var("EMBEDDER_MODEL_PATH")
                    .unwrap_or_else(|_| "./models/encoder".to_string()),
                clusterer_bin: std::env::var("CLUSTERER_BIN")
                    .unwrap_or_else(|_| "cluster".to_string()),
                keyword_extractor_bin: std::env::var("KEYWORD_EXTRACTOR_BIN")
                    .unwrap_or_else(|_| "extract".to_string()),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_uri_is_generator_record() {
        let feed = FeedConfig {
            publisher_did: "did:plc:pub".into(),
            service_did: "did:web:x".into(),
            feed_rkey: "for-you".into(),
            whitelist: HashSet::new(),
            restricted_keywords: HashSet::new(),
        };
        assert_eq!(
            feed.feed_uri(),
            "at://did:plc:pub/app.bsky.feed.generator/for-you"
        );
    }
}
