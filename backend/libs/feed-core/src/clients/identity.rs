//! Identity resolver client.
//!
//! Confirms that a requester DID resolves. Results are cached in-memory;
//! resolution failure degrades open because authentication itself is the
//! protocol layer's concern.

use dashmap::DashMap;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::error::{CoreError, Result};

const IDENTITY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct IdentityClient {
    http: Client,
    base_url: String,
    cache: Arc<DashMap<String, bool>>,
}

impl IdentityClient {
    pub fn new(base_url: String) -> Result<Self> {
        let http = Client::builder()
            .timeout(IDENTITY_TIMEOUT)
            .build()
            .map_err(|e| CoreError::Config(format!("identity client: {e}")))?;
        Ok(Self {
            http,
            base_url,
            cache: Arc::new(DashMap::new()),
        })
    }

    /// Whether the DID resolves. Transient failures return true with a
    /// warning; a definitive 404 returns false.
    pub async fn did_resolves(&self, did: &str) -> bool {
        if let Some(known) = self.cache.get(did) {
            return *known;
        }
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), did);
        match self.http.get(&url).send().await {
            Ok(resp) if resp.status() == reqwest::StatusCode::NOT_FOUND => {
                self.cache.insert(did.to_string(), false);
                false
            }
            Ok(resp) if resp.status().is_success() => {
                self.cache.insert(did.to_string(), true);
                true
            }
            Ok(resp) => {
                warn!(did, status = %resp.status(), "Identity resolver unexpected status");
                true
            }
            Err(e) => {
                warn!(did, error = %e, "Identity resolver unreachable, degrading open");
                true
            }
        }
    }
}
