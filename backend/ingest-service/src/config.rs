//! Ingest-service configuration.

use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Upstream firehose websocket endpoint.
    pub jetstream_endpoint: String,
    /// Delay before re-establishing a dropped subscription.
    pub reconnect_delay_secs: u64,
    /// Seconds between batched flushes.
    pub flush_interval_secs: u64,
    /// Seconds between tracked-set refreshes.
    pub tracked_refresh_secs: u64,
    /// Cursor namespace; lets several upstreams coexist in one store.
    pub service_name: String,
    /// Whitelisted users the system serves feeds for.
    pub whitelist: HashSet<String>,
    /// Taste-twins at or above this reputation join the tracked
    /// interaction set.
    pub twin_tracking_min_reputation: f64,
}

impl IngestConfig {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let whitelist: HashSet<String> = std::env::var("FEEDGEN_WHITELIST")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self {
            jetstream_endpoint: std::env::var("FEEDGEN_JETSTREAM_ENDPOINT")
                .unwrap_or_else(|_| "wss://jetstream.example.com/subscribe".to_string()),
            reconnect_delay_secs: std::env::var("FEEDGEN_RECONNECT_DELAY_SECS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()?,
            flush_interval_secs: std::env::var("INGEST_FLUSH_INTERVAL_SECS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()?,
            tracked_refresh_secs: std::env::var("INGEST_TRACKED_REFRESH_SECS")
                .unwrap_or_else(|_| "900".to_string())
                .parse()?,
            service_name: std::env::var("INGEST_SERVICE_NAME")
                .unwrap_or_else(|_| "jetstream".to_string()),
            whitelist,
            twin_tracking_min_reputation: std::env::var("TWIN_TRACKING_MIN_REPUTATION")
                .unwrap_or_else(|_| "2.0".to_string())
                .parse()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitelist_parses_comma_separated_dids() {
        std::env::set_var("FEEDGEN_WHITELIST", "did:plc:a, did:plc:b,,did:plc:c");
        let cfg = IngestConfig::from_env().unwrap();
        assert_eq!(cfg.whitelist.len(), 3);
        assert!(cfg.whitelist.contains("did:plc:b"));
        std::env::remove_var("FEEDGEN_WHITELIST");
    }
}
