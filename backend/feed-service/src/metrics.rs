//! Prometheus metrics for the feed service.

use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter_vec, register_int_gauge,
    Histogram, HistogramVec, IntCounterVec, IntGauge,
};
use std::time::Duration;

static HTTP_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "feedgen_http_requests_total",
        "HTTP requests by handler and status",
        &["handler", "status"]
    )
    .expect("Failed to register http requests metric")
});

static RANK_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "feedgen_rank_duration_seconds",
        "Ranking pipeline duration",
        &["mode"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .expect("Failed to register rank duration metric")
});

static RECALL_CANDIDATES: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "feedgen_recall_candidates",
        "Candidates per recall bucket",
        &["bucket"],
        vec![0.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 2000.0, 4000.0]
    )
    .expect("Failed to register recall candidates metric")
});

static SERVED_POSTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "feedgen_served_posts_total",
        "Posts placed in feed responses",
        &["source"]
    )
    .expect("Failed to register served posts metric")
});

static SEMANTIC_RUNS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "feedgen_semantic_batch_runs_total",
        "Semantic batch pipeline runs",
        &["status"]
    )
    .expect("Failed to register semantic runs metric")
});

static SEMANTIC_DURATION: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "feedgen_semantic_batch_duration_seconds",
        "Semantic batch pipeline duration per user",
        vec![0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0]
    )
    .expect("Failed to register semantic duration metric")
});

static BATCH_CANDIDATES: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "feedgen_batch_candidates_last",
        "Candidate rows written by the last semantic batch"
    )
    .expect("Failed to register batch candidates metric")
});

pub fn observe_http_request(handler: &str, status: u16) {
    HTTP_REQUESTS
        .with_label_values(&[handler, &status.to_string()])
        .inc();
}

pub fn observe_rank_duration(mode: &str, duration: Duration) {
    RANK_DURATION
        .with_label_values(&[mode])
        .observe(duration.as_secs_f64());
}

pub fn observe_recall_bucket(bucket: &str, count: usize) {
    RECALL_CANDIDATES
        .with_label_values(&[bucket])
        .observe(count as f64);
}

pub fn record_served(source: &str, count: u64) {
    SERVED_POSTS.with_label_values(&[source]).inc_by(count);
}

pub fn record_semantic_run(status: &str) {
    SEMANTIC_RUNS.with_label_values(&[status]).inc();
}

pub fn observe_semantic_duration(duration: Duration) {
    SEMANTIC_DURATION.observe(duration.as_secs_f64());
}

pub fn set_batch_candidates(count: i64) {
    BATCH_CANDIDATES.set(count);
}

/// `/metrics` endpoint body.
pub async fn serve_metrics() -> HttpResponse {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let families = prometheus::gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() {
        return HttpResponse::InternalServerError().finish();
    }
    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buf)
}
