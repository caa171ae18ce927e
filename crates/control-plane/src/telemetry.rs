use axum::{http::StatusCode, response::IntoResponse};
use once_cell::sync::Lazy;
use prometheus::{opts, Encoder, IntCounterVec, Registry, TextEncoder};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub static HTTP_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(opts!("http_requests_total", "HTTP request count"), &["method", "path", "status"]).unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static PIPELINE_RUNS: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(opts!("pipeline_runs_total", "Pipeline runs by kind and outcome"), &["kind", "outcome"]).unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&metric_families, &mut buf).is_err() {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    ([("Content-Type", "text/plain; version=0.0.4")], buf).into_response()
}

/// Collapse per-job and per-app path segments so metric labels stay
/// low-cardinality.
pub fn normalize_path(path: &str) -> String {
    let mut out = Vec::new();
    for segment in path.split('/') {
        if segment.is_empty() {
            continue;
        }
        let id_like = segment.len() >= 8
            && segment.chars().all(|c| c.is_ascii_hexdigit() || c == '-')
            && segment.chars().any(|c| c.is_ascii_digit());
        out.push(if id_like { ":id".to_owned() } else { segment.to_owned() });
    }
    format!("/{}", out.join("/"))
}
