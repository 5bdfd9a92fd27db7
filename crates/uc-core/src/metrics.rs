use axum::extract::{MatchedPath, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

pub const MATCH_RESULT_MATCHED: &str = "matched";
pub const MATCH_RESULT_EMPTY: &str = "empty";
pub const CACHE_RESULT_HIT: &str = "hit";
pub const CACHE_RESULT_MISS: &str = "miss";

const HTTP_LABELS: &[&str] = &["service", "route", "method", "status"];
const LATENCY_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0];

struct Metrics {
    registry: Registry,
    uc_up: IntGaugeVec,
    http_requests_total: IntCounterVec,
    http_request_duration_seconds: HistogramVec,
    content_match_total: IntCounterVec,
    content_cache_total: IntCounterVec,
    auth_failure_total: IntCounterVec,
    rate_limited_total: IntCounterVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

fn counter(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
    let counter = IntCounterVec::new(Opts::new(name, help), labels)
        .unwrap_or_else(|err| panic!("metric {name}: {err}"));
    registry
        .register(Box::new(counter.clone()))
        .unwrap_or_else(|err| panic!("register {name}: {err}"));
    counter
}

fn metrics() -> &'static Metrics {
    METRICS.get_or_init(|| {
        let registry = Registry::new();

        let uc_up = IntGaugeVec::new(Opts::new("uc_up", "Service health"), &["service"])
            .unwrap_or_else(|err| panic!("metric uc_up: {err}"));
        registry
            .register(Box::new(uc_up.clone()))
            .unwrap_or_else(|err| panic!("register uc_up: {err}"));

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "HTTP request duration in seconds",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            HTTP_LABELS,
        )
        .unwrap_or_else(|err| panic!("metric http_request_duration_seconds: {err}"));
        registry
            .register(Box::new(http_request_duration_seconds.clone()))
            .unwrap_or_else(|err| panic!("register http_request_duration_seconds: {err}"));

        Metrics {
            uc_up,
            http_requests_total: counter(
                &registry,
                "http_requests_total",
                "HTTP request count",
                HTTP_LABELS,
            ),
            http_request_duration_seconds,
            content_match_total: counter(
                &registry,
                "content_match_total",
                "Content lookups by outcome (matched or empty)",
                &["service", "result"],
            ),
            content_cache_total: counter(
                &registry,
                "content_cache_total",
                "Content cache lookups by result",
                &["service", "result"],
            ),
            auth_failure_total: counter(
                &registry,
                "auth_failure_total",
                "Rejected bearer tokens",
                &["service"],
            ),
            rate_limited_total: counter(
                &registry,
                "rate_limited_total",
                "Requests rejected by the rate limiter",
                &["service"],
            ),
            registry,
        }
    })
}

pub fn init(service_name: &'static str) {
    metrics().uc_up.with_label_values(&[service_name]).set(1);
}

pub fn record_http_request(
    service_name: &'static str,
    method: &str,
    route: &str,
    status: u16,
    duration: Duration,
) {
    let status_str = status.to_string();
    let labels = &[service_name, route, method, status_str.as_str()];
    let metrics = metrics();
    metrics.http_requests_total.with_label_values(labels).inc();
    metrics
        .http_request_duration_seconds
        .with_label_values(labels)
        .observe(duration.as_secs_f64());
}

pub fn inc_content_match(service_name: &'static str, result: &'static str) {
    metrics()
        .content_match_total
        .with_label_values(&[service_name, result])
        .inc();
}

pub fn inc_content_cache(service_name: &'static str, result: &'static str) {
    metrics()
        .content_cache_total
        .with_label_values(&[service_name, result])
        .inc();
}

pub fn inc_auth_failure(service_name: &'static str) {
    metrics()
        .auth_failure_total
        .with_label_values(&[service_name])
        .inc();
}

pub fn inc_rate_limited(service_name: &'static str) {
    metrics()
        .rate_limited_total
        .with_label_values(&[service_name])
        .inc();
}

pub fn metrics_response(service_name: &'static str) -> Response {
    init(service_name);
    let mut buffer = Vec::new();
    if let Err(err) = TextEncoder::new().encode(&metrics().registry.gather(), &mut buffer) {
        tracing::error!(error = %err, "metrics encoding failed");
        return (StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics").into_response();
    }

    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        buffer,
    )
        .into_response()
}

/// Middleware recording request count and latency. Requests are labelled
/// with the route template (`/v1/sources/:source_id`), never the raw path.
pub async fn track_requests(
    State(service_name): State<&'static str>,
    matched_path: Option<MatchedPath>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let route = matched_path
        .as_ref()
        .map(MatchedPath::as_str)
        .unwrap_or("unmatched")
        .to_string();
    let started = Instant::now();

    let response = next.run(request).await;
    record_http_request(
        service_name,
        method.as_str(),
        &route,
        response.status().as_u16(),
        started.elapsed(),
    );
    response
}
