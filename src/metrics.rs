//! Prometheus metrics

use axum::{body::Body, http::Request, response::Response};
use lazy_static::lazy_static;
use prometheus::{self, Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use tracing::Span;

lazy_static! {
    // Registry for holding metric state
    pub static ref REGISTRY: Registry = Registry::new();
    // Simple request counter
    pub static ref INCOMING_REQUESTS: IntCounterVec = IntCounterVec::new(
        Opts::new("incoming_requests", "The number of HTTP requests received"),
        &["http_method", "path"]
    ).expect("valid metric");
    // Request counter by status code
    pub static ref RESPONSE_CODE_COLLECTOR: IntCounterVec = IntCounterVec::new(
        Opts::new("outgoing_response", "The number of responses sent."),
        &["status_code"]
    ).expect("valid metric");
    // Request histogram by response time
    pub static ref RESPONSE_TIME_COLLECTOR: HistogramVec = HistogramVec::new(
        HistogramOpts{
            common_opts: Opts::new("response_time", "The time taken to respond to each request"),
            buckets: prometheus::DEFAULT_BUCKETS.to_vec(),
        },
        &[],
    ).expect("valid metric");
    // Cache lookups by cache and outcome (hit, miss, expired)
    pub static ref CACHE_LOOKUPS: IntCounterVec = IntCounterVec::new(
        Opts::new("cache_lookups", "The number of request cache lookups"),
        &["cache", "outcome"]
    ).expect("valid metric");
    // Cache evictions by cache and reason (expired, capacity)
    pub static ref CACHE_EVICTIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("cache_evictions", "The number of request cache entries evicted"),
        &["cache", "reason"]
    ).expect("valid metric");
    // Producer failures by producer and reason
    pub static ref PRODUCER_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new("producer_failures", "The number of failed sample producer calls"),
        &["producer", "reason"]
    ).expect("valid metric");
    // Malformed samples excluded from aggregation, by operation
    pub static ref EXCLUDED_SAMPLES: IntCounterVec = IntCounterVec::new(
        Opts::new("excluded_samples", "The number of malformed samples excluded from aggregation"),
        &["operation"]
    ).expect("valid metric");
}

/// Register all metrics with the registry.
///
/// Must be called once at startup. Metrics recorded before registration are still counted.
pub fn register_metrics() {
    let collectors: [Box<dyn prometheus::core::Collector>; 7] = [
        Box::new(INCOMING_REQUESTS.clone()),
        Box::new(RESPONSE_CODE_COLLECTOR.clone()),
        Box::new(RESPONSE_TIME_COLLECTOR.clone()),
        Box::new(CACHE_LOOKUPS.clone()),
        Box::new(CACHE_EVICTIONS.clone()),
        Box::new(PRODUCER_FAILURES.clone()),
        Box::new(EXCLUDED_SAMPLES.clone()),
    ];
    for collector in collectors {
        if let Err(err) = REGISTRY.register(collector) {
            tracing::warn!("failed to register metric: {}", err);
        }
    }
}

/// Render all registered metrics in the Prometheus text format.
pub async fn metrics_handler() -> String {
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();

    if let Err(err) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::error!("failed to encode metrics: {}", err);
    }

    String::from_utf8_lossy(&buffer).into_owned()
}

/// Increments the prometheus counter on all incoming requests, labelled by http method and path
pub fn request_counter(request: &Request<Body>, _span: &Span) {
    let method = request.method().as_str().to_ascii_uppercase();
    INCOMING_REQUESTS
        .with_label_values(&[method.as_str(), request.uri().path()])
        .inc();
}

/// Increment the prometheus counter on all outgoing responses, labelled by status code
pub fn record_response_metrics<B>(
    response: &Response<B>,
    latency: std::time::Duration,
    _span: &Span,
) {
    RESPONSE_CODE_COLLECTOR
        .with_label_values(&[response.status().as_str()])
        .inc();

    RESPONSE_TIME_COLLECTOR
        .with_label_values(&[])
        .observe(latency.as_secs_f64());
}
