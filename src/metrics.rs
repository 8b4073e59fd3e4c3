use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramVec, IntCounter, IntCounterVec, TextEncoder, register_histogram_vec,
    register_int_counter, register_int_counter_vec,
};

use crate::error::Service;

// --- Outbound Calls ---

pub static OUTBOUND_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "payments_outbound_requests_total",
        "Outbound requests by service and outcome",
        &["service", "outcome"]
    )
    .expect("outbound_requests counter")
});

pub static OUTBOUND_LATENCY: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "payments_outbound_latency_seconds",
        "Outbound request latency, including timed-out calls",
        &["service"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .expect("outbound_latency histogram")
});

pub static OUTBOUND_TIMEOUTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "payments_outbound_timeouts_total",
        "Outbound requests cancelled by the fixed deadline",
        &["service"]
    )
    .expect("outbound_timeouts counter")
});

// --- Session ---

pub static TOKEN_REQUESTS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "payments_token_requests_total",
        "Calls made to the gateway token endpoint"
    )
    .expect("token_requests counter")
});

// --- Purchases ---

pub static PURCHASE_OUTCOMES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "payments_purchase_outcomes_total",
        "Dual-write purchase attempts by terminal state",
        &["outcome"]
    )
    .expect("purchase_outcomes counter")
});

pub fn inc_request(service: Service, outcome: &str) {
    OUTBOUND_REQUESTS
        .with_label_values(&[service.as_str(), outcome])
        .inc();
}

pub fn inc_timeout(service: Service) {
    OUTBOUND_TIMEOUTS
        .with_label_values(&[service.as_str()])
        .inc();
}

pub fn observe_request_latency(service: Service, duration_sec: f64) {
    OUTBOUND_LATENCY
        .with_label_values(&[service.as_str()])
        .observe(duration_sec);
}

pub fn inc_token_requests() {
    TOKEN_REQUESTS.inc();
}

pub fn inc_purchase_outcome(outcome: &str) {
    PURCHASE_OUTCOMES.with_label_values(&[outcome]).inc();
}

/// Text exposition of the default registry.
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&prometheus::gather(), &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
