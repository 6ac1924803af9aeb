use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, Encoder,
    HistogramVec, IntCounter, IntCounterVec, TextEncoder,
};

// Game Metrics
lazy_static! {
    pub static ref USERS_CREATED: IntCounter =
        register_int_counter!("users_created_total", "Total number of users created").unwrap();
    pub static ref TAPS_RECORDED: IntCounter =
        register_int_counter!("clicker_taps_total", "Total number of clicker taps").unwrap();
    pub static ref BETS_PLACED: IntCounterVec = register_int_counter_vec!(
        "bets_placed_total",
        "Total number of bets placed",
        &["direction"]
    )
    .unwrap();
    pub static ref BETS_SETTLED: IntCounterVec = register_int_counter_vec!(
        "bets_settled_total",
        "Total number of bets settled",
        &["result"]
    )
    .unwrap();
    pub static ref TASKS_COMPLETED: IntCounterVec = register_int_counter_vec!(
        "tasks_completed_total",
        "Total number of task completions",
        &["task_type"]
    )
    .unwrap();
    pub static ref PRICE_FALLBACKS: IntCounterVec = register_int_counter_vec!(
        "price_fallbacks_total",
        "Price requests served from mock data",
        &["kind"]
    )
    .unwrap();
}

// API Performance Metrics
lazy_static! {
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["endpoint", "method", "status"]
    )
    .unwrap();
    pub static ref HTTP_REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["endpoint", "method"],
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
    )
    .unwrap();
}

pub fn record_http_request(endpoint: &str, method: &str, status: &str, duration: f64) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[endpoint, method, status])
        .inc();
    HTTP_REQUEST_DURATION
        .with_label_values(&[endpoint, method])
        .observe(duration);
}

pub fn record_user_created() {
    USERS_CREATED.inc();
}

pub fn record_taps(taps: u32) {
    TAPS_RECORDED.inc_by(u64::from(taps));
}

pub fn record_bet_placed(direction: &str) {
    BETS_PLACED.with_label_values(&[direction]).inc();
}

pub fn record_bet_settled(result: &str) {
    BETS_SETTLED.with_label_values(&[result]).inc();
}

pub fn record_task_completed(task_type: &str) {
    TASKS_COMPLETED.with_label_values(&[task_type]).inc();
}

pub fn record_price_fallback(kind: &str) {
    PRICE_FALLBACKS.with_label_values(&[kind]).inc();
}

/// Text exposition of every registered metric.
pub fn gather() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
    }
    String::from_utf8(buffer).unwrap_or_default()
}
