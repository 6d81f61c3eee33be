use lazy_static::lazy_static;
use prometheus::{Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder};
use std::time::Duration;

/// Metric name prefix for all scheduler metrics
const PREFIX: &str = "snapshot_scheduler";

lazy_static! {
    // Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Promoter metrics
    pub static ref SWEEPS_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_sweeps_total"),
        "Total promoter sweeps run"
    ).expect("Failed to create sweeps_total metric");

    pub static ref SWEEP_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            format!("{PREFIX}_sweep_duration_seconds"),
            "Promoter sweep duration in seconds"
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0])
    ).expect("Failed to create sweep_duration_seconds metric");

    pub static ref PROMOTIONS_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_promotions_total"),
        "Snapshots promoted to SCHEDULED by sweeps"
    ).expect("Failed to create promotions_total metric");

    pub static ref FORCED_PROMOTIONS_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_forced_promotions_total"),
        "Snapshots promoted through the forced re-promotion hook"
    ).expect("Failed to create forced_promotions_total metric");

    pub static ref SCHEDULED_BACKLOG: Gauge = Gauge::new(
        format!("{PREFIX}_scheduled_backlog"),
        "Snapshots currently waiting in SCHEDULED"
    ).expect("Failed to create scheduled_backlog metric");

    // Lease assigner metrics
    pub static ref ASSIGNMENTS_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_assignments_total"),
        "Leases handed out to workers"
    ).expect("Failed to create assignments_total metric");

    pub static ref ASSIGNMENT_MISSES_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_assignment_misses_total"),
        "Assignment calls that found no eligible snapshot"
    ).expect("Failed to create assignment_misses_total metric");

    // Worker protocol metrics
    pub static ref STATUS_REPORTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_status_reports_total"), "Terminal status reports by outcome"),
        &["status"]
    ).expect("Failed to create status_reports_total metric");

    pub static ref PROGRESS_REPORTS_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_progress_reports_total"),
        "Heartbeat/offset progress reports applied"
    ).expect("Failed to create progress_reports_total metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Register all metrics - ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(SWEEPS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(SWEEP_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(PROMOTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(FORCED_PROMOTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(SCHEDULED_BACKLOG.clone()));
    let _ = REGISTRY.register(Box::new(ASSIGNMENTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(ASSIGNMENT_MISSES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(STATUS_REPORTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(PROGRESS_REPORTS_TOTAL.clone()));

    tracing::info!("Metrics system initialized");
}

pub fn record_sweep(duration: Duration, promoted: usize) {
    SWEEPS_TOTAL.inc();
    SWEEP_DURATION_SECONDS.observe(duration.as_secs_f64());
    PROMOTIONS_TOTAL.inc_by(promoted as f64);
}

pub fn record_forced_promotions(promoted: usize) {
    FORCED_PROMOTIONS_TOTAL.inc_by(promoted as f64);
}

pub fn set_scheduled_backlog(backlog: usize) {
    SCHEDULED_BACKLOG.set(backlog as f64);
}

pub fn record_assignment(assigned: bool) {
    if assigned {
        ASSIGNMENTS_TOTAL.inc();
    } else {
        ASSIGNMENT_MISSES_TOTAL.inc();
    }
}

pub fn record_status_report(status: &str) {
    STATUS_REPORTS_TOTAL.with_label_values(&[status]).inc();
}

pub fn record_progress_report() {
    PROGRESS_REPORTS_TOTAL.inc();
}

/// Render all registered metrics in the Prometheus text exposition format.
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
