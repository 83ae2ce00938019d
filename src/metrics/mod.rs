use crate::storage::breaker::BreakerState;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Observer of limiter activity. Implementations MUST NOT fail: every method
/// is infallible by signature and expected to swallow internal errors;
/// metrics problems never influence admission decisions.
pub trait MetricsSink: Send + Sync {
    fn record_allow(&self, limiter: &str);
    fn record_deny(&self, limiter: &str);
    fn record_error(&self, limiter: &str, error: &str);
    fn record_latency(&self, limiter: &str, millis: f64);
    fn record_fallback(&self, limiter: &str, reason: &str);
    fn record_circuit_breaker_state_change(&self, limiter: &str, state: BreakerState);
    fn record_usage(&self, limiter: &str, current: f64, limit: u64);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn record_allow(&self, _limiter: &str) {}
    fn record_deny(&self, _limiter: &str) {}
    fn record_error(&self, _limiter: &str, _error: &str) {}
    fn record_latency(&self, _limiter: &str, _millis: f64) {}
    fn record_fallback(&self, _limiter: &str, _reason: &str) {}
    fn record_circuit_breaker_state_change(&self, _limiter: &str, _state: BreakerState) {}
    fn record_usage(&self, _limiter: &str, _current: f64, _limit: u64) {}
}

/// Sink backed by the `metrics` crate facade. Emits `limitgate_*` series
/// labelled by limiter name; whatever recorder the host installed (the
/// Prometheus one from [`install`], or its own) receives them.
///
/// High-cardinality inputs (error text, fallback reasons) go to `tracing`
/// rather than into label values.
#[derive(Debug, Default, Clone, Copy)]
pub struct RecorderSink;

impl MetricsSink for RecorderSink {
    fn record_allow(&self, limiter: &str) {
        counter!("limitgate_admitted_total", "limiter" => limiter.to_string()).increment(1);
    }

    fn record_deny(&self, limiter: &str) {
        counter!("limitgate_rejected_total", "limiter" => limiter.to_string()).increment(1);
    }

    fn record_error(&self, limiter: &str, error: &str) {
        tracing::debug!(limiter, error, "limiter error");
        counter!("limitgate_errors_total", "limiter" => limiter.to_string()).increment(1);
    }

    fn record_latency(&self, limiter: &str, millis: f64) {
        histogram!("limitgate_decision_duration_seconds", "limiter" => limiter.to_string())
            .record(millis / 1_000.0);
    }

    fn record_fallback(&self, limiter: &str, reason: &str) {
        tracing::debug!(limiter, reason, "storage fallback");
        counter!("limitgate_fallback_total", "limiter" => limiter.to_string()).increment(1);
    }

    fn record_circuit_breaker_state_change(&self, limiter: &str, state: BreakerState) {
        gauge!("limitgate_circuit_breaker_state", "limiter" => limiter.to_string())
            .set(state as u8 as f64);
    }

    fn record_usage(&self, limiter: &str, current: f64, limit: u64) {
        gauge!("limitgate_usage_current", "limiter" => limiter.to_string()).set(current);
        gauge!("limitgate_usage_limit", "limiter" => limiter.to_string()).set(limit as f64);
    }
}

/// Histogram bucket boundaries for decision latency (seconds).
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
];

/// Install the global Prometheus recorder and register descriptions for all
/// `limitgate_*` series. Call **once** at startup, before the engine issues
/// any decisions; the returned handle renders the scrape endpoint. Hosts
/// with their own recorder skip this and just use [`RecorderSink`].
pub fn install() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Suffix("_duration_seconds".to_string()),
            LATENCY_BUCKETS,
        )
        .expect("valid matcher")
        .install_recorder()
        .expect("failed to install metrics recorder");

    describe_counter!(
        "limitgate_admitted_total",
        Unit::Count,
        "Requests admitted by the limiter"
    );
    describe_counter!(
        "limitgate_rejected_total",
        Unit::Count,
        "Requests rejected by the limiter"
    );
    describe_counter!(
        "limitgate_errors_total",
        Unit::Count,
        "Internal limiter errors (key resolution, storage)"
    );
    describe_counter!(
        "limitgate_fallback_total",
        Unit::Count,
        "Decisions taken via the fail strategy or the secondary store"
    );
    describe_histogram!(
        "limitgate_decision_duration_seconds",
        Unit::Seconds,
        "Storage round-trip per admission decision"
    );
    describe_gauge!(
        "limitgate_circuit_breaker_state",
        Unit::Count,
        "Breaker state: 0=closed 1=open 2=half-open"
    );
    describe_gauge!(
        "limitgate_usage_current",
        Unit::Count,
        "Current usage observed for a limiter"
    );
    describe_gauge!(
        "limitgate_usage_limit",
        Unit::Count,
        "Declared limit for a limiter"
    );

    handle
}
