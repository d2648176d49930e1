//! Prometheus metrics for the order desk.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()`. A registration failure means a
//! duplicate metric name, which is a programming error and should crash at
//! first use rather than silently drop observations.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_counter, register_int_gauge,
    CounterVec, Encoder, HistogramVec, IntCounter, IntGauge, TextEncoder,
};

use crate::error::{TelemetryError, TelemetryResult};

/// Ledger operations by kind and outcome.
/// Labels: kind (create/approve/reject/cancel/deposit), outcome (ok/reconciled/failed)
pub static OPERATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "rwa_operations_total",
        "Total ledger operations by kind and outcome",
        &["kind", "outcome"]
    )
    .unwrap()
});

/// Reconciliation probes after ambiguous submission errors.
/// Labels: outcome (found/absent/probe_error)
pub static RECONCILE_PROBES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "rwa_reconcile_probes_total",
        "Total reconciliation probes by outcome",
        &["outcome"]
    )
    .unwrap()
});

/// Operations refused because one of the same kind was already in flight.
pub static SINGLE_FLIGHT_REJECTIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "rwa_single_flight_rejections_total",
        "Total operations rejected by the single-flight guard",
        &["kind"]
    )
    .unwrap()
});

/// Post-settlement side effects that failed (non-fatal).
pub static SIDE_EFFECT_FAILURES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "rwa_side_effect_failures_total",
        "Total failed post-settlement side effects"
    )
    .unwrap()
});

/// Order store refreshes by outcome (ok/failed/stale).
pub static ORDER_STORE_REFRESH_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "rwa_order_store_refresh_total",
        "Total order store refreshes by outcome",
        &["outcome"]
    )
    .unwrap()
});

/// Orders in the current store snapshot.
pub static ORDER_STORE_ORDERS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "rwa_order_store_orders",
        "Number of orders in the current snapshot"
    )
    .unwrap()
});

/// End-to-end operation latency in milliseconds.
pub static OPERATION_LATENCY_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "rwa_operation_latency_ms",
        "End-to-end operation latency in milliseconds",
        &["kind"],
        vec![10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2000.0, 5000.0, 10000.0, 30000.0]
    )
    .unwrap()
});

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    /// Record a finished operation.
    pub fn operation(kind: &str, outcome: &str) {
        OPERATIONS_TOTAL.with_label_values(&[kind, outcome]).inc();
    }

    /// Record operation latency.
    pub fn operation_latency(kind: &str, latency_ms: f64) {
        OPERATION_LATENCY_MS
            .with_label_values(&[kind])
            .observe(latency_ms);
    }

    pub fn reconcile_probe(outcome: &str) {
        RECONCILE_PROBES_TOTAL.with_label_values(&[outcome]).inc();
    }

    pub fn single_flight_rejected(kind: &str) {
        SINGLE_FLIGHT_REJECTIONS_TOTAL
            .with_label_values(&[kind])
            .inc();
    }

    pub fn side_effect_failed() {
        SIDE_EFFECT_FAILURES_TOTAL.inc();
    }

    /// Record an order store refresh and, on success, the snapshot size.
    pub fn order_store_refresh(outcome: &str, orders: Option<usize>) {
        ORDER_STORE_REFRESH_TOTAL
            .with_label_values(&[outcome])
            .inc();
        if let Some(n) = orders {
            ORDER_STORE_ORDERS.set(n as i64);
        }
    }

    /// Render all registered metrics in the text exposition format.
    pub fn gather_text() -> TelemetryResult<String> {
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        encoder
            .encode(&prometheus::gather(), &mut buf)
            .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
        String::from_utf8(buf).map_err(|e| TelemetryError::Metrics(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_text_includes_recorded_metrics() {
        Metrics::operation("create", "ok");
        Metrics::reconcile_probe("found");
        Metrics::side_effect_failed();
        Metrics::order_store_refresh("ok", Some(3));

        let text = Metrics::gather_text().unwrap();
        assert!(text.contains("rwa_operations_total"));
        assert!(text.contains("rwa_reconcile_probes_total"));
        assert!(text.contains("rwa_side_effect_failures_total"));
        assert!(text.contains("rwa_order_store_orders"));
    }

    #[test]
    fn test_operation_counter_increments() {
        let before = OPERATIONS_TOTAL
            .with_label_values(&["cancel", "failed"])
            .get();
        Metrics::operation("cancel", "failed");
        let after = OPERATIONS_TOTAL
            .with_label_values(&["cancel", "failed"])
            .get();
        assert!(after >= before + 1.0);
    }
}
