//! Prometheus metrics for qflow.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()`. A registration failure means a
//! duplicate metric name, which is a programming error that should crash at
//! first use rather than silently drop samples.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    HistogramVec, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

use crate::error::{TelemetryError, TelemetryResult};

/// Tickets issued.
/// Labels: topic (topic code)
pub static TICKETS_ISSUED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "qflow_tickets_issued_total",
        "Total tickets issued",
        &["topic"]
    )
    .unwrap()
});

/// Tickets promoted to IN_PROGRESS.
/// Labels: counter (counter id)
pub static DISPATCHES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "qflow_dispatches_total",
        "Total tickets dispatched to a counter",
        &["counter"]
    )
    .unwrap()
});

/// Tickets moved from IN_PROGRESS to CALLED.
/// Labels: reason (next_call/counter_closed)
pub static TICKETS_FINISHED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "qflow_tickets_finished_total",
        "Total tickets finished at a counter",
        &["reason"]
    )
    .unwrap()
});

/// Counters force-closed by the scheduler.
pub static COUNTERS_CLOSED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "qflow_counters_closed_total",
        "Total counters closed by the closing scheduler"
    )
    .unwrap()
});

/// Background cycles.
/// Labels: task (closing/retention), outcome (ok/failed)
pub static SCHEDULER_CYCLES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "qflow_scheduler_cycles_total",
        "Total background scheduler cycles",
        &["task", "outcome"]
    )
    .unwrap()
});

/// Tickets removed by the retention sweep.
pub static TICKETS_PURGED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "qflow_tickets_purged_total",
        "Total tickets deleted by the retention sweep"
    )
    .unwrap()
});

/// Notification jobs.
/// Labels: kind (feedback_request/recall), outcome (delivered/failed/dropped/skipped)
pub static NOTIFICATIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "qflow_notifications_total",
        "Total notification jobs by outcome",
        &["kind", "outcome"]
    )
    .unwrap()
});

/// Notification jobs queued and not yet picked up by a worker.
pub static NOTIFICATION_QUEUE_DEPTH: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "qflow_notification_queue_depth",
        "Notification jobs waiting for a worker"
    )
    .unwrap()
});

/// Hub events broadcast.
/// Labels: event
pub static HUB_EVENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "qflow_hub_events_total",
        "Total events broadcast by the realtime hub",
        &["event"]
    )
    .unwrap()
});

/// Currently registered viewers.
pub static VIEWERS_CONNECTED: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "qflow_viewers_connected",
        "Viewers currently registered with the realtime hub"
    )
    .unwrap()
});

/// Viewers removed by the hub.
/// Labels: reason (lagging/closed)
pub static VIEWERS_DROPPED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "qflow_viewers_dropped_total",
        "Total viewers dropped by the realtime hub",
        &["reason"]
    )
    .unwrap()
});

/// Operation errors.
/// Labels: operation, kind
pub static OPERATION_ERRORS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "qflow_operation_errors_total",
        "Total failed engine operations",
        &["operation", "kind"]
    )
    .unwrap()
});

/// Store transaction latency in milliseconds.
/// Labels: operation
pub static STORE_LATENCY_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "qflow_store_latency_ms",
        "Store transaction latency in milliseconds",
        &["operation"],
        vec![0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0, 250.0, 500.0, 1000.0]
    )
    .unwrap()
});

/// Metrics facade.
pub struct Metrics;

impl Metrics {
    pub fn ticket_issued(topic_code: &str) {
        TICKETS_ISSUED_TOTAL.with_label_values(&[topic_code]).inc();
    }

    pub fn ticket_dispatched(counter: i64) {
        DISPATCHES_TOTAL
            .with_label_values(&[&counter.to_string()])
            .inc();
    }

    /// Record a ticket leaving IN_PROGRESS.
    pub fn ticket_finished(reason: &str) {
        TICKETS_FINISHED_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn counters_closed(count: usize) {
        COUNTERS_CLOSED_TOTAL.inc_by(count as u64);
    }

    pub fn scheduler_cycle(task: &str, ok: bool) {
        let outcome = if ok { "ok" } else { "failed" };
        SCHEDULER_CYCLES_TOTAL
            .with_label_values(&[task, outcome])
            .inc();
    }

    pub fn tickets_purged(count: u64) {
        TICKETS_PURGED_TOTAL.inc_by(count);
    }

    pub fn notification(kind: &str, outcome: &str) {
        NOTIFICATIONS_TOTAL.with_label_values(&[kind, outcome]).inc();
    }

    pub fn notification_queued() {
        NOTIFICATION_QUEUE_DEPTH.inc();
    }

    pub fn notification_dequeued() {
        NOTIFICATION_QUEUE_DEPTH.dec();
    }

    pub fn hub_event(event: &str) {
        HUB_EVENTS_TOTAL.with_label_values(&[event]).inc();
    }

    pub fn viewers_set(count: usize) {
        VIEWERS_CONNECTED.set(count as i64);
    }

    pub fn viewer_dropped(reason: &str) {
        VIEWERS_DROPPED_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn operation_error(operation: &str, kind: &str) {
        OPERATION_ERRORS_TOTAL
            .with_label_values(&[operation, kind])
            .inc();
    }

    pub fn store_latency(operation: &str, latency_ms: f64) {
        STORE_LATENCY_MS
            .with_label_values(&[operation])
            .observe(latency_ms);
    }
}

/// Encode every registered metric in the Prometheus text format.
pub fn render() -> TelemetryResult<String> {
    let encoder = TextEncoder::new();
    encoder
        .encode_to_string(&prometheus::gather())
        .map_err(|e| TelemetryError::Metrics(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_increment() {
        let before = TICKETS_ISSUED_TOTAL.with_label_values(&["T"]).get();
        Metrics::ticket_issued("T");
        Metrics::ticket_issued("T");
        assert_eq!(TICKETS_ISSUED_TOTAL.with_label_values(&["T"]).get(), before + 2);
    }

    #[test]
    fn test_render_includes_touched_metrics() {
        Metrics::counters_closed(1);
        Metrics::viewer_dropped("lagging");
        let text = render().unwrap();
        assert!(text.contains("qflow_counters_closed_total"));
        assert!(text.contains("qflow_viewers_dropped_total{reason=\"lagging\"}"));
    }
}
