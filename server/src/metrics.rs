//! Metrics collection for server monitoring.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::broadcaster::BroadcastReport;

/// Server metrics.
pub struct Metrics {
    /// Total connections accepted.
    pub connections_total: AtomicU64,
    /// Connections currently open.
    pub connections_active: AtomicU64,
    /// Unary rate requests answered.
    pub rate_requests: AtomicU64,
    /// Unary rate requests rejected.
    pub rate_request_errors: AtomicU64,
    /// Subscription requests accepted.
    pub subscriptions_added: AtomicU64,
    /// Broadcast cycles run.
    pub broadcasts: AtomicU64,
    /// Rate updates queued to subscribers.
    pub updates_delivered: AtomicU64,
    /// Rate updates dropped because a subscriber's buffer was full.
    pub updates_dropped: AtomicU64,
    /// Writes or pushes to a connection that failed.
    pub send_failures: AtomicU64,
}

impl Metrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            rate_requests: AtomicU64::new(0),
            rate_request_errors: AtomicU64::new(0),
            subscriptions_added: AtomicU64::new(0),
            broadcasts: AtomicU64::new(0),
            updates_delivered: AtomicU64::new(0),
            updates_dropped: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
        }
    }

    /// Record an accepted connection.
    pub fn connection_opened(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a closed connection.
    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record an answered rate request.
    pub fn rate_request(&self, ok: bool) {
        self.rate_requests.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.rate_request_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record an accepted subscription request.
    pub fn subscription_added(&self) {
        self.subscriptions_added.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed write or push.
    pub fn send_failed(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of one broadcast cycle.
    pub fn broadcast_completed(&self, report: &BroadcastReport) {
        self.broadcasts.fetch_add(1, Ordering::Relaxed);
        self.updates_delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.updates_dropped
            .fetch_add(report.dropped as u64, Ordering::Relaxed);
        self.send_failures
            .fetch_add(report.disconnected as u64, Ordering::Relaxed);
    }

    /// Number of open connections.
    pub fn active_connections(&self) -> u64 {
        self.connections_active.load(Ordering::Relaxed)
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            rate_requests: self.rate_requests.load(Ordering::Relaxed),
            rate_request_errors: self.rate_request_errors.load(Ordering::Relaxed),
            subscriptions_added: self.subscriptions_added.load(Ordering::Relaxed),
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            updates_delivered: self.updates_delivered.load(Ordering::Relaxed),
            updates_dropped: self.updates_dropped.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let series: [(&str, &str, &str, u64); 9] = [
            ("connections_total", "counter", "Total connections accepted", snapshot.connections_total),
            ("connections_active", "gauge", "Currently open connections", snapshot.connections_active),
            ("rate_requests_total", "counter", "Unary rate requests answered", snapshot.rate_requests),
            ("rate_request_errors_total", "counter", "Unary rate requests rejected", snapshot.rate_request_errors),
            ("subscriptions_added_total", "counter", "Subscription requests accepted", snapshot.subscriptions_added),
            ("broadcasts_total", "counter", "Broadcast cycles run", snapshot.broadcasts),
            ("updates_delivered_total", "counter", "Rate updates queued to subscribers", snapshot.updates_delivered),
            ("updates_dropped_total", "counter", "Rate updates dropped on full buffers", snapshot.updates_dropped),
            ("send_failures_total", "counter", "Failed pushes to connections", snapshot.send_failures),
        ];

        let mut output = String::new();
        for (name, kind, help, value) in series {
            output.push_str(&format!(
                "# HELP ratewire_{name} {help}\n# TYPE ratewire_{name} {kind}\nratewire_{name} {value}\n\n"
            ));
        }
        output
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub rate_requests: u64,
    pub rate_request_errors: u64,
    pub subscriptions_added: u64,
    pub broadcasts: u64,
    pub updates_delivered: u64,
    pub updates_dropped: u64,
    pub send_failures: u64,
}
