//! Session gauges and admission counters shared by the TCP front doors.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::utils::time;

/// Point-in-time view returned by [`ServerMetrics::snapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub active_log_clients: usize,
    pub active_query_clients: usize,
    pub rejected_clients: u64,
    pub uptime_secs: i64,
}

/// Atomic counters; cheap to share across accept loops and sessions.
pub struct ServerMetrics {
    active_log_clients: AtomicUsize,
    active_query_clients: AtomicUsize,
    rejected_clients: AtomicU64,
    started_at: i64,
}

impl ServerMetrics {
    pub fn new() -> Self {
        ServerMetrics {
            active_log_clients: AtomicUsize::new(0),
            active_query_clients: AtomicUsize::new(0),
            rejected_clients: AtomicU64::new(0),
            started_at: time::now(),
        }
    }

    /// Combined session count used for `max_clients` admission.
    pub fn active_sessions(&self) -> usize {
        self.active_log_clients.load(Ordering::Acquire)
            + self.active_query_clients.load(Ordering::Acquire)
    }

    pub fn log_session_started(&self) {
        self.active_log_clients.fetch_add(1, Ordering::AcqRel);
    }

    pub fn log_session_finished(&self) {
        self.active_log_clients.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn query_session_started(&self) {
        self.active_query_clients.fetch_add(1, Ordering::AcqRel);
    }

    pub fn query_session_finished(&self) {
        self.active_query_clients.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn client_rejected(&self) {
        self.rejected_clients.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            active_log_clients: self.active_log_clients.load(Ordering::Acquire),
            active_query_clients: self.active_query_clients.load(Ordering::Acquire),
            rejected_clients: self.rejected_clients.load(Ordering::Relaxed),
            uptime_secs: time::now() - self.started_at,
        }
    }
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self::new()
    }
}
