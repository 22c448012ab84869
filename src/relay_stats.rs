use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// Relay-wide counters, shared by the accept loop and connection threads.
#[derive(Debug, Default)]
pub struct RelayStats {
    pub active_connections: AtomicU32,
    pub connections_accepted: AtomicU64,
    pub connections_refused: AtomicU64,
    pub handshakes_completed: AtomicU64,
    pub client_hellos_captured: AtomicU64,
    pub bytes_upstream: AtomicU64,
    pub bytes_downstream: AtomicU64,
}

impl RelayStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self, bytes_upstream: u64, bytes_downstream: u64) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
        self.bytes_upstream.fetch_add(bytes_upstream, Ordering::Relaxed);
        self.bytes_downstream.fetch_add(bytes_downstream, Ordering::Relaxed);
    }

    pub fn connection_refused(&self) {
        self.connections_refused.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_completed(&self) {
        self.handshakes_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn client_hello_captured(&self) {
        self.client_hellos_captured.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RelayStatsSnapshot {
        RelayStatsSnapshot {
            active_connections: self.active_connections.load(Ordering::Relaxed),
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_refused: self.connections_refused.load(Ordering::Relaxed),
            handshakes_completed: self.handshakes_completed.load(Ordering::Relaxed),
            client_hellos_captured: self.client_hellos_captured.load(Ordering::Relaxed),
            bytes_upstream: self.bytes_upstream.load(Ordering::Relaxed),
            bytes_downstream: self.bytes_downstream.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RelayStatsSnapshot {
    pub active_connections: u32,
    pub connections_accepted: u64,
    pub connections_refused: u64,
    pub handshakes_completed: u64,
    pub client_hellos_captured: u64,
    pub bytes_upstream: u64,
    pub bytes_downstream: u64,
}

impl fmt::Display for RelayStatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "active={} accepted={} refused={} handshakes={} client_hellos={} up={:.1}KB down={:.1}KB",
            self.active_connections,
            self.connections_accepted,
            self.connections_refused,
            self.handshakes_completed,
            self.client_hellos_captured,
            self.bytes_upstream as f64 / 1024.0,
            self.bytes_downstream as f64 / 1024.0,
        )
    }
}
