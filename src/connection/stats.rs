//! Connection Statistics
//!
//! Lock-free counters shared by the accept loop, every connection's reader
//! and writer, and the dispatch path.

use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted and registered
    pub connections_accepted: AtomicU64,
    /// Connections refused by admission control
    pub connections_rejected: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total frames decoded from clients
    pub frames_received: AtomicU64,
    /// Total frames written to clients
    pub frames_sent: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
    /// Requests that were unroutable or whose handler failed
    pub dispatch_failures: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn connection_rejected(&self) {
        self.connections_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_received(&self, wire_len: usize) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(wire_len as u64, Ordering::Relaxed);
    }

    pub fn frame_sent(&self, wire_len: usize) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_written
            .fetch_add(wire_len as u64, Ordering::Relaxed);
    }

    pub fn dispatch_failed(&self) {
        self.dispatch_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_rejected: self.connections_rejected.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            dispatch_failures: self.dispatch_failures.load(Ordering::Relaxed),
        }
    }
}

/// Plain copy of [`ConnectionStats`] at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub connections_accepted: u64,
    pub connections_rejected: u64,
    pub active_connections: u64,
    pub frames_received: u64,
    pub frames_sent: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub dispatch_failures: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = ConnectionStats::new();
        stats.connection_opened();
        stats.connection_opened();
        stats.connection_closed();
        stats.connection_rejected();
        stats.frame_received(12);
        stats.frame_sent(10);
        stats.frame_sent(8);
        stats.dispatch_failed();

        let snap = stats.snapshot();
        assert_eq!(snap.connections_accepted, 2);
        assert_eq!(snap.active_connections, 1);
        assert_eq!(snap.connections_rejected, 1);
        assert_eq!(snap.frames_received, 1);
        assert_eq!(snap.bytes_read, 12);
        assert_eq!(snap.frames_sent, 2);
        assert_eq!(snap.bytes_written, 18);
        assert_eq!(snap.dispatch_failures, 1);
    }
}
