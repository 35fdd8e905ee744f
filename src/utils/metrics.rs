//! Per-session observability counters.
//!
//! Each session owns (or shares, via `SessionOptions`) one [`SessionMetrics`].
//! Counters are relaxed atomics, readable at any time without the session gate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

#[derive(Debug)]
pub struct SessionMetrics {
    /// Frontend messages written
    pub messages_sent: AtomicU64,
    /// Backend frames read, skipped frames included
    pub messages_received: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,
    /// Interactions driven to `ReadyForQuery`
    pub interactions: AtomicU64,
    /// `ErrorResponse`s received during interactions
    pub server_errors: AtomicU64,
    /// Values that failed to encode or decode
    pub codec_errors: AtomicU64,
    /// Row or COPY frames discarded in skip mode
    pub frames_skipped: AtomicU64,
    pub auth_success: AtomicU64,
    pub auth_failed: AtomicU64,
    /// Async messages handed to the dispatcher
    pub async_messages: AtomicU64,
    start_time: Instant,
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self {
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            interactions: AtomicU64::new(0),
            server_errors: AtomicU64::new(0),
            codec_errors: AtomicU64::new(0),
            frames_skipped: AtomicU64::new(0),
            auth_success: AtomicU64::new(0),
            auth_failed: AtomicU64::new(0),
            async_messages: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// `count` messages totalling `byte_count` bytes were flushed.
    pub fn messages_sent(&self, count: u64, byte_count: u64) {
        self.messages_sent.fetch_add(count, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn message_received(&self, byte_count: u64) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn interaction_completed(&self) {
        self.interactions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn server_error(&self) {
        self.server_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn codec_error(&self) {
        self.codec_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_skipped(&self) {
        self.frames_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn auth_success(&self) {
        self.auth_success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn auth_failed(&self) {
        self.auth_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn async_message(&self) {
        self.async_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            interactions: self.interactions.load(Ordering::Relaxed),
            server_errors: self.server_errors.load(Ordering::Relaxed),
            codec_errors: self.codec_errors.load(Ordering::Relaxed),
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
            auth_success: self.auth_success.load(Ordering::Relaxed),
            auth_failed: self.auth_failed.load(Ordering::Relaxed),
            async_messages: self.async_messages.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            messages_sent = snapshot.messages_sent,
            messages_received = snapshot.messages_received,
            bytes_sent = snapshot.bytes_sent,
            bytes_received = snapshot.bytes_received,
            interactions = snapshot.interactions,
            server_errors = snapshot.server_errors,
            codec_errors = snapshot.codec_errors,
            frames_skipped = snapshot.frames_skipped,
            auth_success = snapshot.auth_success,
            auth_failed = snapshot.auth_failed,
            async_messages = snapshot.async_messages,
            uptime_seconds = snapshot.uptime_seconds,
            "Session metrics snapshot"
        );
    }
}

impl Default for SessionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub interactions: u64,
    pub server_errors: u64,
    pub codec_errors: u64,
    pub frames_skipped: u64,
    pub auth_success: u64,
    pub auth_failed: u64,
    pub async_messages: u64,
    pub uptime_seconds: u64,
}

/// Logs the elapsed time of an operation when dropped.
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        debug!(
            operation = self.operation,
            duration_us = duration.as_micros() as u64,
            "Operation completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = SessionMetrics::new();
        metrics.messages_sent(3, 120);
        metrics.message_received(40);
        metrics.message_received(2);
        metrics.frame_skipped();
        let snap = metrics.snapshot();
        assert_eq!(snap.messages_sent, 3);
        assert_eq!(snap.bytes_sent, 120);
        assert_eq!(snap.messages_received, 2);
        assert_eq!(snap.bytes_received, 42);
        assert_eq!(snap.frames_skipped, 1);
        assert_eq!(snap.server_errors, 0);
    }
}
