//! Bus-wide counters, exposed as an atomic set internally and a plain
//! snapshot struct externally.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct BusStats {
    published: AtomicU64,
    consumed: AtomicU64,
    pending: AtomicU64,
    errors: AtomicU64,
    active_channels: AtomicU64,
    active_subscribers: AtomicU64,
    dead_letter_messages: AtomicU64,
}

/// A point-in-time copy of [`BusStats`], safe to serialize and hand out to
/// callers without exposing the atomics themselves.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct BusStatsSnapshot {
    pub published: u64,
    pub consumed: u64,
    pub pending: u64,
    pub errors: u64,
    #[serde(rename = "activeChannels")]
    pub active_channels: u64,
    #[serde(rename = "activeSubscribers")]
    pub active_subscribers: u64,
    #[serde(rename = "deadLetterMessages")]
    pub dead_letter_messages: u64,
}

impl BusStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_consumed(&self) {
        self.consumed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dead_letter(&self) {
        self.dead_letter_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn channel_registered(&self) {
        self.active_channels.fetch_add(1, Ordering::Relaxed);
    }

    pub fn subscriber_added(&self) {
        self.active_subscribers.fetch_add(1, Ordering::Relaxed);
        self.pending.fetch_add(1, Ordering::Relaxed);
    }

    pub fn subscriber_removed(&self) {
        self.active_subscribers.fetch_sub(1, Ordering::Relaxed);
        self.pending.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BusStatsSnapshot {
        BusStatsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            consumed: self.consumed.load(Ordering::Relaxed),
            pending: self.pending.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            active_channels: self.active_channels.load(Ordering::Relaxed),
            active_subscribers: self.active_subscribers.load(Ordering::Relaxed),
            dead_letter_messages: self.dead_letter_messages.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_independently() {
        let stats = BusStats::new();
        stats.record_published();
        stats.record_published();
        stats.record_consumed();
        stats.record_error();
        stats.record_dead_letter();
        let snap = stats.snapshot();
        assert_eq!(snap.published, 2);
        assert_eq!(snap.consumed, 1);
        assert_eq!(snap.errors, 1);
        assert_eq!(snap.dead_letter_messages, 1);
    }

    #[test]
    fn subscriber_add_remove_keeps_pending_in_sync() {
        let stats = BusStats::new();
        stats.subscriber_added();
        stats.subscriber_added();
        assert_eq!(stats.snapshot().active_subscribers, 2);
        assert_eq!(stats.snapshot().pending, 2);
        stats.subscriber_removed();
        assert_eq!(stats.snapshot().active_subscribers, 1);
        assert_eq!(stats.snapshot().pending, 1);
    }
}
