use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use utoipa::ToSchema;

/// Point-in-time copy of the subscriber-side counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SubscriberStatsSnapshot {
    /// Envelopes taken off the transport
    pub envelopes_received: u64,
    pub ticks_parsed: u64,
    pub parse_failures: u64,
    pub unknown_tags: u64,
    pub record_rows: u64,
    /// Reference rows below the minimum field count
    pub short_rows: u64,
    pub flushes: u64,
    /// Rows the sink reported as stored
    pub persisted: u64,
    pub persist_failures: u64,
    /// Flushes that ran out of retries or were evicted from the pending list
    pub dead_lettered_batches: u64,
    pub dead_lettered_rows: u64,
    /// Rows lost without a dead-letter spool
    pub rows_lost: u64,
    pub buffered: usize,
    pub pending_batches: usize,
}

#[derive(Debug, Default)]
pub struct SubscriberStats {
    envelopes_received: AtomicU64,
    ticks_parsed: AtomicU64,
    parse_failures: AtomicU64,
    unknown_tags: AtomicU64,
    record_rows: AtomicU64,
    short_rows: AtomicU64,
    flushes: AtomicU64,
    persisted: AtomicU64,
    persist_failures: AtomicU64,
    dead_lettered_batches: AtomicU64,
    dead_lettered_rows: AtomicU64,
    rows_lost: AtomicU64,
    buffered: AtomicUsize,
    pending_batches: AtomicUsize,
}

impl SubscriberStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_envelope(&self) {
        self.envelopes_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_tick_parsed(&self) {
        self.ticks_parsed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_parse_failure(&self) {
        self.parse_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_unknown_tag(&self) {
        self.unknown_tags.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rows(&self, accepted: usize, short: usize) {
        self.record_rows.fetch_add(accepted as u64, Ordering::Relaxed);
        self.short_rows.fetch_add(short as u64, Ordering::Relaxed);
    }

    pub fn record_flush(&self, persisted: usize) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        self.persisted.fetch_add(persisted as u64, Ordering::Relaxed);
    }

    /// Rows stored outside a buffered flush (reference records)
    pub fn record_persisted(&self, persisted: usize) {
        self.persisted.fetch_add(persisted as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_persist_failure(&self) {
        self.persist_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dead_lettered(&self, rows: usize) {
        self.dead_lettered_batches.fetch_add(1, Ordering::Relaxed);
        self.dead_lettered_rows.fetch_add(rows as u64, Ordering::Relaxed);
    }

    pub fn record_lost(&self, rows: usize) {
        self.rows_lost.fetch_add(rows as u64, Ordering::Relaxed);
    }

    pub fn set_buffered(&self, buffered: usize) {
        self.buffered.store(buffered, Ordering::Relaxed);
    }

    pub fn set_pending_batches(&self, pending: usize) {
        self.pending_batches.store(pending, Ordering::Relaxed);
    }

    pub fn parse_failures(&self) -> u64 {
        self.parse_failures.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> SubscriberStatsSnapshot {
        SubscriberStatsSnapshot {
            envelopes_received: self.envelopes_received.load(Ordering::Relaxed),
            ticks_parsed: self.ticks_parsed.load(Ordering::Relaxed),
            parse_failures: self.parse_failures.load(Ordering::Relaxed),
            unknown_tags: self.unknown_tags.load(Ordering::Relaxed),
            record_rows: self.record_rows.load(Ordering::Relaxed),
            short_rows: self.short_rows.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
            dead_lettered_batches: self.dead_lettered_batches.load(Ordering::Relaxed),
            dead_lettered_rows: self.dead_lettered_rows.load(Ordering::Relaxed),
            rows_lost: self.rows_lost.load(Ordering::Relaxed),
            buffered: self.buffered.load(Ordering::Relaxed),
            pending_batches: self.pending_batches.load(Ordering::Relaxed),
        }
    }
}
