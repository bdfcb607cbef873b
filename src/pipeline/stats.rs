use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use utoipa::ToSchema;

/// Point-in-time copy of the publisher-side counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PipelineStatsSnapshot {
    /// Ticks handed over by the market data source
    pub ticks_received: u64,
    /// Accepted by the ingestion queue
    pub enqueued_primary: u64,
    /// Ingestion queue full, routed to overflow
    pub overflow_routed: u64,
    /// Lost because overflow was full too
    pub dropped: u64,
    pub published: u64,
    pub publish_timeouts: u64,
    pub publish_queue_full: u64,
    pub publish_errors: u64,
    /// Failed sends parked on the overflow queue
    pub retried_via_overflow: u64,
    pub serialize_failures: u64,
    pub handler_panics: u64,
    pub overflow_depth: usize,
    pub overflow_high_water: usize,
    pub overflow_capacity: usize,
}

/// Lock-free counters for the ingestion and distribution path
#[derive(Debug, Default)]
pub struct PipelineStats {
    ticks_received: AtomicU64,
    enqueued_primary: AtomicU64,
    overflow_routed: AtomicU64,
    dropped: AtomicU64,
    published: AtomicU64,
    publish_timeouts: AtomicU64,
    publish_queue_full: AtomicU64,
    publish_errors: AtomicU64,
    retried_via_overflow: AtomicU64,
    serialize_failures: AtomicU64,
    handler_panics: AtomicU64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_received(&self) {
        self.ticks_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_enqueued(&self) {
        self.enqueued_primary.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_overflow_routed(&self) {
        self.overflow_routed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the running total, used for periodic progress logging
    #[inline]
    pub fn record_published(&self) -> u64 {
        self.published.fetch_add(1, Ordering::Relaxed) + 1
    }

    #[inline]
    pub fn record_publish_timeout(&self) {
        self.publish_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_publish_queue_full(&self) {
        self.publish_queue_full.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_publish_error(&self) {
        self.publish_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_retried(&self) {
        self.retried_via_overflow.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_serialize_failure(&self) {
        self.serialize_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_handler_panic(&self) {
        self.handler_panics.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Counter values only; queue gauges are filled in by the context
    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            ticks_received: self.ticks_received.load(Ordering::Relaxed),
            enqueued_primary: self.enqueued_primary.load(Ordering::Relaxed),
            overflow_routed: self.overflow_routed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            publish_timeouts: self.publish_timeouts.load(Ordering::Relaxed),
            publish_queue_full: self.publish_queue_full.load(Ordering::Relaxed),
            publish_errors: self.publish_errors.load(Ordering::Relaxed),
            retried_via_overflow: self.retried_via_overflow.load(Ordering::Relaxed),
            serialize_failures: self.serialize_failures.load(Ordering::Relaxed),
            handler_panics: self.handler_panics.load(Ordering::Relaxed),
            ..Default::default()
        }
    }
}
