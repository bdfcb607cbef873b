use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::ingress::TickIngress;
use super::stats::{PipelineStats, PipelineStatsSnapshot};
use super::PipelineError;
use crate::config::QueueConfig;
use crate::metrics::{LatencyStats, LatencyTracker};
use crate::models::Tick;
use crate::queue::{ring_buffer, OverflowQueue, RingConsumer};

/// Consumer half of the ingestion queue, owned by the distribution loop
pub type IngestReceiver = RingConsumer<Tick>;

/// State shared by the producer adapter, the distribution loop and the
/// monitoring API
///
/// The ingestion queue itself is split into its producer and consumer halves
/// and handed out by [`PipelineContext::create`]; everything else lives here.
pub struct PipelineContext {
    overflow: OverflowQueue<Tick>,
    stats: PipelineStats,
    send_latency: Mutex<LatencyTracker>,
    stop: AtomicBool,
    /// Computed once at startup
    cutoff: Option<DateTime<Local>>,
}

impl PipelineContext {
    /// Build the context plus both halves of the ingestion queue
    pub fn create(
        config: &QueueConfig,
        cutoff: Option<DateTime<Local>>,
    ) -> Result<(Arc<Self>, TickIngress, IngestReceiver), PipelineError> {
        let (producer, consumer) = ring_buffer(config.ingest_capacity);

        let context = Arc::new(Self {
            overflow: OverflowQueue::new(config.overflow_capacity),
            stats: PipelineStats::new(),
            send_latency: Mutex::new(LatencyTracker::new("transport_send")?),
            stop: AtomicBool::new(false),
            cutoff,
        });

        tracing::info!(
            ingest_capacity = config.ingest_capacity,
            overflow_capacity = config.overflow_capacity,
            cutoff = ?cutoff,
            "📦 Pipeline context created"
        );

        let ingress = TickIngress::new(producer, Arc::clone(&context));
        Ok((context, ingress, consumer))
    }

    pub fn overflow(&self) -> &OverflowQueue<Tick> {
        &self.overflow
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Ask the distribution loop to exit after its current iteration
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub fn cutoff(&self) -> Option<DateTime<Local>> {
        self.cutoff
    }

    pub fn cutoff_reached(&self, now: DateTime<Local>) -> bool {
        self.cutoff.is_some_and(|cutoff| now > cutoff)
    }

    /// Park a tick whose send failed. Overflow only, never the ingestion
    /// queue, so stale ticks do not jump ahead of fresh ones.
    ///
    /// Returns false when overflow is full and the tick was dropped.
    pub fn retry_via_overflow(&self, tick: Tick) -> bool {
        match self.overflow.try_enqueue(tick) {
            Ok(()) => {
                self.stats.record_retried();
                true
            }
            Err(tick) => {
                self.stats.record_dropped();
                tracing::warn!(
                    instrument = %tick.instrument_id(),
                    dropped_total = self.stats.dropped(),
                    "⚠️  Overflow queue full, dropping tick after failed send"
                );
                false
            }
        }
    }

    pub fn record_send_latency(&self, elapsed: Duration) {
        self.send_latency.lock().record(elapsed);
    }

    pub fn send_latency(&self) -> LatencyStats {
        self.send_latency.lock().stats()
    }

    /// Counters plus current overflow gauges
    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            overflow_depth: self.overflow.len(),
            overflow_high_water: self.overflow.high_water(),
            overflow_capacity: self.overflow.capacity(),
            ..self.stats.snapshot()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MarketSnapshot;

    fn small_config() -> QueueConfig {
        QueueConfig {
            ingest_capacity: 4,
            overflow_capacity: 1,
        }
    }

    fn tick(id: &str) -> Tick {
        Tick::new(MarketSnapshot {
            instrument_id: id.to_string(),
            ..Default::default()
        })
    }

    #[test]
    fn test_retry_goes_to_overflow_once() {
        let (context, _ingress, _receiver) = PipelineContext::create(&small_config(), None).unwrap();

        assert!(context.retry_via_overflow(tick("cu2509")));
        assert_eq!(context.overflow().len(), 1);
        assert_eq!(context.snapshot().retried_via_overflow, 1);
        assert_eq!(context.snapshot().dropped, 0);
    }

    #[test]
    fn test_retry_drops_once_when_overflow_full() {
        let (context, _ingress, _receiver) = PipelineContext::create(&small_config(), None).unwrap();

        assert!(context.retry_via_overflow(tick("a")));
        assert!(!context.retry_via_overflow(tick("b")));

        let snapshot = context.snapshot();
        assert_eq!(snapshot.dropped, 1);
        assert_eq!(snapshot.retried_via_overflow, 1);
        assert_eq!(snapshot.overflow_depth, 1);
    }

    #[test]
    fn test_cutoff_and_stop_flag() {
        let cutoff = Local::now();
        let (context, _ingress, _receiver) =
            PipelineContext::create(&small_config(), Some(cutoff)).unwrap();

        assert!(!context.cutoff_reached(cutoff));
        assert!(context.cutoff_reached(cutoff + chrono::Duration::seconds(1)));

        assert!(!context.is_stopped());
        context.request_stop();
        assert!(context.is_stopped());
    }
}
