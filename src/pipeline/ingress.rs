use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use super::context::PipelineContext;
use crate::models::{MarketSnapshot, Tick};
use crate::queue::RingProducer;
use crate::source::TickHandler;

/// Where a tick ended up after the producer-side enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Primary,
    /// Ingestion queue was full
    Overflow,
    /// Both queues were full; the tick is gone
    Dropped,
}

/// Producer adapter running on the vendor's callback thread
///
/// Owns the only producer half of the ingestion queue. Every call is O(1)
/// and never waits on the distribution loop.
pub struct TickIngress {
    primary: RingProducer<Tick>,
    context: Arc<PipelineContext>,
}

impl TickIngress {
    pub(crate) fn new(primary: RingProducer<Tick>, context: Arc<PipelineContext>) -> Self {
        Self { primary, context }
    }

    /// Stamp a vendor snapshot and enqueue it
    pub fn on_tick(&mut self, snapshot: MarketSnapshot) -> EnqueueOutcome {
        self.enqueue(Tick::new(snapshot))
    }

    /// Returns false only when the tick was dropped
    pub fn try_enqueue(&mut self, tick: Tick) -> bool {
        self.enqueue(tick) != EnqueueOutcome::Dropped
    }

    /// Primary first, then overflow, then drop
    pub fn enqueue(&mut self, tick: Tick) -> EnqueueOutcome {
        let stats = self.context.stats();
        stats.record_received();

        let tick = match self.primary.try_enqueue(tick) {
            Ok(()) => {
                stats.record_enqueued();
                return EnqueueOutcome::Primary;
            }
            Err(tick) => tick,
        };

        match self.context.overflow().try_enqueue(tick) {
            Ok(()) => {
                stats.record_overflow_routed();
                tracing::debug!("Ingestion queue full, tick routed to overflow");
                EnqueueOutcome::Overflow
            }
            Err(tick) => {
                stats.record_dropped();
                tracing::warn!(
                    instrument = %tick.instrument_id(),
                    dropped_total = stats.dropped(),
                    "⚠️  Ingestion and overflow queues full, dropping tick"
                );
                EnqueueOutcome::Dropped
            }
        }
    }

    /// Ticks currently waiting in the ingestion queue
    pub fn primary_depth(&self) -> usize {
        self.primary.len()
    }

    pub fn context(&self) -> &Arc<PipelineContext> {
        &self.context
    }

    /// Wrap the adapter as a vendor callback
    ///
    /// A panic inside the adapter is caught and counted here; it must not
    /// unwind into the vendor runtime.
    pub fn into_handler(mut self) -> TickHandler {
        Box::new(move |snapshot: MarketSnapshot| {
            let outcome = catch_unwind(AssertUnwindSafe(|| self.on_tick(snapshot)));
            if outcome.is_err() {
                self.context.stats().record_handler_panic();
                tracing::error!("❌ Tick handler panicked; tick discarded");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use std::time::{Duration, Instant};

    fn snapshot(id: usize) -> MarketSnapshot {
        MarketSnapshot {
            instrument_id: format!("rb{}", id),
            last_price: id as f64,
            ..Default::default()
        }
    }

    fn create(ingest: usize, overflow: usize) -> (Arc<PipelineContext>, TickIngress, crate::pipeline::IngestReceiver) {
        PipelineContext::create(
            &QueueConfig {
                ingest_capacity: ingest,
                overflow_capacity: overflow,
            },
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_enqueue_with_free_capacity_is_dequeued_once() {
        let (_context, mut ingress, mut receiver) = create(16, 16);

        for i in 0..10 {
            assert!(ingress.try_enqueue(Tick::new(snapshot(i))));
        }

        let seen: Vec<String> = std::iter::from_fn(|| receiver.try_dequeue())
            .map(|tick| tick.instrument_id().to_string())
            .collect();

        let expected: Vec<String> = (0..10).map(|i| format!("rb{}", i)).collect();
        assert_eq!(seen, expected);
        assert!(receiver.try_dequeue().is_none());
    }

    #[test]
    fn test_one_past_capacity_routes_exactly_one_to_overflow() {
        let (context, mut ingress, _receiver) = create(10_000, 500_000);

        for i in 0..10_001 {
            ingress.on_tick(snapshot(i));
        }

        let stats = context.snapshot();
        assert_eq!(stats.overflow_routed, 1);
        assert_eq!(stats.enqueued_primary, 10_000);
        assert_eq!(stats.dropped, 0);
        assert_eq!(ingress.primary_depth(), 10_000);
        assert_eq!(context.overflow().len(), 1);
    }

    #[test]
    fn test_both_full_drops_exactly_one_without_blocking() {
        let (context, mut ingress, _receiver) = create(4, 2);

        for i in 0..6 {
            assert!(ingress.try_enqueue(Tick::new(snapshot(i))));
        }

        let started = Instant::now();
        assert!(!ingress.try_enqueue(Tick::new(snapshot(6))));
        assert!(started.elapsed() < Duration::from_millis(50));

        let stats = context.snapshot();
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.overflow_routed, 2);
        assert_eq!(stats.ticks_received, 7);
    }

    #[test]
    fn test_handler_feeds_queue_from_another_thread() {
        let (context, ingress, mut receiver) = create(128, 128);
        let mut handler = ingress.into_handler();

        std::thread::spawn(move || {
            for i in 0..50 {
                handler(snapshot(i));
            }
        })
        .join()
        .unwrap();

        let count = std::iter::from_fn(|| receiver.try_dequeue()).count();
        assert_eq!(count, 50);
        assert_eq!(context.snapshot().handler_panics, 0);
    }
}
