use chrono::Utc;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::sink::TickSink;
use super::stats::SubscriberStats;
use crate::config::BatchConfig;
use crate::models::ParsedTick;
use crate::persistence::{DeadLetter, DeadLetterSpool};

/// Result of one flush
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Ticks swapped out of the live buffer
    pub batch_size: usize,
    /// Rows stored from this batch and from retried batches
    pub persisted: usize,
    pub retried_batches: usize,
    pub dead_lettered_rows: usize,
    /// Batches still waiting for a retry afterwards
    pub pending: usize,
}

struct Live {
    ticks: Vec<ParsedTick>,
    last_flush: Instant,
}

struct PendingBatch {
    ticks: Vec<ParsedTick>,
    attempts: u32,
    last_error: String,
}

/// Everything touched while talking to the sink
struct FlushSide {
    pending: VecDeque<PendingBatch>,
    spool: Option<DeadLetterSpool>,
}

/// Subscriber-side tick accumulator with size and time flush triggers
///
/// The live buffer lock is only held to push or swap; the sink is always
/// called after it is released. Flushes themselves are serialized so retries
/// keep their order.
pub struct BatchBuffer {
    live: Mutex<Live>,
    flush_side: Mutex<FlushSide>,
    /// Mirrors `flush_side.pending.len()` so the timer never waits on a flush
    pending_count: AtomicUsize,
    capacity: usize,
    interval: Duration,
    max_retries: u32,
    pending_limit: usize,
    sink: Arc<dyn TickSink>,
    stats: Arc<SubscriberStats>,
}

impl BatchBuffer {
    pub fn new(
        config: &BatchConfig,
        sink: Arc<dyn TickSink>,
        spool: Option<DeadLetterSpool>,
        stats: Arc<SubscriberStats>,
    ) -> Self {
        let capacity = config.capacity.max(1);
        Self {
            live: Mutex::new(Live {
                ticks: Vec::with_capacity(capacity),
                last_flush: Instant::now(),
            }),
            flush_side: Mutex::new(FlushSide {
                pending: VecDeque::new(),
                spool,
            }),
            pending_count: AtomicUsize::new(0),
            capacity,
            interval: config.flush_interval(),
            max_retries: config.max_retries.max(1),
            pending_limit: config.pending_limit,
            sink,
            stats,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn len(&self) -> usize {
        self.live.lock().ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pending_batches(&self) -> usize {
        self.pending_count.load(Ordering::Acquire)
    }

    /// Add a tick; flushes right away when this append fills the buffer
    pub fn append(&self, tick: ParsedTick) -> Option<FlushReport> {
        let batch = {
            let mut live = self.live.lock();
            live.ticks.push(tick);
            if live.ticks.len() >= self.capacity {
                Some(self.swap_out(&mut live, Instant::now()))
            } else {
                self.stats.set_buffered(live.ticks.len());
                None
            }
        };

        batch.map(|batch| {
            tracing::debug!(count = batch.len(), "Batch full, flushing");
            self.persist(batch)
        })
    }

    /// Timer check: flush if `interval` has passed since the last flush and
    /// there is anything to write
    pub fn flush_if_due(&self, now: Instant) -> Option<FlushReport> {
        let batch = {
            let mut live = self.live.lock();
            if now.saturating_duration_since(live.last_flush) < self.interval {
                return None;
            }
            if live.ticks.is_empty() && self.pending_batches() == 0 {
                return None;
            }
            self.swap_out(&mut live, now)
        };

        if !batch.is_empty() {
            tracing::debug!(count = batch.len(), "Flush interval elapsed, flushing");
        }
        Some(self.persist(batch))
    }

    /// Unconditional flush, used at shutdown
    pub fn flush(&self) -> FlushReport {
        let batch = {
            let mut live = self.live.lock();
            self.swap_out(&mut live, Instant::now())
        };
        self.persist(batch)
    }

    /// Spool a batch that failed outside the buffer (reference records)
    pub fn dead_letter(&self, letter: DeadLetter) {
        let mut side = self.flush_side.lock();
        self.write_dead_letter(&mut side, letter);
    }

    fn swap_out(&self, live: &mut Live, now: Instant) -> Vec<ParsedTick> {
        live.last_flush = now;
        self.stats.set_buffered(0);
        std::mem::replace(&mut live.ticks, Vec::with_capacity(self.capacity))
    }

    fn persist(&self, batch: Vec<ParsedTick>) -> FlushReport {
        let mut side = self.flush_side.lock();
        let mut report = FlushReport {
            batch_size: batch.len(),
            ..Default::default()
        };

        self.retry_pending(&mut side, &mut report);

        if !batch.is_empty() {
            match self.sink.insert_batch(&batch) {
                Ok(stored) => {
                    self.record_stored(batch.len(), stored);
                    report.persisted += stored;
                }
                Err(e) => {
                    self.stats.record_persist_failure();
                    tracing::error!(count = batch.len(), error = %e, "❌ Failed to persist batch");
                    side.pending.push_back(PendingBatch {
                        ticks: batch,
                        attempts: 1,
                        last_error: e.to_string(),
                    });
                }
            }
        }

        // Exhausted batches go first, then the oldest ones over the limit
        while let Some(pos) = side.pending.iter().position(|p| p.attempts >= self.max_retries) {
            if let Some(exhausted) = side.pending.remove(pos) {
                report.dead_lettered_rows += exhausted.ticks.len();
                self.dead_letter_ticks(&mut side, exhausted);
            }
        }
        while side.pending.len() > self.pending_limit {
            if let Some(evicted) = side.pending.pop_front() {
                tracing::warn!(attempts = evicted.attempts, "Pending retry list full, evicting oldest batch");
                report.dead_lettered_rows += evicted.ticks.len();
                self.dead_letter_ticks(&mut side, evicted);
            }
        }

        report.pending = side.pending.len();
        self.pending_count.store(report.pending, Ordering::Release);
        self.stats.set_pending_batches(report.pending);
        report
    }

    /// Retry parked batches oldest first, stopping at the first failure
    fn retry_pending(&self, side: &mut FlushSide, report: &mut FlushReport) {
        while let Some(mut pending) = side.pending.pop_front() {
            report.retried_batches += 1;
            match self.sink.insert_batch(&pending.ticks) {
                Ok(stored) => {
                    self.record_stored(pending.ticks.len(), stored);
                    report.persisted += stored;
                    tracing::info!(
                        count = pending.ticks.len(),
                        attempts = pending.attempts + 1,
                        "✅ Pending batch persisted on retry"
                    );
                }
                Err(e) => {
                    self.stats.record_persist_failure();
                    pending.attempts += 1;
                    pending.last_error = e.to_string();
                    tracing::warn!(attempts = pending.attempts, error = %e, "Retry of pending batch failed");
                    side.pending.push_front(pending);
                    return;
                }
            }
        }
    }

    fn record_stored(&self, attempted: usize, stored: usize) {
        self.stats.record_flush(stored);
        if stored < attempted {
            tracing::debug!(attempted, stored, "Partial batch insert");
        }
    }

    fn dead_letter_ticks(&self, side: &mut FlushSide, batch: PendingBatch) {
        let letter = DeadLetter::Ticks {
            failed_at: Utc::now(),
            attempts: batch.attempts,
            reason: batch.last_error,
            ticks: batch.ticks,
        };
        self.write_dead_letter(side, letter);
    }

    fn write_dead_letter(&self, side: &mut FlushSide, letter: DeadLetter) {
        let rows = letter.len();
        let Some(spool) = side.spool.as_mut() else {
            self.stats.record_lost(rows);
            tracing::error!(rows, "❌ Batch lost: persistence failed and no dead-letter spool configured");
            return;
        };

        match spool.append(&letter) {
            Ok(()) => {
                self.stats.record_dead_lettered(rows);
                tracing::warn!(rows, dir = %spool.dir().display(), "📮 Batch written to dead-letter spool");
            }
            Err(e) => {
                self.stats.record_lost(rows);
                tracing::error!(rows, error = %e, "❌ Batch lost: dead-letter spool write failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::fixtures::populated_snapshot;
    use crate::models::WireFormat;
    use crate::persistence::dead_letter;
    use crate::subscriber::sink::PersistError;
    use tempfile::TempDir;

    /// Records batch sizes; fails the first `fail_first` calls
    struct MockSink {
        calls: Arc<AtomicUsize>,
        sizes: parking_lot::Mutex<Vec<usize>>,
        fail_first: usize,
        store_at_most: usize,
    }

    impl MockSink {
        fn new(fail_first: usize) -> Arc<Self> {
            Self::storing_at_most(fail_first, usize::MAX)
        }

        fn storing_at_most(fail_first: usize, store_at_most: usize) -> Arc<Self> {
            Arc::new(Self {
                calls: Arc::new(AtomicUsize::new(0)),
                sizes: parking_lot::Mutex::new(Vec::new()),
                fail_first,
                store_at_most,
            })
        }

        fn sizes(&self) -> Vec<usize> {
            self.sizes.lock().clone()
        }
    }

    impl TickSink for MockSink {
        fn insert_batch(&self, ticks: &[ParsedTick]) -> Result<usize, PersistError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.sizes.lock().push(ticks.len());
            if call < self.fail_first {
                return Err(PersistError::Rejected("database unavailable".to_string()));
            }
            Ok(ticks.len().min(self.store_at_most))
        }
    }

    fn config(capacity: usize) -> BatchConfig {
        BatchConfig {
            capacity,
            flush_interval_secs: 30,
            max_retries: 3,
            pending_limit: 16,
            dead_letter_dir: None,
        }
    }

    fn tick() -> ParsedTick {
        ParsedTick::new(populated_snapshot(), None, WireFormat::Legacy)
    }

    fn buffer(config: &BatchConfig, sink: Arc<MockSink>) -> (BatchBuffer, Arc<SubscriberStats>) {
        let stats = Arc::new(SubscriberStats::new());
        let buffer = BatchBuffer::new(config, sink, None, Arc::clone(&stats));
        (buffer, stats)
    }

    #[test]
    fn test_capacity_append_flushes_exactly_capacity() {
        let sink = MockSink::new(0);
        let (buffer, stats) = buffer(&config(1_000), Arc::clone(&sink));

        for _ in 0..999 {
            assert!(buffer.append(tick()).is_none());
        }
        assert_eq!(buffer.len(), 999);

        let report = buffer.append(tick()).unwrap();
        assert_eq!(report.batch_size, 1_000);
        assert_eq!(report.persisted, 1_000);
        assert!(buffer.is_empty());
        assert_eq!(sink.sizes(), vec![1_000]);
        assert_eq!(stats.snapshot().flushes, 1);
    }

    #[test]
    fn test_idle_interval_flushes_partial_batch_once() {
        let sink = MockSink::new(0);
        let (buffer, _stats) = buffer(&config(1_000), Arc::clone(&sink));
        let start = Instant::now();

        for _ in 0..5 {
            buffer.append(tick());
        }
        assert!(buffer.flush_if_due(start).is_none());

        let report = buffer.flush_if_due(start + Duration::from_secs(31)).unwrap();
        assert_eq!(report.batch_size, 5);
        assert_eq!(sink.sizes(), vec![5]);

        assert!(buffer.flush_if_due(start + Duration::from_secs(62)).is_none());
        assert_eq!(sink.sizes(), vec![5]);
    }

    #[test]
    fn test_empty_buffer_never_calls_sink_on_timer() {
        let sink = MockSink::new(0);
        let (buffer, _stats) = buffer(&config(10), Arc::clone(&sink));

        assert!(buffer.flush_if_due(Instant::now() + Duration::from_secs(3_600)).is_none());
        assert_eq!(sink.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_forced_flush_ignores_interval() {
        let sink = MockSink::new(0);
        let (buffer, _stats) = buffer(&config(10), Arc::clone(&sink));

        buffer.append(tick());
        buffer.append(tick());
        buffer.append(tick());

        assert_eq!(buffer.flush().persisted, 3);
        assert_eq!(sink.sizes(), vec![3]);
    }

    #[test]
    fn test_failed_batch_is_retried_before_next_flush() {
        let sink = MockSink::new(1);
        let (buffer, stats) = buffer(&config(2), Arc::clone(&sink));

        buffer.append(tick());
        let first = buffer.append(tick()).unwrap();
        assert_eq!(first.persisted, 0);
        assert_eq!(first.pending, 1);
        assert!(buffer.is_empty());

        buffer.append(tick());
        let second = buffer.append(tick()).unwrap();
        assert_eq!(second.retried_batches, 1);
        assert_eq!(second.persisted, 4);
        assert_eq!(second.pending, 0);

        assert_eq!(sink.sizes(), vec![2, 2, 2]);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.persisted, 4);
        assert_eq!(snapshot.persist_failures, 1);
    }

    #[test]
    fn test_timer_retries_pending_with_empty_buffer() {
        let sink = MockSink::new(1);
        let (buffer, _stats) = buffer(&config(10), Arc::clone(&sink));
        let start = Instant::now();

        buffer.append(tick());
        assert_eq!(buffer.flush().pending, 1);

        let report = buffer.flush_if_due(start + Duration::from_secs(60)).unwrap();
        assert_eq!(report.batch_size, 0);
        assert_eq!(report.persisted, 1);
        assert_eq!(buffer.pending_batches(), 0);
    }

    #[test]
    fn test_exhausted_batch_goes_to_dead_letter_spool() {
        let temp_dir = TempDir::new().unwrap();
        let sink = MockSink::new(usize::MAX);
        let stats = Arc::new(SubscriberStats::new());
        let config = BatchConfig {
            max_retries: 2,
            ..config(10)
        };
        let spool = DeadLetterSpool::open(temp_dir.path()).unwrap();
        let buffer = BatchBuffer::new(&config, sink, Some(spool), Arc::clone(&stats));

        buffer.append(tick());
        assert_eq!(buffer.flush().pending, 1);
        let report = buffer.flush();
        assert_eq!(report.dead_lettered_rows, 1);
        assert_eq!(report.pending, 0);

        let mut letters = Vec::new();
        dead_letter::replay(temp_dir.path(), |letter| {
            letters.push(letter);
            Ok(())
        })
        .unwrap();
        assert_eq!(letters.len(), 1);
        match &letters[0] {
            DeadLetter::Ticks { attempts, ticks, .. } => {
                assert_eq!(*attempts, 2);
                assert_eq!(ticks.len(), 1);
            }
            other => panic!("unexpected letter {:?}", other),
        }
        assert_eq!(stats.snapshot().dead_lettered_batches, 1);
    }

    #[test]
    fn test_pending_limit_evicts_oldest() {
        let sink = MockSink::new(usize::MAX);
        let config = BatchConfig {
            max_retries: 10,
            pending_limit: 1,
            ..config(10)
        };
        let (buffer, stats) = buffer(&config, sink);

        buffer.append(tick());
        buffer.flush();
        buffer.append(tick());
        buffer.append(tick());
        let report = buffer.flush();

        assert_eq!(report.pending, 1);
        assert_eq!(report.dead_lettered_rows, 1);
        // No spool configured, so the evicted rows are lost
        assert_eq!(stats.snapshot().rows_lost, 1);
    }

    #[test]
    fn test_partial_success_is_not_a_failure() {
        let sink = MockSink::storing_at_most(0, 3);
        let (buffer, stats) = buffer(&config(5), sink);

        for _ in 0..5 {
            buffer.append(tick());
        }

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.persisted, 3);
        assert_eq!(snapshot.persist_failures, 0);
        assert_eq!(buffer.pending_batches(), 0);
    }
}
