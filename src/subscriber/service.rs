use chrono::Utc;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::batch_buffer::{BatchBuffer, FlushReport};
use super::dispatcher::{DispatchOutcome, Dispatcher};
use super::sink::RecordSink;
use super::stats::SubscriberStats;
use super::SubscriberError;
use crate::codec::{RecordBatch, RecordKind};
use crate::persistence::DeadLetter;
use crate::transport::{CloseHandle, Subscriber, TransportError};

/// Stop flag the worker threads can sleep on
#[derive(Default)]
struct ShutdownSignal {
    stopped: Mutex<bool>,
    changed: Condvar,
}

impl ShutdownSignal {
    fn trigger(&self) {
        *self.stopped.lock() = true;
        self.changed.notify_all();
    }

    fn is_triggered(&self) -> bool {
        *self.stopped.lock()
    }

    /// Sleep up to `timeout`; returns true if shutdown was requested
    fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut stopped = self.stopped.lock();
        while !*stopped {
            if self.changed.wait_until(&mut stopped, deadline).timed_out() {
                break;
            }
        }
        *stopped
    }
}

/// Subscriber process: a receive thread feeding the batch buffer and a
/// timer thread driving time-based flushes
pub struct RecorderService {
    buffer: Arc<BatchBuffer>,
    stats: Arc<SubscriberStats>,
    shutdown: Arc<ShutdownSignal>,
    close: CloseHandle,
    receiver: Option<JoinHandle<()>>,
    timer: Option<JoinHandle<()>>,
}

impl RecorderService {
    pub fn start(
        subscriber: Box<dyn Subscriber>,
        buffer: Arc<BatchBuffer>,
        records: Arc<dyn RecordSink>,
        stats: Arc<SubscriberStats>,
    ) -> Result<Self, SubscriberError> {
        let shutdown = Arc::new(ShutdownSignal::default());
        let close = subscriber.close_handle();

        let receive_loop = ReceiveLoop {
            subscriber,
            dispatcher: Dispatcher::new(Arc::clone(&stats)),
            buffer: Arc::clone(&buffer),
            records,
            stats: Arc::clone(&stats),
            shutdown: Arc::clone(&shutdown),
        };
        let receiver = std::thread::Builder::new()
            .name("subscriber-recv".to_string())
            .spawn(move || receive_loop.run())?;

        let timer = {
            let buffer = Arc::clone(&buffer);
            let shutdown = Arc::clone(&shutdown);
            std::thread::Builder::new()
                .name("flush-timer".to_string())
                .spawn(move || run_flush_timer(buffer, shutdown))
        };
        let timer = match timer {
            Ok(handle) => handle,
            Err(e) => {
                shutdown.trigger();
                close.close();
                let _ = receiver.join();
                return Err(e.into());
            }
        };

        tracing::info!(
            capacity = buffer.capacity(),
            interval_secs = buffer.interval().as_secs(),
            "🚀 Recorder service started"
        );

        Ok(Self {
            buffer,
            stats,
            shutdown,
            close,
            receiver: Some(receiver),
            timer: Some(timer),
        })
    }

    pub fn stats(&self) -> &Arc<SubscriberStats> {
        &self.stats
    }

    /// Stop both threads, then flush whatever is left
    pub fn stop(&mut self) -> FlushReport {
        self.shutdown.trigger();
        self.close.close();

        for (name, handle) in [("receive", self.receiver.take()), ("timer", self.timer.take())] {
            if let Some(handle) = handle {
                if handle.join().is_err() {
                    tracing::error!(thread = name, "❌ Recorder thread panicked");
                }
            }
        }

        let report = self.buffer.flush();
        tracing::info!(
            flushed = report.batch_size,
            persisted = report.persisted,
            pending = report.pending,
            "🛑 Recorder service stopped"
        );
        report
    }
}

impl Drop for RecorderService {
    fn drop(&mut self) {
        if self.receiver.is_some() || self.timer.is_some() {
            self.stop();
        }
    }
}

struct ReceiveLoop {
    subscriber: Box<dyn Subscriber>,
    dispatcher: Dispatcher,
    buffer: Arc<BatchBuffer>,
    records: Arc<dyn RecordSink>,
    stats: Arc<SubscriberStats>,
    shutdown: Arc<ShutdownSignal>,
}

impl ReceiveLoop {
    fn run(mut self) {
        loop {
            match self.subscriber.recv() {
                Ok(Some(envelope)) => match self.dispatcher.dispatch(&envelope) {
                    DispatchOutcome::Tick(tick) => {
                        self.buffer.append(tick);
                    }
                    DispatchOutcome::Records { kind, batch } => self.store_records(kind, batch),
                    DispatchOutcome::UnknownTag(_) | DispatchOutcome::Discarded(_) => {}
                },
                Ok(None) => break,
                Err(TransportError::Closed) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Receive failed");
                    if self.shutdown.wait(Duration::from_millis(100)) {
                        break;
                    }
                }
            }
        }
        tracing::info!(
            shutdown_requested = self.shutdown.is_triggered(),
            "Receive loop exited"
        );
    }

    fn store_records(&self, kind: RecordKind, batch: RecordBatch) {
        if batch.rows.is_empty() {
            return;
        }
        match self.records.insert_records(kind, &batch.rows) {
            Ok(stored) => {
                self.stats.record_persisted(stored);
                tracing::debug!(kind = kind.as_str(), stored, "Reference rows stored");
            }
            Err(e) => {
                self.stats.record_persist_failure();
                tracing::error!(kind = kind.as_str(), rows = batch.rows.len(), error = %e, "❌ Failed to store reference rows");
                self.buffer.dead_letter(DeadLetter::Records {
                    failed_at: Utc::now(),
                    kind,
                    reason: e.to_string(),
                    rows: batch.rows,
                });
            }
        }
    }
}

fn run_flush_timer(buffer: Arc<BatchBuffer>, shutdown: Arc<ShutdownSignal>) {
    let period = buffer
        .interval()
        .min(Duration::from_secs(1))
        .max(Duration::from_millis(10));

    while !shutdown.wait(period) {
        if let Some(report) = buffer.flush_if_due(Instant::now()) {
            tracing::debug!(
                flushed = report.batch_size,
                persisted = report.persisted,
                pending = report.pending,
                "Timed flush complete"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::fixtures::populated_snapshot;
    use crate::codec::TickEncoder;
    use crate::config::BatchConfig;
    use crate::models::{Envelope, MessageType, ParsedTick, Tick, WireFormat};
    use crate::subscriber::sink::{PersistError, TickSink};
    use crate::transport::{memory, Publisher};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CapturingSink {
        ticks: Mutex<Vec<ParsedTick>>,
        record_rows: Arc<AtomicUsize>,
        fail_records: bool,
    }

    impl TickSink for CapturingSink {
        fn insert_batch(&self, ticks: &[ParsedTick]) -> Result<usize, PersistError> {
            self.ticks.lock().extend_from_slice(ticks);
            Ok(ticks.len())
        }
    }

    impl RecordSink for CapturingSink {
        fn insert_records(&self, _kind: RecordKind, rows: &[Vec<String>]) -> Result<usize, PersistError> {
            if self.fail_records {
                return Err(PersistError::Rejected("table missing".to_string()));
            }
            self.record_rows.fetch_add(rows.len(), Ordering::SeqCst);
            Ok(rows.len())
        }
    }

    fn start(
        sink: &Arc<CapturingSink>,
        subscriber: memory::MemorySubscriber,
        flush_interval_secs: u64,
    ) -> (RecorderService, Arc<SubscriberStats>) {
        let stats = Arc::new(SubscriberStats::new());
        let config = BatchConfig {
            capacity: 100,
            flush_interval_secs,
            ..Default::default()
        };
        let tick_sink: Arc<dyn TickSink> = sink.clone();
        let buffer = Arc::new(BatchBuffer::new(&config, tick_sink, None, Arc::clone(&stats)));
        let record_sink: Arc<dyn RecordSink> = sink.clone();
        let service =
            RecorderService::start(Box::new(subscriber), buffer, record_sink, Arc::clone(&stats)).unwrap();
        (service, stats)
    }

    fn wait_until(deadline: Duration, condition: impl Fn() -> bool) {
        let end = Instant::now() + deadline;
        while !condition() {
            assert!(Instant::now() < end, "condition not met in time");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_mixed_traffic_is_routed_and_flushed_on_stop() {
        let (publisher, subscriber) = memory::channel(64, Duration::from_millis(100));
        let sink = Arc::new(CapturingSink::default());
        let (mut service, stats) = start(&sink, subscriber, 3_600);

        let tick = Tick::new(populated_snapshot());
        publisher.send(TickEncoder::new(WireFormat::Legacy).encode(&tick).unwrap()).unwrap();
        publisher.send(TickEncoder::new(WireFormat::Binary).encode(&tick).unwrap()).unwrap();
        publisher
            .send(Envelope::from_frames("HEARTBEAT".to_string(), "ping".into()))
            .unwrap();
        publisher
            .send(Envelope::new(MessageType::MarketData, "not,enough,fields"))
            .unwrap();
        let instrument_row = vec!["x"; 30].join(",");
        publisher
            .send(Envelope::new(MessageType::InstrumentBatch, instrument_row))
            .unwrap();

        wait_until(Duration::from_secs(5), || stats.snapshot().envelopes_received == 5);
        // Interval is an hour, so nothing has been written yet
        assert!(sink.ticks.lock().is_empty());

        let report = service.stop();
        assert_eq!(report.batch_size, 2);

        let stored = sink.ticks.lock();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].format, WireFormat::Legacy);
        assert_eq!(stored[1].format, WireFormat::Binary);
        assert!(stored.iter().all(|t| t.snapshot == populated_snapshot()));

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.unknown_tags, 1);
        assert_eq!(snapshot.parse_failures, 1);
        assert_eq!(sink.record_rows.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_interrupts_blocked_receive() {
        let (_publisher, subscriber) = memory::channel(8, Duration::from_millis(10));
        let sink = Arc::new(CapturingSink::default());
        let (mut service, _stats) = start(&sink, subscriber, 30);

        let started = Instant::now();
        let report = service.stop();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(report.batch_size, 0);
    }

    #[test]
    fn test_timer_thread_flushes_when_interval_elapses() {
        let (publisher, subscriber) = memory::channel(8, Duration::from_millis(10));
        let sink = Arc::new(CapturingSink::default());
        let (mut service, _stats) = start(&sink, subscriber, 1);

        let tick = Tick::new(populated_snapshot());
        publisher.send(TickEncoder::new(WireFormat::Binary).encode(&tick).unwrap()).unwrap();

        wait_until(Duration::from_secs(5), || sink.ticks.lock().len() == 1);
        assert_eq!(service.stop().batch_size, 0);
    }

    #[test]
    fn test_failed_reference_rows_are_counted() {
        let (publisher, subscriber) = memory::channel(8, Duration::from_millis(10));
        let sink = Arc::new(CapturingSink {
            fail_records: true,
            ..Default::default()
        });
        let (mut service, stats) = start(&sink, subscriber, 30);

        let row = vec!["a"; 46].join(",");
        publisher
            .send(Envelope::new(MessageType::TradingAccount, row))
            .unwrap();
        drop(publisher);

        wait_until(Duration::from_secs(5), || stats.snapshot().persist_failures == 1);
        service.stop();
        // No spool configured in this test
        assert_eq!(stats.snapshot().rows_lost, 1);
    }
}
