use chrono::Local;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use super::context::{IngestReceiver, PipelineContext};
use super::PipelineError;
use crate::codec::TickEncoder;
use crate::config::LoopConfig;
use crate::models::Tick;
use crate::transport::{Publisher, TransportError};

/// What one iteration of the loop did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IterationOutcome {
    /// Overflow ticks transmitted
    pub overflow_sent: usize,
    /// The overflow drain stopped on a failed send
    pub overflow_send_failed: bool,
    /// A tick was taken from the ingestion queue
    pub primary_dequeued: bool,
    pub primary_sent: bool,
}

impl IterationOutcome {
    /// Nothing fresh arrived and no backlog moved; the loop should back off
    pub fn is_idle(&self) -> bool {
        !self.primary_dequeued && self.overflow_sent == 0
    }
}

/// Why the loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    Stopped,
    CutoffReached,
}

enum SendResult {
    Sent,
    /// Transport refused the envelope; the tick is handed back for retry
    Failed(Tick),
    /// Could not be serialized; retrying would fail the same way
    Discarded,
}

/// Sole consumer of both queues and sole caller of the publisher
pub struct DistributionLoop {
    receiver: IngestReceiver,
    context: Arc<PipelineContext>,
    publisher: Box<dyn Publisher>,
    encoder: TickEncoder,
    config: LoopConfig,
}

impl DistributionLoop {
    pub fn new(
        receiver: IngestReceiver,
        context: Arc<PipelineContext>,
        publisher: Box<dyn Publisher>,
        config: LoopConfig,
    ) -> Self {
        Self {
            receiver,
            context,
            publisher,
            encoder: TickEncoder::new(config.wire_format),
            config,
        }
    }

    /// Run on a dedicated OS thread
    pub fn spawn(self) -> Result<JoinHandle<LoopExit>, PipelineError> {
        std::thread::Builder::new()
            .name("distribution-loop".to_string())
            .spawn(move || self.run())
            .map_err(PipelineError::Spawn)
    }

    /// Loop until the stop flag is raised or the session cutoff passes
    ///
    /// Both are checked once per iteration. Ticks still queued at exit are
    /// not drained.
    pub fn run(mut self) -> LoopExit {
        tracing::info!(
            wire_format = self.encoder.format().as_str(),
            overflow_drain_limit = self.config.overflow_drain_limit,
            cutoff = ?self.context.cutoff(),
            "🚀 Distribution loop started"
        );

        let idle_sleep = self.config.idle_sleep();
        let exit = loop {
            if self.context.is_stopped() {
                break LoopExit::Stopped;
            }
            if self.context.cutoff_reached(Local::now()) {
                break LoopExit::CutoffReached;
            }

            if self.run_once().is_idle() {
                std::thread::sleep(idle_sleep);
            }
        };

        let stats = self.context.snapshot();
        tracing::info!(
            ?exit,
            published = stats.published,
            dropped = stats.dropped,
            primary_left = self.receiver.len(),
            overflow_left = stats.overflow_depth,
            "🛑 Distribution loop exited"
        );
        exit
    }

    /// One iteration: drain overflow, then exactly one ingestion dequeue
    pub fn run_once(&mut self) -> IterationOutcome {
        let mut outcome = IterationOutcome::default();

        let limit = match self.config.overflow_drain_limit {
            0 => usize::MAX,
            limit => limit,
        };
        let mut attempts = 0;
        while attempts < limit {
            let Some(tick) = self.context.overflow().try_dequeue() else {
                break;
            };
            attempts += 1;

            match self.send_tick(tick) {
                SendResult::Sent => outcome.overflow_sent += 1,
                SendResult::Discarded => {}
                SendResult::Failed(tick) => {
                    // Transport is backed up; leave the rest for a later iteration
                    self.context.retry_via_overflow(tick);
                    outcome.overflow_send_failed = true;
                    break;
                }
            }
        }

        if let Some(tick) = self.receiver.try_dequeue() {
            outcome.primary_dequeued = true;
            match self.send_tick(tick) {
                SendResult::Sent => outcome.primary_sent = true,
                SendResult::Discarded => {}
                SendResult::Failed(tick) => {
                    self.context.retry_via_overflow(tick);
                }
            }
        }

        outcome
    }

    fn send_tick(&mut self, tick: Tick) -> SendResult {
        let stats = self.context.stats();

        let envelope = match self.encoder.encode(&tick) {
            Ok(envelope) => envelope,
            Err(e) => {
                stats.record_serialize_failure();
                tracing::warn!(
                    instrument = %tick.instrument_id(),
                    error = %e,
                    "⚠️  Failed to serialize tick, discarding"
                );
                return SendResult::Discarded;
            }
        };

        let started = Instant::now();
        let result = self.publisher.send(envelope);
        self.context.record_send_latency(started.elapsed());

        match result {
            Ok(()) => {
                let published = stats.record_published();
                if self.config.progress_every > 0 && published % self.config.progress_every == 0 {
                    tracing::info!(
                        published,
                        primary_depth = self.receiver.len(),
                        overflow_depth = self.context.overflow().len(),
                        dropped = stats.dropped(),
                        "📦 Distribution progress"
                    );
                }
                SendResult::Sent
            }
            Err(e) => {
                match e {
                    TransportError::Timeout => stats.record_publish_timeout(),
                    TransportError::QueueFull => stats.record_publish_queue_full(),
                    _ => stats.record_publish_error(),
                }
                tracing::debug!(
                    instrument = %tick.instrument_id(),
                    error = %e,
                    "Send failed, retrying via overflow"
                );
                SendResult::Failed(tick)
            }
        }
    }
}
