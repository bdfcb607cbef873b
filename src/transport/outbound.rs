use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::SendTimeoutError, error::TrySendError};

use super::{Result, TransportError};
use crate::models::Envelope;

/// Bounded hand-off from the synchronous distribution loop to an async
/// transport task
///
/// Depth is the send high-water mark. When it is reached `send` waits at most
/// `send_timeout` for room, then fails.
#[derive(Debug, Clone)]
pub struct OutboundQueue {
    tx: mpsc::Sender<Envelope>,
    runtime: Handle,
    send_timeout: Duration,
}

impl OutboundQueue {
    /// Must be called from within a tokio runtime
    pub fn new(hwm: usize, send_timeout: Duration) -> (Self, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(hwm.max(1));
        let queue = Self {
            tx,
            runtime: Handle::current(),
            send_timeout,
        };
        (queue, rx)
    }

    /// Blocks the calling thread for at most the send timeout. Do not call
    /// from inside an async task.
    pub fn send(&self, envelope: Envelope) -> Result<()> {
        let envelope = match self.tx.try_send(envelope) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Closed(_)) => return Err(TransportError::Closed),
            Err(TrySendError::Full(envelope)) => envelope,
        };

        if self.send_timeout.is_zero() {
            return Err(TransportError::QueueFull);
        }

        self.runtime
            .block_on(self.tx.send_timeout(envelope, self.send_timeout))
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => TransportError::Timeout,
                SendTimeoutError::Closed(_) => TransportError::Closed,
            })
    }

    /// Envelopes accepted but not yet taken by the transport task
    pub fn depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}
