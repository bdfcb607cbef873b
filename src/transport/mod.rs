//! Pub/sub transport for two-frame envelopes
//!
//! Publishers are called synchronously from the distribution loop thread and
//! must return within the configured send timeout. Subscribers block in
//! `recv` on a dedicated thread and can be closed from any other thread.

pub mod frame;
pub mod memory;
pub mod outbound;
pub mod tcp;

use std::sync::Arc;
use thiserror::Error;

use crate::config::{TransportConfig, TransportKind};
use crate::models::Envelope;
use crate::rabbitmq::{RabbitMQConfig, RabbitMQPublisher, RabbitMQSubscriber};

pub use frame::EnvelopeCodec;
pub use memory::{MemoryPublisher, MemorySubscriber};
pub use tcp::{TcpPublisher, TcpSubscriber};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Send timed out")]
    Timeout,

    #[error("Send queue at high-water mark")]
    QueueFull,

    #[error("Transport closed")]
    Closed,

    #[error("Failed to bind {endpoint}: {source}")]
    Bind {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Frame of {size} bytes exceeds limit of {limit}")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("Malformed frame: {0}")]
    Protocol(String),

    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Sending half of the transport
///
/// `send` never blocks longer than the configured send timeout and reports
/// backpressure as [`TransportError::Timeout`] or
/// [`TransportError::QueueFull`].
pub trait Publisher: Send {
    fn send(&self, envelope: Envelope) -> Result<()>;
}

/// Receiving half of the transport
pub trait Subscriber: Send {
    /// Block until the next envelope arrives; `Ok(None)` once closed
    fn recv(&mut self) -> Result<Option<Envelope>>;

    /// Handle that wakes a blocked `recv` and makes it return `Ok(None)`
    fn close_handle(&self) -> CloseHandle;
}

/// Cloneable trigger for closing a subscriber from another thread
#[derive(Clone)]
pub struct CloseHandle {
    close: Arc<dyn Fn() + Send + Sync>,
}

impl CloseHandle {
    pub fn new(close: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            close: Arc::new(close),
        }
    }

    pub fn close(&self) {
        (self.close)()
    }
}

impl std::fmt::Debug for CloseHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloseHandle").finish_non_exhaustive()
    }
}

/// Build the configured publisher. Any error here is fatal for the relay.
pub async fn connect_publisher(
    config: &TransportConfig,
    rabbitmq: &RabbitMQConfig,
) -> Result<Box<dyn Publisher>> {
    match config.kind {
        TransportKind::Tcp => Ok(Box::new(TcpPublisher::bind(config).await?)),
        TransportKind::RabbitMq => Ok(Box::new(RabbitMQPublisher::connect(rabbitmq, config).await?)),
    }
}

/// Build the configured subscriber
pub async fn connect_subscriber(
    config: &TransportConfig,
    rabbitmq: &RabbitMQConfig,
) -> Result<Box<dyn Subscriber>> {
    match config.kind {
        TransportKind::Tcp => Ok(Box::new(TcpSubscriber::connect(config)?)),
        TransportKind::RabbitMq => Ok(Box::new(RabbitMQSubscriber::connect(rabbitmq).await?)),
    }
}
