//! Subscriber side: receive, dispatch by tag, batch, persist

pub mod batch_buffer;
pub mod dispatcher;
pub mod service;
pub mod sink;
pub mod stats;

use thiserror::Error;

pub use batch_buffer::{BatchBuffer, FlushReport};
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use service::RecorderService;
pub use sink::{LogOnlySink, PersistError, RecordSink, TickSink};
pub use stats::{SubscriberStats, SubscriberStatsSnapshot};

#[derive(Error, Debug)]
pub enum SubscriberError {
    #[error("Failed to spawn recorder thread: {0}")]
    Spawn(#[from] std::io::Error),
}
