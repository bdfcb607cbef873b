//! Publisher-side pipeline: vendor callback → ingestion queue → distribution
//! loop → transport, with the overflow queue absorbing failed and excess ticks

pub mod context;
pub mod distributor;
pub mod ingress;
pub mod stats;

use thiserror::Error;

pub use context::{IngestReceiver, PipelineContext};
pub use distributor::{DistributionLoop, IterationOutcome, LoopExit};
pub use ingress::{EnqueueOutcome, TickIngress};
pub use stats::{PipelineStats, PipelineStatsSnapshot};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Failed to create latency histogram: {0}")]
    Histogram(#[from] hdrhistogram::CreationError),

    #[error("Failed to spawn distribution loop: {0}")]
    Spawn(std::io::Error),
}
