// Library crate root
//
// The relay binary (main.rs) and the recorder binary (bin/tick_recorder.rs)
// both build on the modules declared here.
pub mod api;
pub mod codec;
pub mod config;
pub mod database;
pub mod metrics;
pub mod models;
pub mod persistence;
pub mod pipeline;
pub mod queue;
pub mod rabbitmq;
pub mod source;
pub mod subscriber;
pub mod transport;

// pub use = re-export at crate root
pub use config::{RecorderConfig, RelayConfig};
pub use models::{Envelope, MarketSnapshot, MessageType, ParsedTick, Tick, WireFormat};
pub use pipeline::{DistributionLoop, PipelineContext, TickIngress};
pub use source::{MarketDataSource, TickHandler};
pub use subscriber::{BatchBuffer, RecorderService};
