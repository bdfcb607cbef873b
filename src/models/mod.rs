pub mod envelope;
pub mod tick;

pub use envelope::{Envelope, MessageType};
pub use tick::{MarketSnapshot, ParsedTick, PriceLevel, Tick, WireFormat, DEPTH_LEVELS};
