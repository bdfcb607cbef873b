/// Bounded queues between the vendor callback thread and the distribution loop
pub mod overflow;
pub mod ring_buffer;

pub use overflow::OverflowQueue;
pub use ring_buffer::{ring_buffer, RingConsumer, RingProducer};
