//! Vendor boundary
//!
//! The pipeline only ever sees a [`MarketDataSource`] and hands it a
//! [`TickHandler`]. Vendor session details stay behind this trait.

pub mod session;
pub mod simulated;

use thiserror::Error;

use crate::models::MarketSnapshot;

pub use session::{SessionEvent, SessionState, SessionStateMachine, TransitionError};
pub use simulated::{SimulatedSource, SimulatorConfig};

/// Callback invoked on the vendor's thread for every tick
///
/// Must return quickly and must not panic across the vendor boundary.
pub type TickHandler = Box<dyn FnMut(MarketSnapshot) + Send + 'static>;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Session transition failed: {0}")]
    Transition(#[from] TransitionError),

    #[error("Session did not reach {expected:?} in time (state: {actual:?})")]
    NotReady {
        expected: SessionState,
        actual: SessionState,
    },

    #[error("A tick handler is already registered")]
    AlreadySubscribed,

    #[error("No instruments configured")]
    NoInstruments,

    #[error("Failed to start source thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Capability offered by a market data vendor adapter
pub trait MarketDataSource {
    /// Register the single tick handler and start streaming
    fn subscribe(&mut self, handler: TickHandler) -> Result<(), SourceError>;
}
