use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;
use utoipa::ToSchema;

/// Readiness of a vendor market data session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum SessionState {
    Disconnected,
    /// Front connected, login in flight
    Authenticating,
    LoggedIn,
    InstrumentsLoaded,
    /// Subscribe request sent, waiting for acknowledgement
    Subscribing,
    /// Ticks are flowing
    Streaming,
}

/// Vendor callbacks that move the session forward
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Connected,
    LoginSucceeded,
    InstrumentsLoaded,
    SubscribeRequested,
    SubscribeAcknowledged,
    /// Front disconnected or login rejected; legal from any state
    Disconnected,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Event {event:?} is not valid in state {from:?}")]
pub struct TransitionError {
    pub from: SessionState,
    pub event: SessionEvent,
}

impl SessionState {
    /// Next state for `event`, or `None` if the event is out of order
    pub fn on(self, event: SessionEvent) -> Option<SessionState> {
        use SessionEvent as E;
        use SessionState as S;

        match (self, event) {
            (_, E::Disconnected) => Some(S::Disconnected),
            (S::Disconnected, E::Connected) => Some(S::Authenticating),
            (S::Authenticating, E::LoginSucceeded) => Some(S::LoggedIn),
            (S::LoggedIn, E::InstrumentsLoaded) => Some(S::InstrumentsLoaded),
            (S::InstrumentsLoaded, E::SubscribeRequested) => Some(S::Subscribing),
            // Adding instruments to a live session
            (S::Streaming, E::SubscribeRequested) => Some(S::Subscribing),
            (S::Subscribing, E::SubscribeAcknowledged) => Some(S::Streaming),
            _ => None,
        }
    }
}

/// Thread-safe session state shared between the vendor callback thread and
/// whoever waits for readiness
pub struct SessionStateMachine {
    state: Mutex<SessionState>,
    changed: Condvar,
}

impl SessionStateMachine {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SessionState::Disconnected),
            changed: Condvar::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Apply a vendor event; out-of-order events leave the state untouched
    pub fn apply(&self, event: SessionEvent) -> Result<SessionState, TransitionError> {
        let mut state = self.state.lock();
        let from = *state;
        let to = from.on(event).ok_or(TransitionError { from, event })?;

        *state = to;
        drop(state);
        self.changed.notify_all();

        if from != to {
            tracing::info!(?from, ?to, ?event, "Session state changed");
        }
        Ok(to)
    }

    /// Block until the session reaches `target` or `timeout` elapses
    pub fn wait_for(&self, target: SessionState, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while *state != target {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                return *state == target;
            }
        }
        true
    }
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
