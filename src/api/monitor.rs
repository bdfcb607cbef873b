use std::sync::Arc;

use super::responses::{RecorderStats, RelayStats, StatsResponse};
use crate::pipeline::PipelineContext;
use crate::source::{SessionState, SessionStateMachine};
use crate::subscriber::SubscriberStats;

/// What the monitoring API can ask a running process
pub trait StatsSource: Send + Sync {
    fn service_name(&self) -> &'static str;

    fn is_healthy(&self) -> bool;

    fn session_state(&self) -> Option<SessionState> {
        None
    }

    fn stats(&self) -> StatsResponse;
}

pub struct RelayMonitor {
    context: Arc<PipelineContext>,
    session: Arc<SessionStateMachine>,
}

impl RelayMonitor {
    pub fn new(context: Arc<PipelineContext>, session: Arc<SessionStateMachine>) -> Self {
        Self { context, session }
    }
}

impl StatsSource for RelayMonitor {
    fn service_name(&self) -> &'static str {
        "ctp-tick-relay"
    }

    fn is_healthy(&self) -> bool {
        !self.context.is_stopped() && self.session.state() == SessionState::Streaming
    }

    fn session_state(&self) -> Option<SessionState> {
        Some(self.session.state())
    }

    fn stats(&self) -> StatsResponse {
        StatsResponse::Relay(RelayStats {
            pipeline: self.context.snapshot(),
            send_latency: self.context.send_latency(),
            session_state: self.session.state(),
            cutoff: self.context.cutoff().map(|c| c.to_rfc3339()),
            stopped: self.context.is_stopped(),
        })
    }
}

pub struct RecorderMonitor {
    stats: Arc<SubscriberStats>,
}

impl RecorderMonitor {
    pub fn new(stats: Arc<SubscriberStats>) -> Self {
        Self { stats }
    }
}

impl StatsSource for RecorderMonitor {
    fn service_name(&self) -> &'static str {
        "tick-recorder"
    }

    /// Degraded while batches are waiting for a retry
    fn is_healthy(&self) -> bool {
        self.stats.snapshot().pending_batches == 0
    }

    fn stats(&self) -> StatsResponse {
        StatsResponse::Recorder(RecorderStats {
            subscriber: self.stats.snapshot(),
        })
    }
}
