use std::sync::Arc;

use super::stats::SubscriberStats;
use crate::codec::{self, records, RecordBatch, RecordKind};
use crate::models::{Envelope, MessageType, ParsedTick};

/// What one envelope turned into
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Tick(ParsedTick),
    Records { kind: RecordKind, batch: RecordBatch },
    /// Tag outside the known set; envelope discarded
    UnknownTag(String),
    /// Payload did not decode under its tag's schema; envelope discarded
    Discarded(MessageType),
}

/// Routes envelopes to a decoder chosen by exact type tag
///
/// Payload bytes never influence which decoder runs.
pub struct Dispatcher {
    stats: Arc<SubscriberStats>,
}

impl Dispatcher {
    pub fn new(stats: Arc<SubscriberStats>) -> Self {
        Self { stats }
    }

    pub fn dispatch(&self, envelope: &Envelope) -> DispatchOutcome {
        self.stats.record_envelope();

        let Some(message_type) = envelope.message_type() else {
            self.stats.record_unknown_tag();
            tracing::warn!(tag = %envelope.type_tag(), "Unknown message type, envelope discarded");
            return DispatchOutcome::UnknownTag(envelope.type_tag().to_string());
        };

        match RecordKind::for_message(message_type) {
            Some(kind) => self.decode_records(message_type, kind, envelope),
            None => self.decode_tick(message_type, envelope),
        }
    }

    fn decode_tick(&self, message_type: MessageType, envelope: &Envelope) -> DispatchOutcome {
        match codec::decode_tick(message_type, envelope.payload()) {
            Ok(tick) => {
                self.stats.record_tick_parsed();
                tracing::trace!(instrument = %tick.instrument_id(), %message_type, "Tick decoded");
                DispatchOutcome::Tick(tick)
            }
            Err(e) => {
                self.stats.record_parse_failure();
                tracing::warn!(
                    %message_type,
                    bytes = envelope.payload().len(),
                    error = %e,
                    "Failed to parse market data, envelope discarded"
                );
                DispatchOutcome::Discarded(message_type)
            }
        }
    }

    fn decode_records(
        &self,
        message_type: MessageType,
        kind: RecordKind,
        envelope: &Envelope,
    ) -> DispatchOutcome {
        match records::decode(kind, envelope.payload()) {
            Ok(batch) => {
                self.stats.record_rows(batch.rows.len(), batch.short_rows);
                if batch.short_rows > 0 || batch.truncated_lines > 0 {
                    tracing::warn!(
                        kind = kind.as_str(),
                        accepted = batch.rows.len(),
                        short_rows = batch.short_rows,
                        truncated_lines = batch.truncated_lines,
                        "Reference batch partially accepted"
                    );
                }
                DispatchOutcome::Records { kind, batch }
            }
            Err(e) => {
                self.stats.record_parse_failure();
                tracing::warn!(%message_type, error = %e, "Failed to parse reference batch, envelope discarded");
                DispatchOutcome::Discarded(message_type)
            }
        }
    }
}
