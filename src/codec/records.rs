//! Reference data payloads: newline-separated CSV rows
//!
//! Instruments, investor positions and trading accounts all arrive as text
//! batches. Rows are kept as raw trimmed fields; mapping them onto typed
//! columns happens downstream.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{CodecError, MAX_PAYLOAD_BYTES};
use crate::models::MessageType;

/// Lines beyond this are ignored
pub const MAX_LINES: usize = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum RecordKind {
    Instrument,
    InvestorPosition,
    TradingAccount,
}

impl RecordKind {
    /// Rows with fewer fields are skipped
    pub fn min_fields(&self) -> usize {
        match self {
            RecordKind::Instrument => 30,
            RecordKind::InvestorPosition => 49,
            RecordKind::TradingAccount => 46,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Instrument => "instrument",
            RecordKind::InvestorPosition => "investor_position",
            RecordKind::TradingAccount => "trading_account",
        }
    }

    /// Record kind carried by a message type, if it is a reference batch
    pub fn for_message(message_type: MessageType) -> Option<Self> {
        match message_type {
            MessageType::InstrumentBatch => Some(RecordKind::Instrument),
            MessageType::InvestorPositionBatch | MessageType::InvestorPositionCsv => {
                Some(RecordKind::InvestorPosition)
            }
            MessageType::TradingAccount | MessageType::TradingAccountCsv => {
                Some(RecordKind::TradingAccount)
            }
            MessageType::MarketData | MessageType::MarketDataBinary => None,
        }
    }
}

/// Rows accepted from one payload
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordBatch {
    pub rows: Vec<Vec<String>>,
    /// Non-empty lines with too few fields
    pub short_rows: usize,
    /// Lines past [`MAX_LINES`]
    pub truncated_lines: usize,
}

pub fn decode(kind: RecordKind, payload: &[u8]) -> Result<RecordBatch, CodecError> {
    if payload.len() > MAX_PAYLOAD_BYTES {
        return Err(CodecError::PayloadTooLarge {
            size: payload.len(),
            limit: MAX_PAYLOAD_BYTES,
        });
    }

    let text = std::str::from_utf8(payload).map_err(|_| CodecError::InvalidUtf8 { field: "payload" })?;

    let mut batch = RecordBatch::default();
    let min_fields = kind.min_fields();

    for (index, line) in text.lines().enumerate() {
        if index >= MAX_LINES {
            batch.truncated_lines += 1;
            continue;
        }

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let fields: Vec<String> = line
            .split(',')
            .map(|field| field.trim_matches(|c| c == ' ' || c == '\t' || c == '"').to_string())
            .collect();

        if fields.len() < min_fields {
            batch.short_rows += 1;
            tracing::debug!(
                kind = kind.as_str(),
                fields = fields.len(),
                min_fields,
                "Skipping short reference row"
            );
            continue;
        }

        batch.rows.push(fields);
    }

    Ok(batch)
}
