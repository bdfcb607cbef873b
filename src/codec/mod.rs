//! Payload codecs for every message type on the wire
//!
//! The payload format is chosen by the envelope's type tag alone; payload
//! bytes are never inspected to guess their format.

pub mod binary;
pub mod legacy;
pub mod records;

use bytes::Bytes;
use chrono::Utc;
use thiserror::Error;

use crate::models::{Envelope, MessageType, ParsedTick, Tick, WireFormat};

pub use records::{RecordBatch, RecordKind};

/// Larger payloads are rejected before decoding
pub const MAX_PAYLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Expected {expected} fields, got {actual}")]
    FieldCount { expected: usize, actual: usize },

    #[error("Invalid number in {field}: {value:?}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("Payload truncated while reading {field}")]
    Truncated { field: &'static str },

    #[error("Unsupported schema version: {0}")]
    UnsupportedVersion(u8),

    #[error("Invalid UTF-8 in {field}")]
    InvalidUtf8 { field: &'static str },

    #[error("{0} trailing bytes after payload")]
    TrailingBytes(usize),

    #[error("Payload of {size} bytes exceeds limit of {limit}")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("Field {field} contains a delimiter")]
    DelimiterInField { field: &'static str },

    #[error("Field {field} has leading or trailing whitespace")]
    PaddedField { field: &'static str },

    #[error("Field {field} too long to encode")]
    FieldTooLong { field: &'static str },

    #[error("Message type {0} does not carry market ticks")]
    NotATick(MessageType),
}

pub type Result<T> = std::result::Result<T, CodecError>;

/// Serializes ticks for the distribution loop in one configured format
#[derive(Debug, Clone, Copy)]
pub struct TickEncoder {
    format: WireFormat,
}

impl TickEncoder {
    pub fn new(format: WireFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }

    pub fn message_type(&self) -> MessageType {
        match self.format {
            WireFormat::Legacy => MessageType::MarketData,
            WireFormat::Binary => MessageType::MarketDataBinary,
        }
    }

    pub fn encode(&self, tick: &Tick) -> Result<Envelope> {
        let payload = match self.format {
            WireFormat::Legacy => Bytes::from(legacy::encode(tick.snapshot())?),
            WireFormat::Binary => binary::encode(tick, Utc::now())?,
        };
        Ok(Envelope::new(self.message_type(), payload))
    }
}

/// Decode a market tick payload according to its message type
pub fn decode_tick(message_type: MessageType, payload: &[u8]) -> Result<ParsedTick> {
    match message_type {
        MessageType::MarketData => {
            let text = std::str::from_utf8(payload)
                .map_err(|_| CodecError::InvalidUtf8 { field: "payload" })?;
            Ok(ParsedTick::new(legacy::decode(text)?, None, WireFormat::Legacy))
        }
        MessageType::MarketDataBinary => {
            let decoded = binary::decode(payload)?;
            Ok(ParsedTick::new(
                decoded.snapshot,
                Some(decoded.local_timestamp),
                WireFormat::Binary,
            ))
        }
        other => Err(CodecError::NotATick(other)),
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::models::{MarketSnapshot, PriceLevel, DEPTH_LEVELS};

    /// Snapshot with every field set to a distinct non-default value
    pub(crate) fn populated_snapshot() -> MarketSnapshot {
        let mut levels = [PriceLevel::default(); DEPTH_LEVELS];
        for (i, level) in levels.iter_mut().enumerate() {
            let step = i as f64;
            level.bid_price = 3621.0 - step;
            level.bid_volume = 10 + i as i32;
            level.ask_price = 3622.0 + step;
            level.ask_volume = 20 + i as i32;
        }

        MarketSnapshot {
            trading_day: "20250801".to_string(),
            instrument_id: "rb2510".to_string(),
            exchange_id: "SHFE".to_string(),
            exchange_inst_id: "rb2510".to_string(),
            last_price: 3621.5,
            pre_settlement_price: 3600.0,
            pre_close_price: 3598.25,
            pre_open_interest: 1_523_400.0,
            open_price: 3605.0,
            highest_price: 3630.0,
            lowest_price: 3590.5,
            volume: 845_210,
            turnover: 30_612_345_678.9,
            open_interest: 1_530_012.0,
            close_price: 3620.0,
            settlement_price: 3615.75,
            upper_limit_price: 3888.0,
            lower_limit_price: 3312.0,
            pre_delta: 0.125,
            curr_delta: -0.5,
            update_time: "14:59:59".to_string(),
            update_millisec: 500,
            levels,
            average_price: 3617.333,
            action_day: "20250801".to_string(),
        }
    }
}
