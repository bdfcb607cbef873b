//! Legacy comma-separated market tick payload (`MARKET_DATA`)
//!
//! Exactly 44 fields in vendor order. Older publishers prefix the fields
//! with a routing header such as `EL/CTP_TICKER/rb2510/T/1 || `; the decoder
//! strips it only when the text before `||` has that form. Text fields that
//! would not survive a round trip (delimiters, `||`, edge whitespace) are
//! refused by the encoder.

use super::CodecError;
use crate::models::{MarketSnapshot, PriceLevel, DEPTH_LEVELS};

pub const LEGACY_FIELD_COUNT: usize = 44;

/// Separator between the optional routing header and the fields
const HEADER_SEPARATOR: &str = "||";

/// Leading topic of a routing header
const HEADER_PREFIX: &str = "EL/CTP_TICKER/";

/// Column names in wire order, used in error messages
const FIELD_NAMES: [&str; LEGACY_FIELD_COUNT] = [
    "TradingDay",
    "InstrumentID",
    "ExchangeID",
    "ExchangeInstID",
    "LastPrice",
    "PreSettlementPrice",
    "PreClosePrice",
    "PreOpenInterest",
    "OpenPrice",
    "HighestPrice",
    "LowestPrice",
    "Volume",
    "Turnover",
    "OpenInterest",
    "ClosePrice",
    "SettlementPrice",
    "UpperLimitPrice",
    "LowerLimitPrice",
    "PreDelta",
    "CurrDelta",
    "UpdateTime",
    "UpdateMillisec",
    "BidPrice1",
    "BidVolume1",
    "AskPrice1",
    "AskVolume1",
    "BidPrice2",
    "BidVolume2",
    "AskPrice2",
    "AskVolume2",
    "BidPrice3",
    "BidVolume3",
    "AskPrice3",
    "AskVolume3",
    "BidPrice4",
    "BidVolume4",
    "AskPrice4",
    "AskVolume4",
    "BidPrice5",
    "BidVolume5",
    "AskPrice5",
    "AskVolume5",
    "AveragePrice",
    "ActionDay",
];

/// Render a snapshot as 44 comma-separated fields
pub fn encode(snapshot: &MarketSnapshot) -> Result<String, CodecError> {
    let mut fields: Vec<String> = Vec::with_capacity(LEGACY_FIELD_COUNT);

    fields.push(text_field(0, &snapshot.trading_day)?);
    fields.push(text_field(1, &snapshot.instrument_id)?);
    fields.push(text_field(2, &snapshot.exchange_id)?);
    fields.push(text_field(3, &snapshot.exchange_inst_id)?);
    for value in [
        snapshot.last_price,
        snapshot.pre_settlement_price,
        snapshot.pre_close_price,
        snapshot.pre_open_interest,
        snapshot.open_price,
        snapshot.highest_price,
        snapshot.lowest_price,
    ] {
        fields.push(value.to_string());
    }
    fields.push(snapshot.volume.to_string());
    for value in [
        snapshot.turnover,
        snapshot.open_interest,
        snapshot.close_price,
        snapshot.settlement_price,
        snapshot.upper_limit_price,
        snapshot.lower_limit_price,
        snapshot.pre_delta,
        snapshot.curr_delta,
    ] {
        fields.push(value.to_string());
    }
    fields.push(text_field(20, &snapshot.update_time)?);
    fields.push(snapshot.update_millisec.to_string());
    for level in &snapshot.levels {
        fields.push(level.bid_price.to_string());
        fields.push(level.bid_volume.to_string());
        fields.push(level.ask_price.to_string());
        fields.push(level.ask_volume.to_string());
    }
    fields.push(snapshot.average_price.to_string());
    fields.push(text_field(43, &snapshot.action_day)?);

    Ok(fields.join(","))
}

/// Parse a 44-field payload, with or without the routing header
pub fn decode(payload: &str) -> Result<MarketSnapshot, CodecError> {
    let body = strip_routing_header(payload).trim();

    let fields: Vec<&str> = body.split(',').collect();
    if fields.len() != LEGACY_FIELD_COUNT {
        return Err(CodecError::FieldCount {
            expected: LEGACY_FIELD_COUNT,
            actual: fields.len(),
        });
    }

    let mut cursor = FieldCursor::new(&fields);

    let trading_day = cursor.text();
    let instrument_id = cursor.text();
    let exchange_id = cursor.text();
    let exchange_inst_id = cursor.text();
    let last_price = cursor.price()?;
    let pre_settlement_price = cursor.price()?;
    let pre_close_price = cursor.price()?;
    let pre_open_interest = cursor.price()?;
    let open_price = cursor.price()?;
    let highest_price = cursor.price()?;
    let lowest_price = cursor.price()?;
    let volume = cursor.integer()?;
    let turnover = cursor.price()?;
    let open_interest = cursor.price()?;
    let close_price = cursor.price()?;
    let settlement_price = cursor.price()?;
    let upper_limit_price = cursor.price()?;
    let lower_limit_price = cursor.price()?;
    let pre_delta = cursor.price()?;
    let curr_delta = cursor.price()?;
    let update_time = cursor.text();
    let update_millisec = cursor.integer()?;

    let mut levels = [PriceLevel::default(); DEPTH_LEVELS];
    for level in levels.iter_mut() {
        level.bid_price = cursor.price()?;
        level.bid_volume = cursor.integer()?;
        level.ask_price = cursor.price()?;
        level.ask_volume = cursor.integer()?;
    }

    let average_price = cursor.price()?;
    let action_day = cursor.text();

    Ok(MarketSnapshot {
        trading_day,
        instrument_id,
        exchange_id,
        exchange_inst_id,
        last_price,
        pre_settlement_price,
        pre_close_price,
        pre_open_interest,
        open_price,
        highest_price,
        lowest_price,
        volume,
        turnover,
        open_interest,
        close_price,
        settlement_price,
        upper_limit_price,
        lower_limit_price,
        pre_delta,
        curr_delta,
        update_time,
        update_millisec,
        levels,
        average_price,
        action_day,
    })
}

fn strip_routing_header(payload: &str) -> &str {
    match payload.split_once(HEADER_SEPARATOR) {
        Some((header, body)) if is_routing_header(header) => body,
        _ => payload,
    }
}

fn is_routing_header(header: &str) -> bool {
    let header = header.trim();
    header.starts_with(HEADER_PREFIX) && !header.contains(',')
}

fn text_field(index: usize, value: &str) -> Result<String, CodecError> {
    let field = FIELD_NAMES[index];
    if value.contains([',', '\n', '\r']) || value.contains(HEADER_SEPARATOR) {
        return Err(CodecError::DelimiterInField { field });
    }
    // The decoder trims each field
    if value.trim() != value {
        return Err(CodecError::PaddedField { field });
    }
    Ok(value.to_string())
}

/// Walks the split fields in order, tracking the index for error reporting
struct FieldCursor<'a> {
    fields: &'a [&'a str],
    index: usize,
}

impl<'a> FieldCursor<'a> {
    fn new(fields: &'a [&'a str]) -> Self {
        Self { fields, index: 0 }
    }

    fn next_raw(&mut self) -> (&'static str, &'a str) {
        let name = FIELD_NAMES[self.index];
        let value = self.fields[self.index].trim();
        self.index += 1;
        (name, value)
    }

    fn text(&mut self) -> String {
        self.next_raw().1.to_string()
    }

    /// Empty and non-finite values read as 0; vendors use them for "unset"
    fn price(&mut self) -> Result<f64, CodecError> {
        let (field, raw) = self.next_raw();
        if raw.is_empty() {
            return Ok(0.0);
        }
        let value: f64 = raw.parse().map_err(|_| CodecError::InvalidNumber {
            field,
            value: raw.to_string(),
        })?;
        Ok(if value.is_finite() { value } else { 0.0 })
    }

    fn integer(&mut self) -> Result<i32, CodecError> {
        let (field, raw) = self.next_raw();
        if raw.is_empty() {
            return Ok(0);
        }
        raw.parse().map_err(|_| CodecError::InvalidNumber {
            field,
            value: raw.to_string(),
        })
    }
}
