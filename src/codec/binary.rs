//! Versioned binary market tick payload (`MARKET_DATA_PROTOBUF`)
//!
//! Layout: `version:u8 | body_len:u32 | body`. Integers and floats are
//! big-endian; strings are `u16` length followed by UTF-8 bytes; timestamps
//! are nanoseconds since the Unix epoch as `i64`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};

use super::{CodecError, MAX_PAYLOAD_BYTES};
use crate::models::{MarketSnapshot, PriceLevel, Tick, DEPTH_LEVELS};

pub const SCHEMA_VERSION: u8 = 1;

/// Version byte plus body length
const HEADER_LEN: usize = 5;

/// Fields decoded from a binary payload
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryTick {
    pub snapshot: MarketSnapshot,
    /// Producer receipt time
    pub local_timestamp: DateTime<Utc>,
    /// When the distribution loop serialized the tick
    pub sent_at: DateTime<Utc>,
}

pub fn encode(tick: &Tick, sent_at: DateTime<Utc>) -> Result<Bytes, CodecError> {
    let snapshot = tick.snapshot();
    let mut body = BytesMut::with_capacity(512);

    put_str(&mut body, "TradingDay", &snapshot.trading_day)?;
    put_str(&mut body, "InstrumentID", &snapshot.instrument_id)?;
    put_str(&mut body, "ExchangeID", &snapshot.exchange_id)?;
    put_str(&mut body, "ExchangeInstID", &snapshot.exchange_inst_id)?;
    body.put_f64(snapshot.last_price);
    body.put_f64(snapshot.pre_settlement_price);
    body.put_f64(snapshot.pre_close_price);
    body.put_f64(snapshot.pre_open_interest);
    body.put_f64(snapshot.open_price);
    body.put_f64(snapshot.highest_price);
    body.put_f64(snapshot.lowest_price);
    body.put_i32(snapshot.volume);
    body.put_f64(snapshot.turnover);
    body.put_f64(snapshot.open_interest);
    body.put_f64(snapshot.close_price);
    body.put_f64(snapshot.settlement_price);
    body.put_f64(snapshot.upper_limit_price);
    body.put_f64(snapshot.lower_limit_price);
    body.put_f64(snapshot.pre_delta);
    body.put_f64(snapshot.curr_delta);
    put_str(&mut body, "UpdateTime", &snapshot.update_time)?;
    body.put_i32(snapshot.update_millisec);
    for level in &snapshot.levels {
        body.put_f64(level.bid_price);
        body.put_i32(level.bid_volume);
        body.put_f64(level.ask_price);
        body.put_i32(level.ask_volume);
    }
    body.put_f64(snapshot.average_price);
    put_str(&mut body, "ActionDay", &snapshot.action_day)?;
    body.put_i64(nanos(tick.received_at()));
    body.put_i64(nanos(sent_at));

    let mut buf = BytesMut::with_capacity(HEADER_LEN + body.len());
    buf.put_u8(SCHEMA_VERSION);
    buf.put_u32(body.len() as u32);
    buf.extend_from_slice(&body);

    Ok(buf.freeze())
}

pub fn decode(payload: &[u8]) -> Result<BinaryTick, CodecError> {
    if payload.len() > MAX_PAYLOAD_BYTES {
        return Err(CodecError::PayloadTooLarge {
            size: payload.len(),
            limit: MAX_PAYLOAD_BYTES,
        });
    }

    let mut buf = payload;
    ensure(buf, HEADER_LEN, "header")?;

    let version = buf.get_u8();
    if version != SCHEMA_VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }

    let body_len = buf.get_u32() as usize;
    if buf.remaining() < body_len {
        return Err(CodecError::Truncated { field: "body" });
    }
    if buf.remaining() > body_len {
        return Err(CodecError::TrailingBytes(buf.remaining() - body_len));
    }

    let trading_day = get_str(&mut buf, "TradingDay")?;
    let instrument_id = get_str(&mut buf, "InstrumentID")?;
    let exchange_id = get_str(&mut buf, "ExchangeID")?;
    let exchange_inst_id = get_str(&mut buf, "ExchangeInstID")?;

    // LastPrice through LowestPrice: 7 doubles, then Volume
    ensure(buf, 7 * 8 + 4, "prices")?;
    let last_price = buf.get_f64();
    let pre_settlement_price = buf.get_f64();
    let pre_close_price = buf.get_f64();
    let pre_open_interest = buf.get_f64();
    let open_price = buf.get_f64();
    let highest_price = buf.get_f64();
    let lowest_price = buf.get_f64();
    let volume = buf.get_i32();

    ensure(buf, 8 * 8, "session statistics")?;
    let turnover = buf.get_f64();
    let open_interest = buf.get_f64();
    let close_price = buf.get_f64();
    let settlement_price = buf.get_f64();
    let upper_limit_price = buf.get_f64();
    let lower_limit_price = buf.get_f64();
    let pre_delta = buf.get_f64();
    let curr_delta = buf.get_f64();

    let update_time = get_str(&mut buf, "UpdateTime")?;
    ensure(buf, 4 + DEPTH_LEVELS * 24 + 8, "depth")?;
    let update_millisec = buf.get_i32();

    let mut levels = [PriceLevel::default(); DEPTH_LEVELS];
    for level in levels.iter_mut() {
        level.bid_price = buf.get_f64();
        level.bid_volume = buf.get_i32();
        level.ask_price = buf.get_f64();
        level.ask_volume = buf.get_i32();
    }
    let average_price = buf.get_f64();

    let action_day = get_str(&mut buf, "ActionDay")?;
    ensure(buf, 16, "timestamps")?;
    let local_timestamp = DateTime::from_timestamp_nanos(buf.get_i64());
    let sent_at = DateTime::from_timestamp_nanos(buf.get_i64());

    if buf.has_remaining() {
        return Err(CodecError::TrailingBytes(buf.remaining()));
    }

    Ok(BinaryTick {
        snapshot: MarketSnapshot {
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
        },
        local_timestamp,
        sent_at,
    })
}

fn nanos(at: DateTime<Utc>) -> i64 {
    at.timestamp_nanos_opt().unwrap_or(0)
}

fn ensure(buf: &[u8], needed: usize, field: &'static str) -> Result<(), CodecError> {
    if buf.len() < needed {
        return Err(CodecError::Truncated { field });
    }
    Ok(())
}

fn put_str(buf: &mut BytesMut, field: &'static str, value: &str) -> Result<(), CodecError> {
    let len = u16::try_from(value.len()).map_err(|_| CodecError::FieldTooLong { field })?;
    buf.put_u16(len);
    buf.put_slice(value.as_bytes());
    Ok(())
}

fn get_str(buf: &mut &[u8], field: &'static str) -> Result<String, CodecError> {
    ensure(*buf, 2, field)?;
    let len = buf.get_u16() as usize;
    ensure(*buf, len, field)?;

    let value = std::str::from_utf8(&buf[..len])
        .map_err(|_| CodecError::InvalidUtf8 { field })?
        .to_string();
    buf.advance(len);
    Ok(value)
}
