use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of bid/ask depth levels carried by a snapshot
pub const DEPTH_LEVELS: usize = 5;

/// Format used when a receipt timestamp is rendered for humans
pub const LOCAL_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// One bid/ask depth level
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub bid_price: f64,
    pub bid_volume: i32,
    pub ask_price: f64,
    pub ask_volume: i32,
}

/// Depth market data snapshot as handed over by the vendor adapter
///
/// Field order matches the 44-field legacy wire layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub trading_day: String,
    pub instrument_id: String,
    pub exchange_id: String,
    pub exchange_inst_id: String,
    pub last_price: f64,
    pub pre_settlement_price: f64,
    pub pre_close_price: f64,
    pub pre_open_interest: f64,
    pub open_price: f64,
    pub highest_price: f64,
    pub lowest_price: f64,
    pub volume: i32,
    pub turnover: f64,
    pub open_interest: f64,
    pub close_price: f64,
    pub settlement_price: f64,
    pub upper_limit_price: f64,
    pub lower_limit_price: f64,
    pub pre_delta: f64,
    pub curr_delta: f64,
    pub update_time: String,
    pub update_millisec: i32,
    pub levels: [PriceLevel; DEPTH_LEVELS],
    pub average_price: f64,
    pub action_day: String,
}

impl MarketSnapshot {
    /// Best bid/ask level, if the snapshot carries one
    pub fn top_of_book(&self) -> &PriceLevel {
        &self.levels[0]
    }
}

/// A snapshot stamped with its local receipt time
///
/// Immutable once built: the ingestion path moves it between queues and the
/// distribution loop only ever reads it.
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    snapshot: MarketSnapshot,
    received_at: DateTime<Utc>,
}

impl Tick {
    /// Stamp a snapshot with the current wall clock
    pub fn new(snapshot: MarketSnapshot) -> Self {
        Self {
            snapshot,
            received_at: Utc::now(),
        }
    }

    /// Rebuild a tick with a known receipt time (replay, decoding)
    pub fn with_received_at(snapshot: MarketSnapshot, received_at: DateTime<Utc>) -> Self {
        Self {
            snapshot,
            received_at,
        }
    }

    pub fn snapshot(&self) -> &MarketSnapshot {
        &self.snapshot
    }

    pub fn instrument_id(&self) -> &str {
        &self.snapshot.instrument_id
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// Receipt time rendered as `YYYY-MM-DD HH:MM:SS.mmm` in local time
    pub fn local_timestamp(&self) -> String {
        self.received_at
            .with_timezone(&chrono::Local)
            .format(LOCAL_TIMESTAMP_FORMAT)
            .to_string()
    }

    pub fn into_snapshot(self) -> MarketSnapshot {
        self.snapshot
    }
}

/// Payload format a market tick arrived in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireFormat {
    /// 44-field comma separated text
    Legacy,
    /// Versioned length-prefixed binary schema
    Binary,
}

impl WireFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            WireFormat::Legacy => "legacy",
            WireFormat::Binary => "binary",
        }
    }
}

impl std::str::FromStr for WireFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "legacy" | "csv" => Ok(WireFormat::Legacy),
            "binary" | "protobuf" => Ok(WireFormat::Binary),
            other => Err(format!("unknown wire format: {}", other)),
        }
    }
}

/// A tick decoded on the subscriber side, ready for persistence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedTick {
    pub snapshot: MarketSnapshot,
    /// Producer receipt time; only the binary schema carries it
    pub local_timestamp: Option<DateTime<Utc>>,
    /// When the subscriber decoded the envelope
    pub received_at: DateTime<Utc>,
    pub format: WireFormat,
}

impl ParsedTick {
    pub fn new(
        snapshot: MarketSnapshot,
        local_timestamp: Option<DateTime<Utc>>,
        format: WireFormat,
    ) -> Self {
        Self {
            snapshot,
            local_timestamp,
            received_at: Utc::now(),
            format,
        }
    }

    pub fn instrument_id(&self) -> &str {
        &self.snapshot.instrument_id
    }
}
