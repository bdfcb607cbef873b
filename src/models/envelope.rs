use bytes::Bytes;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Closed set of message types carried on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum MessageType {
    /// Legacy 44-field delimited market tick
    MarketData,
    /// Versioned binary market tick
    MarketDataBinary,
    InstrumentBatch,
    InvestorPositionBatch,
    InvestorPositionCsv,
    TradingAccount,
    TradingAccountCsv,
}

impl MessageType {
    pub const ALL: [MessageType; 7] = [
        MessageType::MarketData,
        MessageType::MarketDataBinary,
        MessageType::InstrumentBatch,
        MessageType::InvestorPositionBatch,
        MessageType::InvestorPositionCsv,
        MessageType::TradingAccount,
        MessageType::TradingAccountCsv,
    ];

    /// Type tag sent in the first frame
    pub fn tag(&self) -> &'static str {
        match self {
            MessageType::MarketData => "MARKET_DATA",
            MessageType::MarketDataBinary => "MARKET_DATA_PROTOBUF",
            MessageType::InstrumentBatch => "CTP_INSTRUMENT_BATCH_UPDATE",
            MessageType::InvestorPositionBatch => "CTP_INVESTOR_POSITION_BATCH_UPDATE",
            MessageType::InvestorPositionCsv => "CTP_INVESTOR_POSITION_CSV_UPDATE",
            MessageType::TradingAccount => "CTP_TRADING_ACCOUNT_UPDATE",
            MessageType::TradingAccountCsv => "CTP_TRADING_ACCOUNT_CSV_UPDATE",
        }
    }

    /// Exact, case-sensitive tag lookup
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.tag() == tag)
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// Two-frame unit exchanged over the transport: type tag + payload
///
/// The tag is kept as received so unknown tags can be logged before being
/// discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    type_tag: String,
    payload: Bytes,
}

impl Envelope {
    pub fn new(message_type: MessageType, payload: impl Into<Bytes>) -> Self {
        Self {
            type_tag: message_type.tag().to_string(),
            payload: payload.into(),
        }
    }

    /// Build from raw frames as they came off the wire
    pub fn from_frames(type_tag: String, payload: Bytes) -> Self {
        Self { type_tag, payload }
    }

    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_tag(&self.type_tag)
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_parts(self) -> (String, Bytes) {
        (self.type_tag, self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_tag_resolves_to_itself() {
        for message_type in MessageType::ALL {
            assert_eq!(MessageType::from_tag(message_type.tag()), Some(message_type));
        }
    }

    #[test]
    fn test_tag_match_is_exact() {
        assert_eq!(MessageType::from_tag("market_data"), None);
        assert_eq!(MessageType::from_tag("MARKET_DATA "), None);
        assert_eq!(MessageType::from_tag("TICK"), None);
    }

    #[test]
    fn test_envelope_keeps_unknown_tag() {
        let envelope = Envelope::from_frames("HEARTBEAT".to_string(), Bytes::from_static(b"x"));
        assert_eq!(envelope.type_tag(), "HEARTBEAT");
        assert!(envelope.message_type().is_none());
    }
}
