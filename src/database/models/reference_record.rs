use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::codec::RecordKind;

/// Leading fields that identify a row of each kind
fn key_fields(kind: RecordKind) -> usize {
    match kind {
        // InstrumentID
        RecordKind::Instrument => 1,
        // BrokerID, InvestorID, InstrumentID, HedgeFlag, PosiDirection, TradingDay
        RecordKind::InvestorPosition => 6,
        // BrokerID, AccountID
        RecordKind::TradingAccount => 2,
    }
}

/// Raw reference row, upserted by `(kind, record_key)`
#[derive(Debug, Clone, PartialEq, Insertable)]
#[diesel(table_name = crate::database::schema::reference_records)]
pub struct NewReferenceRecord {
    pub kind: String,
    pub record_key: String,
    pub fields: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl NewReferenceRecord {
    pub fn new(kind: RecordKind, fields: Vec<String>, updated_at: DateTime<Utc>) -> Self {
        let record_key = fields
            .iter()
            .take(key_fields(kind))
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("|");

        Self {
            kind: kind.as_str().to_string(),
            record_key,
            fields,
            updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_key_uses_leading_fields() {
        let fields: Vec<String> = ["9999", "acct01", "rb2510", "1", "2", "20250801", "10"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let position = NewReferenceRecord::new(RecordKind::InvestorPosition, fields.clone(), Utc::now());
        assert_eq!(position.record_key, "9999|acct01|rb2510|1|2|20250801");
        assert_eq!(position.kind, "investor_position");

        let account = NewReferenceRecord::new(RecordKind::TradingAccount, fields, Utc::now());
        assert_eq!(account.record_key, "9999|acct01");
    }
}
