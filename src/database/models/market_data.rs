use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::models::ParsedTick;

/// One row of `market_data`, flattened from a parsed tick
#[derive(Debug, Clone, PartialEq, Insertable)]
#[diesel(table_name = crate::database::schema::market_data)]
pub struct NewMarketData {
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
    pub bid_price1: f64,
    pub bid_volume1: i32,
    pub ask_price1: f64,
    pub ask_volume1: i32,
    pub bid_price2: f64,
    pub bid_volume2: i32,
    pub ask_price2: f64,
    pub ask_volume2: i32,
    pub bid_price3: f64,
    pub bid_volume3: i32,
    pub ask_price3: f64,
    pub ask_volume3: i32,
    pub bid_price4: f64,
    pub bid_volume4: i32,
    pub ask_price4: f64,
    pub ask_volume4: i32,
    pub bid_price5: f64,
    pub bid_volume5: i32,
    pub ask_price5: f64,
    pub ask_volume5: i32,
    pub average_price: f64,
    pub action_day: String,
    pub local_timestamp: Option<DateTime<Utc>>,
    pub received_at: DateTime<Utc>,
    pub wire_format: String,
}

impl From<&ParsedTick> for NewMarketData {
    fn from(tick: &ParsedTick) -> Self {
        let s = &tick.snapshot;
        let [l1, l2, l3, l4, l5] = s.levels;

        Self {
            trading_day: s.trading_day.clone(),
            instrument_id: s.instrument_id.clone(),
            exchange_id: s.exchange_id.clone(),
            exchange_inst_id: s.exchange_inst_id.clone(),
            last_price: s.last_price,
            pre_settlement_price: s.pre_settlement_price,
            pre_close_price: s.pre_close_price,
            pre_open_interest: s.pre_open_interest,
            open_price: s.open_price,
            highest_price: s.highest_price,
            lowest_price: s.lowest_price,
            volume: s.volume,
            turnover: s.turnover,
            open_interest: s.open_interest,
            close_price: s.close_price,
            settlement_price: s.settlement_price,
            upper_limit_price: s.upper_limit_price,
            lower_limit_price: s.lower_limit_price,
            pre_delta: s.pre_delta,
            curr_delta: s.curr_delta,
            update_time: s.update_time.clone(),
            update_millisec: s.update_millisec,
            bid_price1: l1.bid_price,
            bid_volume1: l1.bid_volume,
            ask_price1: l1.ask_price,
            ask_volume1: l1.ask_volume,
            bid_price2: l2.bid_price,
            bid_volume2: l2.bid_volume,
            ask_price2: l2.ask_price,
            ask_volume2: l2.ask_volume,
            bid_price3: l3.bid_price,
            bid_volume3: l3.bid_volume,
            ask_price3: l3.ask_price,
            ask_volume3: l3.ask_volume,
            bid_price4: l4.bid_price,
            bid_volume4: l4.bid_volume,
            ask_price4: l4.ask_price,
            ask_volume4: l4.ask_volume,
            bid_price5: l5.bid_price,
            bid_volume5: l5.bid_volume,
            ask_price5: l5.ask_price,
            ask_volume5: l5.ask_volume,
            average_price: s.average_price,
            action_day: s.action_day.clone(),
            local_timestamp: tick.local_timestamp,
            received_at: tick.received_at,
            wire_format: tick.format.as_str().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::fixtures::populated_snapshot;
    use crate::models::WireFormat;

    #[test]
    fn test_levels_are_flattened_in_order() {
        let tick = ParsedTick::new(populated_snapshot(), None, WireFormat::Legacy);
        let row = NewMarketData::from(&tick);

        assert_eq!(row.bid_price1, tick.snapshot.levels[0].bid_price);
        assert_eq!(row.ask_volume5, tick.snapshot.levels[4].ask_volume);
        assert_eq!(row.instrument_id, "rb2510");
        assert_eq!(row.wire_format, "legacy");
        assert_eq!(row.local_timestamp, None);
        assert_eq!(row.received_at, tick.received_at);
    }
}
