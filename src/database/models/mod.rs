pub mod market_data;
pub mod reference_record;

pub use market_data::NewMarketData;
pub use reference_record::NewReferenceRecord;
