//! Diesel implementations of the subscriber sinks

pub mod market_data_repository;
pub mod reference_repository;

pub use market_data_repository::MarketDataRepository;
pub use reference_repository::ReferenceRepository;
