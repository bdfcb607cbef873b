//! TimescaleDB persistence for the recorder
//!
//! - Connection pooling through r2d2
//! - Embedded diesel migrations
//! - Repositories implementing the subscriber sink traits

pub mod connection;
pub mod models;
pub mod repositories;
pub mod schema;

pub use connection::{establish_connection_pool, Database, DatabaseError};
pub use repositories::{MarketDataRepository, ReferenceRepository};
