//! Monitoring HTTP API shared by the relay and recorder binaries

pub mod handlers;
pub mod monitor;
pub mod openapi;
pub mod responses;
pub mod routes;

pub use handlers::ApiState;
pub use monitor::{RecorderMonitor, RelayMonitor, StatsSource};
pub use routes::{create_router, serve};
