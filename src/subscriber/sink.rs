use thiserror::Error;

use crate::codec::RecordKind;
use crate::database::connection::DatabaseError;
use crate::models::ParsedTick;

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Batch rejected: {0}")]
    Rejected(String),
}

/// Destination for buffered market ticks
///
/// Returns how many rows were stored; fewer than `ticks.len()` is a partial
/// success, not an error.
pub trait TickSink: Send + Sync {
    fn insert_batch(&self, ticks: &[ParsedTick]) -> Result<usize, PersistError>;
}

/// Destination for reference-data rows
pub trait RecordSink: Send + Sync {
    fn insert_records(&self, kind: RecordKind, rows: &[Vec<String>]) -> Result<usize, PersistError>;
}

/// Sink used when no database is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct LogOnlySink;

impl TickSink for LogOnlySink {
    fn insert_batch(&self, ticks: &[ParsedTick]) -> Result<usize, PersistError> {
        if let (Some(first), Some(last)) = (ticks.first(), ticks.last()) {
            tracing::info!(
                count = ticks.len(),
                first = %first.instrument_id(),
                last = %last.instrument_id(),
                "📝 Batch received (no database configured)"
            );
        }
        Ok(ticks.len())
    }
}

impl RecordSink for LogOnlySink {
    fn insert_records(&self, kind: RecordKind, rows: &[Vec<String>]) -> Result<usize, PersistError> {
        tracing::info!(kind = kind.as_str(), count = rows.len(), "📝 Reference rows received (no database configured)");
        Ok(rows.len())
    }
}
