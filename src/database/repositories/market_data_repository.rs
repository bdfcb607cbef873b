use diesel::prelude::*;
use std::sync::Arc;

use crate::database::connection::{DatabaseError, PgPooledConnection};
use crate::database::models::NewMarketData;
use crate::database::schema::market_data;
use crate::models::ParsedTick;
use crate::subscriber::{PersistError, TickSink};

/// Rows per INSERT; 47 bind parameters each keeps a chunk well under the
/// PostgreSQL limit of 65535
pub const INSERT_CHUNK_SIZE: usize = 500;

/// Diesel-backed tick sink for the `market_data` hypertable
pub struct MarketDataRepository {
    get_conn: Arc<dyn Fn() -> Result<PgPooledConnection, DatabaseError> + Send + Sync>,
}

impl MarketDataRepository {
    /// Create new repository with connection provider
    pub fn new<F>(get_conn: F) -> Self
    where
        F: Fn() -> Result<PgPooledConnection, DatabaseError> + Send + Sync + 'static,
    {
        Self {
            get_conn: Arc::new(get_conn),
        }
    }
}

impl TickSink for MarketDataRepository {
    /// Inserts chunk by chunk with ON CONFLICT DO NOTHING. A failing chunk is
    /// logged and skipped. The call fails if no connection is available, or
    /// if a chunk failed and no row at all was inserted.
    fn insert_batch(&self, ticks: &[ParsedTick]) -> Result<usize, PersistError> {
        if ticks.is_empty() {
            return Ok(0);
        }

        let mut conn = (self.get_conn)()?;
        let mut inserted = 0;
        let mut failed_chunks = 0;

        for chunk in ticks.chunks(INSERT_CHUNK_SIZE) {
            let rows: Vec<NewMarketData> = chunk.iter().map(NewMarketData::from).collect();

            match diesel::insert_into(market_data::table)
                .values(&rows)
                .on_conflict_do_nothing()
                .execute(&mut conn)
            {
                Ok(n) => inserted += n,
                Err(e) => {
                    failed_chunks += 1;
                    tracing::error!(rows = rows.len(), error = %e, "❌ market_data chunk insert failed, skipping");
                }
            }
        }

        let inserted = chunk_outcome(inserted, failed_chunks)?;
        tracing::debug!(
            "Batch inserted {} ticks (attempted {})",
            inserted,
            ticks.len()
        );
        Ok(inserted)
    }
}

/// Partial success counts; only a batch where nothing landed is an error
fn chunk_outcome(inserted: usize, failed_chunks: usize) -> Result<usize, PersistError> {
    if failed_chunks > 0 && inserted == 0 {
        return Err(PersistError::Rejected(format!(
            "all {} chunks failed",
            failed_chunks
        )));
    }
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::fixtures::populated_snapshot;
    use crate::database::connection::establish_connection_pool;
    use crate::models::WireFormat;

    #[test]
    fn test_unavailable_connection_fails_the_batch() {
        let repository = MarketDataRepository::new(|| {
            Err(DatabaseError::ConnectionPoolError("timed out".to_string()))
        });
        let ticks = vec![ParsedTick::new(populated_snapshot(), None, WireFormat::Legacy)];

        assert!(matches!(
            repository.insert_batch(&ticks),
            Err(PersistError::Database(DatabaseError::ConnectionPoolError(_)))
        ));
        // Empty batches never ask for a connection
        assert_eq!(repository.insert_batch(&[]).unwrap(), 0);
    }

    #[test]
    fn test_chunk_outcome() {
        assert_eq!(chunk_outcome(1_000, 0).unwrap(), 1_000);
        // Some chunks failed but rows landed
        assert_eq!(chunk_outcome(500, 1).unwrap(), 500);
        // Every row already present
        assert_eq!(chunk_outcome(0, 0).unwrap(), 0);
        assert!(matches!(chunk_outcome(0, 2), Err(PersistError::Rejected(_))));
    }

    #[test]
    #[ignore]
    fn test_insert_batch_against_database() {
        let url = std::env::var("TIMESCALEDB_URL").expect("TIMESCALEDB_URL not set");
        let database = establish_connection_pool(&url, 2).unwrap();
        database.run_migrations().unwrap();

        let repository = MarketDataRepository::new(move || database.get_conn());
        let ticks: Vec<_> = (0..3)
            .map(|_| ParsedTick::new(populated_snapshot(), None, WireFormat::Binary))
            .collect();

        assert_eq!(repository.insert_batch(&ticks).unwrap(), 3);
    }
}
