use diesel::pg::PgConnection;
use diesel::r2d2::{self, ConnectionManager, Pool, PooledConnection};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use std::sync::Arc;
use thiserror::Error;

/// Type alias for PostgreSQL connection pool
pub type PgPool = Pool<ConnectionManager<PgConnection>>;

/// Type alias for pooled connection
pub type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Shared TimescaleDB pool handed to the repositories
#[derive(Clone)]
pub struct Database {
    pool: Arc<PgPool>,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn get_conn(&self) -> Result<PgPooledConnection, DatabaseError> {
        self.pool
            .get()
            .map_err(|e| DatabaseError::ConnectionPoolError(e.to_string()))
    }

    /// Apply any embedded migrations that have not run yet
    pub fn run_migrations(&self) -> Result<usize, DatabaseError> {
        let mut conn = self.get_conn()?;
        let applied = conn
            .run_pending_migrations(MIGRATIONS)
            .map_err(|e| DatabaseError::MigrationError(e.to_string()))?;

        for version in &applied {
            tracing::info!(%version, "Applied migration");
        }
        Ok(applied.len())
    }
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    ConnectionPoolError(String),

    #[error("Database query error: {0}")]
    QueryError(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Migration error: {0}")]
    MigrationError(String),

    #[error("Diesel error: {0}")]
    DieselError(#[from] diesel::result::Error),
}

/// Build the pool and make sure one connection can actually be opened
pub fn establish_connection_pool(url: &str, pool_size: u32) -> Result<Database, DatabaseError> {
    tracing::info!("Establishing database connection pool...");

    let manager = ConnectionManager::<PgConnection>::new(url);
    let pool = r2d2::Pool::builder()
        .max_size(pool_size.max(1))
        .build(manager)
        .map_err(|e| DatabaseError::ConnectionPoolError(e.to_string()))?;

    tracing::info!("Database pool created with max size: {}", pool_size);

    let _ = pool
        .get()
        .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

    tracing::info!("✅ Database connection successful");

    Ok(Database::new(pool))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_and_migrations() {
        // Requires a live TimescaleDB; skipped otherwise
        let Ok(url) = std::env::var("TIMESCALEDB_URL") else {
            return;
        };

        let database = establish_connection_pool(&url, 2).expect("Failed to create database pool");
        database.run_migrations().expect("Migrations failed");
        // Second run is a no-op
        assert_eq!(database.run_migrations().unwrap(), 0);
    }
}
