use chrono::Utc;
use diesel::prelude::*;
use diesel::upsert::excluded;
use std::collections::HashMap;
use std::sync::Arc;

use super::market_data_repository::INSERT_CHUNK_SIZE;
use crate::codec::RecordKind;
use crate::database::connection::{DatabaseError, PgPooledConnection};
use crate::database::models::NewReferenceRecord;
use crate::database::schema::reference_records;
use crate::subscriber::{PersistError, RecordSink};

/// Stores instrument, position and account rows, keeping the latest version
/// of each record
pub struct ReferenceRepository {
    get_conn: Arc<dyn Fn() -> Result<PgPooledConnection, DatabaseError> + Send + Sync>,
}

impl ReferenceRepository {
    pub fn new<F>(get_conn: F) -> Self
    where
        F: Fn() -> Result<PgPooledConnection, DatabaseError> + Send + Sync + 'static,
    {
        Self {
            get_conn: Arc::new(get_conn),
        }
    }
}

/// Last row wins for duplicate keys; an upsert cannot touch one row twice
fn dedup_by_key(rows: Vec<NewReferenceRecord>) -> Vec<NewReferenceRecord> {
    let mut position: HashMap<String, usize> = HashMap::new();
    let mut unique: Vec<NewReferenceRecord> = Vec::with_capacity(rows.len());

    for row in rows {
        match position.get(&row.record_key) {
            Some(&i) => unique[i] = row,
            None => {
                position.insert(row.record_key.clone(), unique.len());
                unique.push(row);
            }
        }
    }
    unique
}

impl RecordSink for ReferenceRepository {
    fn insert_records(&self, kind: RecordKind, rows: &[Vec<String>]) -> Result<usize, PersistError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let now = Utc::now();
        let records = dedup_by_key(
            rows.iter()
                .map(|fields| NewReferenceRecord::new(kind, fields.clone(), now))
                .collect(),
        );

        let mut conn = (self.get_conn)()?;
        let mut stored = 0;

        for chunk in records.chunks(INSERT_CHUNK_SIZE) {
            let result = diesel::insert_into(reference_records::table)
                .values(chunk)
                .on_conflict((reference_records::kind, reference_records::record_key))
                .do_update()
                .set((
                    reference_records::fields.eq(excluded(reference_records::fields)),
                    reference_records::updated_at.eq(excluded(reference_records::updated_at)),
                ))
                .execute(&mut conn);

            match result {
                Ok(n) => stored += n,
                Err(e) => {
                    tracing::error!(kind = kind.as_str(), rows = chunk.len(), error = %e, "❌ Reference chunk upsert failed, skipping");
                }
            }
        }

        if stored == 0 {
            return Err(PersistError::Rejected(format!("no {} rows stored", kind.as_str())));
        }

        tracing::debug!(kind = kind.as_str(), stored, attempted = rows.len(), "Reference rows upserted");
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_keys_keep_last_row() {
        let now = Utc::now();
        let row = |id: &str, value: &str| {
            NewReferenceRecord::new(
                RecordKind::Instrument,
                vec![id.to_string(), value.to_string()],
                now,
            )
        };

        let unique = dedup_by_key(vec![row("rb2510", "old"), row("cu2509", "x"), row("rb2510", "new")]);

        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].fields[1], "new");
        assert_eq!(unique[1].record_key, "cu2509");
    }
}
