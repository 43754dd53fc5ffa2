use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode, Params, params};

use crate::{
    core::{
        clock::{Clock, SystemClock},
        event::{Event, EventData},
        store::EventStore,
    },
    error::{ForgeError, Result},
    sqlite::Database,
};

pub struct SqliteEventStore {
    db: Database,
    clock: Arc<dyn Clock>,
}

impl SqliteEventStore {
    pub fn new(db: Database) -> Self {
        Self::with_clock(db, Arc::new(SystemClock))
    }

    pub fn with_clock(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }
}

impl EventStore for SqliteEventStore {
    fn append(
        &self,
        realm_id: &str,
        stream_id: &str,
        expected_version: u64,
        events: &[EventData],
    ) -> Result<Vec<Event>> {
        let mut conn = self.db.lock();
        let tx = conn.transaction()?;

        let actual: i64 = tx.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM events WHERE realm_id = ?1 AND stream_id = ?2",
            params![realm_id, stream_id],
            |row| row.get(0),
        )?;
        let actual = actual as u64;
        if actual != expected_version {
            return Err(ForgeError::Concurrency {
                stream_id: stream_id.to_string(),
                expected: expected_version,
                actual,
            });
        }

        // one commit timestamp for the whole batch
        let timestamp = self.clock.now();
        let mut committed = Vec::with_capacity(events.len());

        for (offset, input) in events.iter().enumerate() {
            let version = expected_version + offset as u64 + 1;
            let data = serde_json::to_string(&input.data)?;
            let metadata = input
                .metadata
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;

            let inserted = tx.execute(
                "INSERT INTO events (realm_id, stream_id, version, event_type, data, metadata, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    realm_id,
                    stream_id,
                    version as i64,
                    input.event_type,
                    data,
                    metadata,
                    timestamp
                ],
            );
            if let Err(err) = inserted {
                return Err(translate_append_error(
                    err,
                    stream_id,
                    expected_version,
                ));
            }

            committed.push(Event {
                realm_id: realm_id.to_string(),
                stream_id: stream_id.to_string(),
                version,
                global_position: tx.last_insert_rowid(),
                event_type: input.event_type.clone(),
                data: input.data.clone(),
                metadata: input.metadata.clone(),
                timestamp,
            });
        }

        if let Err(err) = tx.commit() {
            return Err(translate_append_error(err, stream_id, expected_version));
        }
        Ok(committed)
    }

    fn read_stream(
        &self,
        realm_id: &str,
        stream_id: &str,
        from_version: u64,
    ) -> Result<Vec<Event>> {
        let conn = self.db.lock();
        query_events(
            &conn,
            "SELECT global_position, realm_id, stream_id, version, event_type, data, metadata, timestamp
             FROM events
             WHERE realm_id = ?1 AND stream_id = ?2 AND version >= ?3
             ORDER BY version ASC",
            params![realm_id, stream_id, from_version as i64],
        )
    }

    fn read_all(&self, realm_id: &str, from_global_position: i64) -> Result<Vec<Event>> {
        let conn = self.db.lock();
        query_events(
            &conn,
            "SELECT global_position, realm_id, stream_id, version, event_type, data, metadata, timestamp
             FROM events
             WHERE realm_id = ?1 AND global_position > ?2
             ORDER BY global_position ASC",
            params![realm_id, from_global_position],
        )
    }

    fn list_realm_ids(&self) -> Result<Vec<String>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare("SELECT DISTINCT realm_id FROM events ORDER BY realm_id")?;
        let realms = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(realms)
    }
}

/// Busy, locked, and unique-constraint failures during an append are
/// concurrency-class: another writer got there first.
fn translate_append_error(
    err: rusqlite::Error,
    stream_id: &str,
    expected_version: u64,
) -> ForgeError {
    if is_concurrency_class(&err) {
        ForgeError::Concurrency {
            stream_id: stream_id.to_string(),
            expected: expected_version,
            actual: expected_version,
        }
    } else {
        err.into()
    }
}

fn is_concurrency_class(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(failure, _) => matches!(
            failure.code,
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked | ErrorCode::ConstraintViolation
        ),
        _ => false,
    }
}

fn query_events<P: Params>(conn: &Connection, sql: &str, params: P) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, i64>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, String>(5)?,
            row.get::<_, Option<String>>(6)?,
            row.get::<_, DateTime<Utc>>(7)?,
        ))
    })?;

    let mut events = Vec::new();
    for row in rows {
        let (global_position, realm_id, stream_id, version, event_type, data, metadata, timestamp) =
            row?;
        events.push(Event {
            realm_id,
            stream_id,
            version: version as u64,
            global_position,
            event_type,
            data: serde_json::from_str(&data)?,
            metadata: metadata.as_deref().map(serde_json::from_str).transpose()?,
            timestamp,
        });
    }
    Ok(events)
}
