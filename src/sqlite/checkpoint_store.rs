use rusqlite::params;

use crate::{core::store::CheckpointStore, error::Result, sqlite::Database};

pub struct SqliteCheckpointStore {
    db: Database,
}

impl SqliteCheckpointStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl CheckpointStore for SqliteCheckpointStore {
    fn get_checkpoint(&self, realm_id: &str, projector_name: &str) -> Result<i64> {
        let conn = self.db.lock();
        let position = conn
            .query_row(
                "SELECT last_global_position FROM checkpoints
                 WHERE realm_id = ?1 AND projector_name = ?2",
                params![realm_id, projector_name],
                |row| row.get(0),
            )
            .or_else(|err| match err {
                rusqlite::Error::QueryReturnedNoRows => Ok(0),
                other => Err(other),
            })?;
        Ok(position)
    }

    fn set_checkpoint(
        &self,
        realm_id: &str,
        projector_name: &str,
        global_position: i64,
    ) -> Result<()> {
        let conn = self.db.lock();
        conn.execute(
            "INSERT OR REPLACE INTO checkpoints (realm_id, projector_name, last_global_position)
             VALUES (?1, ?2, ?3)",
            params![realm_id, projector_name, global_position],
        )?;
        Ok(())
    }
}
