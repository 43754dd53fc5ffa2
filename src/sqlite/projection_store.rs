use rusqlite::params;
use serde_json::Value;

use crate::{
    core::store::ProjectionStore,
    error::{ForgeError, Result},
    sqlite::Database,
};

pub struct SqliteProjectionStore {
    db: Database,
}

impl SqliteProjectionStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl ProjectionStore for SqliteProjectionStore {
    fn get(&self, realm_id: &str, projection_name: &str, key: &str) -> Result<Value> {
        let conn = self.db.lock();
        let text: Option<String> = conn
            .query_row(
                "SELECT value FROM projections
                 WHERE realm_id = ?1 AND projection_name = ?2 AND key = ?3",
                params![realm_id, projection_name, key],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|err| match err {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        match text {
            Some(text) => Ok(serde_json::from_str(&text)?),
            None => Err(ForgeError::not_found(projection_name, key)),
        }
    }

    fn list(&self, realm_id: &str, projection_name: &str) -> Result<Vec<Value>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare(
            "SELECT value FROM projections WHERE realm_id = ?1 AND projection_name = ?2",
        )?;
        let rows = stmt.query_map(params![realm_id, projection_name], |row| {
            row.get::<_, String>(0)
        })?;

        let mut values = Vec::new();
        for row in rows {
            values.push(serde_json::from_str(&row?)?);
        }
        Ok(values)
    }

    fn put(&self, realm_id: &str, projection_name: &str, key: &str, value: &Value) -> Result<()> {
        let text = serde_json::to_string(value)?;
        let conn = self.db.lock();
        conn.execute(
            "INSERT OR REPLACE INTO projections (realm_id, projection_name, key, value)
             VALUES (?1, ?2, ?3, ?4)",
            params![realm_id, projection_name, key, text],
        )?;
        Ok(())
    }

    fn delete(&self, realm_id: &str, projection_name: &str, key: &str) -> Result<()> {
        let conn = self.db.lock();
        conn.execute(
            "DELETE FROM projections
             WHERE realm_id = ?1 AND projection_name = ?2 AND key = ?3",
            params![realm_id, projection_name, key],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    use super::*;
    use crate::{core::store::ProjectionStoreExt, sqlite::open_in_memory};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Widget {
        name: String,
        count: u32,
    }

    fn store() -> SqliteProjectionStore {
        SqliteProjectionStore::new(open_in_memory().unwrap())
    }

    #[test]
    fn put_get_round_trip() {
        let store = store();
        let widget = Widget {
            name: "anvil".into(),
            count: 3,
        };
        store.put_as("R1", "widgets", "anvil", &widget).unwrap();

        let loaded: Widget = store.get_as("R1", "widgets", "anvil").unwrap();
        assert_eq!(loaded, widget);
    }

    #[test]
    fn get_missing_key_names_projection_and_key() {
        let store = store();
        let err = store.get("R1", "widgets", "missing").unwrap_err();
        match err {
            ForgeError::NotFound { entity, id } => {
                assert_eq!(entity, "widgets");
                assert_eq!(id, "missing");
            }
            other => panic!("expected not-found, got {other}"),
        }
    }

    #[test]
    fn put_is_an_upsert() {
        let store = store();
        store.put("R1", "widgets", "anvil", &json!({"count": 1})).unwrap();
        store.put("R1", "widgets", "anvil", &json!({"count": 2})).unwrap();

        assert_eq!(store.get("R1", "widgets", "anvil").unwrap(), json!({"count": 2}));
        assert_eq!(store.list("R1", "widgets").unwrap().len(), 1);
    }

    #[test]
    fn list_is_scoped_to_realm_and_name() {
        let store = store();
        store.put("R1", "widgets", "a", &json!(1)).unwrap();
        store.put("R1", "widgets", "b", &json!(2)).unwrap();
        store.put("R1", "gadgets", "c", &json!(3)).unwrap();
        store.put("R2", "widgets", "d", &json!(4)).unwrap();

        let mut values: Vec<i64> = store
            .list("R1", "widgets")
            .unwrap()
            .iter()
            .map(|value| value.as_i64().unwrap())
            .collect();
        values.sort_unstable();
        assert_eq!(values, vec![1, 2]);
    }

    #[test]
    fn delete_is_idempotent() {
        let store = store();
        store.put("R1", "widgets", "a", &json!(1)).unwrap();

        store.delete("R1", "widgets", "a").unwrap();
        store.delete("R1", "widgets", "a").unwrap();
        store.delete("R1", "widgets", "never-existed").unwrap();
        assert!(store.get("R1", "widgets", "a").unwrap_err().is_not_found());
    }

    #[test]
    fn values_are_stored_as_text() {
        let db = open_in_memory().unwrap();
        let store = SqliteProjectionStore::new(db.clone());
        store.put("R1", "widgets", "a", &json!({"k": "v"})).unwrap();

        let conn = db.lock();
        let value_type: String = conn
            .query_row("SELECT typeof(value) FROM projections", [], |row| row.get(0))
            .unwrap();
        assert_eq!(value_type, "text");
    }
}
