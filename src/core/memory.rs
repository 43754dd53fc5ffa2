//! In-memory store implementations. They honour the same contracts as
//! the SQLite backend (optimistic concurrency, strict `>` in
//! `read_all`, idempotent delete) and back the engine and domain unit
//! tests; the SQLite backend remains the durable reference.

use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

use parking_lot::Mutex;
use serde_json::Value;

use crate::{
    core::{
        clock::{Clock, SystemClock},
        event::{Event, EventData},
        store::{CheckpointStore, EventStore, ProjectionStore},
    },
    error::{ForgeError, Result},
};

#[derive(Default)]
struct MemoryEventLog {
    events: Vec<Event>,
    next_position: i64,
}

pub struct MemoryEventStore {
    log: Mutex<MemoryEventLog>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            log: Mutex::new(MemoryEventLog::default()),
            clock,
        }
    }
}

impl EventStore for MemoryEventStore {
    fn append(
        &self,
        realm_id: &str,
        stream_id: &str,
        expected_version: u64,
        events: &[EventData],
    ) -> Result<Vec<Event>> {
        let mut log = self.log.lock();

        let actual = log
            .events
            .iter()
            .filter(|e| e.realm_id == realm_id && e.stream_id == stream_id)
            .map(|e| e.version)
            .max()
            .unwrap_or(0);
        if actual != expected_version {
            return Err(ForgeError::Concurrency {
                stream_id: stream_id.to_string(),
                expected: expected_version,
                actual,
            });
        }

        let timestamp = self.clock.now();
        let mut committed = Vec::with_capacity(events.len());
        for (offset, input) in events.iter().enumerate() {
            log.next_position += 1;
            committed.push(Event {
                realm_id: realm_id.to_string(),
                stream_id: stream_id.to_string(),
                version: expected_version + offset as u64 + 1,
                global_position: log.next_position,
                event_type: input.event_type.clone(),
                data: input.data.clone(),
                metadata: input.metadata.clone(),
                timestamp,
            });
        }
        log.events.extend(committed.iter().cloned());
        Ok(committed)
    }

    fn read_stream(
        &self,
        realm_id: &str,
        stream_id: &str,
        from_version: u64,
    ) -> Result<Vec<Event>> {
        let log = self.log.lock();
        let mut events: Vec<Event> = log
            .events
            .iter()
            .filter(|e| {
                e.realm_id == realm_id && e.stream_id == stream_id && e.version >= from_version
            })
            .cloned()
            .collect();
        events.sort_by_key(|e| e.version);
        Ok(events)
    }

    fn read_all(&self, realm_id: &str, from_global_position: i64) -> Result<Vec<Event>> {
        let log = self.log.lock();
        let mut events: Vec<Event> = log
            .events
            .iter()
            .filter(|e| e.realm_id == realm_id && e.global_position > from_global_position)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.global_position);
        Ok(events)
    }

    fn list_realm_ids(&self) -> Result<Vec<String>> {
        let log = self.log.lock();
        let realms: BTreeSet<String> = log.events.iter().map(|e| e.realm_id.clone()).collect();
        Ok(realms.into_iter().collect())
    }
}

#[derive(Default)]
pub struct MemoryProjectionStore {
    entries: Mutex<HashMap<(String, String, String), Value>>,
}

impl MemoryProjectionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProjectionStore for MemoryProjectionStore {
    fn get(&self, realm_id: &str, projection_name: &str, key: &str) -> Result<Value> {
        let entries = self.entries.lock();
        entries
            .get(&(
                realm_id.to_string(),
                projection_name.to_string(),
                key.to_string(),
            ))
            .cloned()
            .ok_or_else(|| ForgeError::not_found(projection_name, key))
    }

    fn list(&self, realm_id: &str, projection_name: &str) -> Result<Vec<Value>> {
        let entries = self.entries.lock();
        Ok(entries
            .iter()
            .filter(|((realm, name, _), _)| realm == realm_id && name == projection_name)
            .map(|(_, value)| value.clone())
            .collect())
    }

    fn put(&self, realm_id: &str, projection_name: &str, key: &str, value: &Value) -> Result<()> {
        let mut entries = self.entries.lock();
        entries.insert(
            (
                realm_id.to_string(),
                projection_name.to_string(),
                key.to_string(),
            ),
            value.clone(),
        );
        Ok(())
    }

    fn delete(&self, realm_id: &str, projection_name: &str, key: &str) -> Result<()> {
        let mut entries = self.entries.lock();
        entries.remove(&(
            realm_id.to_string(),
            projection_name.to_string(),
            key.to_string(),
        ));
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryCheckpointStore {
    checkpoints: Mutex<HashMap<(String, String), i64>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn get_checkpoint(&self, realm_id: &str, projector_name: &str) -> Result<i64> {
        let checkpoints = self.checkpoints.lock();
        Ok(checkpoints
            .get(&(realm_id.to_string(), projector_name.to_string()))
            .copied()
            .unwrap_or(0))
    }

    fn set_checkpoint(
        &self,
        realm_id: &str,
        projector_name: &str,
        global_position: i64,
    ) -> Result<()> {
        let mut checkpoints = self.checkpoints.lock();
        checkpoints.insert(
            (realm_id.to_string(), projector_name.to_string()),
            global_position,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::core::store::ProjectionStoreExt;

    fn event_data(event_type: &str) -> EventData {
        EventData::new(event_type, json!({}))
    }

    #[test]
    fn append_assigns_gapless_versions_and_positions() {
        let store = MemoryEventStore::new();

        let first = store
            .append("realm-1", "stream-1", 0, &[event_data("a"), event_data("b")])
            .unwrap();
        let second = store
            .append("realm-1", "stream-1", 2, &[event_data("c")])
            .unwrap();

        assert_eq!(
            first.iter().map(|e| e.version).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert_eq!(second[0].version, 3);
        assert_eq!(
            store
                .read_all("realm-1", 0)
                .unwrap()
                .iter()
                .map(|e| e.global_position)
                .collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn append_rejects_version_mismatch() {
        let store = MemoryEventStore::new();
        store
            .append("realm-1", "stream-1", 0, &[event_data("a")])
            .unwrap();

        let err = store
            .append("realm-1", "stream-1", 0, &[event_data("b")])
            .unwrap_err();
        assert!(err.is_concurrency());
    }

    #[test]
    fn read_all_is_strictly_after_the_cursor() {
        let store = MemoryEventStore::new();
        store
            .append("realm-1", "stream-1", 0, &[event_data("a"), event_data("b")])
            .unwrap();

        let tail = store.read_all("realm-1", 1).unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].global_position, 2);
    }

    #[test]
    fn list_realm_ids_deduplicates() {
        let store = MemoryEventStore::new();
        store
            .append("realm-b", "stream-1", 0, &[event_data("a")])
            .unwrap();
        store
            .append("realm-a", "stream-1", 0, &[event_data("a")])
            .unwrap();
        store
            .append("realm-a", "stream-2", 0, &[event_data("a")])
            .unwrap();

        assert_eq!(store.list_realm_ids().unwrap(), vec!["realm-a", "realm-b"]);
    }

    #[test]
    fn projection_round_trip_and_idempotent_delete() {
        let store = MemoryProjectionStore::new();
        store
            .put_as("realm-1", "proj", "key", &json!({"count": 3}))
            .unwrap();

        let value: Value = store.get_as("realm-1", "proj", "key").unwrap();
        assert_eq!(value, json!({"count": 3}));

        store.delete("realm-1", "proj", "key").unwrap();
        store.delete("realm-1", "proj", "key").unwrap();
        assert!(store.get("realm-1", "proj", "key").unwrap_err().is_not_found());
    }

    #[test]
    fn checkpoint_defaults_to_zero() {
        let store = MemoryCheckpointStore::new();
        assert_eq!(store.get_checkpoint("realm-1", "proj").unwrap(), 0);

        store.set_checkpoint("realm-1", "proj", 7).unwrap();
        assert_eq!(store.get_checkpoint("realm-1", "proj").unwrap(), 7);
    }
}
