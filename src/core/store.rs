use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{
    core::event::{Event, EventData},
    error::Result,
};

/// Append-only event log keyed by `(realm_id, stream_id)` with
/// per-stream monotonic versions and realm-scoped global ordering.
pub trait EventStore: Send + Sync {
    /// Append a batch at the version the caller observed (0 for a new
    /// stream). A mismatch fails with `ForgeError::Concurrency` and
    /// writes nothing.
    fn append(
        &self,
        realm_id: &str,
        stream_id: &str,
        expected_version: u64,
        events: &[EventData],
    ) -> Result<Vec<Event>>;

    /// All events of a stream with `version >= from_version`, ascending.
    /// Unknown streams yield an empty vec, not an error.
    fn read_stream(&self, realm_id: &str, stream_id: &str, from_version: u64)
        -> Result<Vec<Event>>;

    /// All events of a realm with `global_position > from_global_position`,
    /// ascending. The strict bound is what lets catch-up advance.
    fn read_all(&self, realm_id: &str, from_global_position: i64) -> Result<Vec<Event>>;

    /// Distinct realm ids that hold at least one event.
    fn list_realm_ids(&self) -> Result<Vec<String>>;
}

/// Keyed document store for read models, namespaced by
/// `(realm_id, projection_name)`. Values are opaque JSON documents.
pub trait ProjectionStore: Send + Sync {
    /// Missing keys yield `ForgeError::NotFound` carrying the
    /// projection name and key.
    fn get(&self, realm_id: &str, projection_name: &str, key: &str) -> Result<Value>;

    /// All values for the projection; order unspecified.
    fn list(&self, realm_id: &str, projection_name: &str) -> Result<Vec<Value>>;

    fn put(&self, realm_id: &str, projection_name: &str, key: &str, value: &Value) -> Result<()>;

    /// Idempotent: deleting a missing key is not an error.
    fn delete(&self, realm_id: &str, projection_name: &str, key: &str) -> Result<()>;
}

/// Typed convenience layer over the raw JSON contract.
pub trait ProjectionStoreExt: ProjectionStore {
    fn get_as<T: DeserializeOwned>(
        &self,
        realm_id: &str,
        projection_name: &str,
        key: &str,
    ) -> Result<T> {
        let value = self.get(realm_id, projection_name, key)?;
        Ok(serde_json::from_value(value)?)
    }

    fn put_as<T: Serialize>(
        &self,
        realm_id: &str,
        projection_name: &str,
        key: &str,
        value: &T,
    ) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.put(realm_id, projection_name, key, &value)
    }
}

impl<S: ProjectionStore + ?Sized> ProjectionStoreExt for S {}

/// Durable cursor per `(realm, projector)`. Monotonicity is the
/// engine's responsibility; the store only persists what it is given.
pub trait CheckpointStore: Send + Sync {
    /// Returns 0 when no checkpoint exists.
    fn get_checkpoint(&self, realm_id: &str, projector_name: &str) -> Result<i64>;

    fn set_checkpoint(&self, realm_id: &str, projector_name: &str, global_position: i64)
        -> Result<()>;
}
