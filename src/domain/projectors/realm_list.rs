use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    core::{
        engine::Projector,
        event::Event,
        store::{ProjectionStore, ProjectionStoreExt},
    },
    domain::realm::{RealmEvent, RealmStatus},
    error::Result,
};

pub const REALM_LIST: &str = "realm_list";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealmListEntry {
    pub realm_id: String,
    pub name: String,
    pub status: RealmStatus,
    pub created_at: DateTime<Utc>,
}

pub struct RealmListProjector;

impl Projector for RealmListProjector {
    fn name(&self) -> &str {
        REALM_LIST
    }

    fn handle(&self, event: &Event, store: &dyn ProjectionStore) -> Result<()> {
        let Some(decoded) = RealmEvent::decode(event)? else {
            return Ok(());
        };

        match decoded {
            RealmEvent::Created(data) => {
                let entry = RealmListEntry {
                    realm_id: data.realm_id.clone(),
                    name: data.name,
                    status: RealmStatus::Active,
                    created_at: event.timestamp,
                };
                store.put_as(&event.realm_id, REALM_LIST, &data.realm_id, &entry)
            }
            RealmEvent::Suspended(data) => {
                let mut entry: RealmListEntry =
                    store.get_as(&event.realm_id, REALM_LIST, &data.realm_id)?;
                entry.status = RealmStatus::Suspended;
                store.put_as(&event.realm_id, REALM_LIST, &data.realm_id, &entry)
            }
        }
    }
}
