use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    core::{
        engine::Projector,
        event::Event,
        store::{ProjectionStore, ProjectionStoreExt},
    },
    domain::rune::{RuneEvent, RuneStatus},
    error::Result,
};

pub const RUNE_LIST: &str = "rune_list";

/// One row of the realm's rune listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuneSummary {
    pub id: String,
    pub title: String,
    pub status: RuneStatus,
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimant: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct RuneListProjector;

impl RuneListProjector {
    fn load(
        &self,
        store: &dyn ProjectionStore,
        realm_id: &str,
        rune_id: &str,
    ) -> Result<RuneSummary> {
        store.get_as(realm_id, RUNE_LIST, rune_id)
    }
}

impl Projector for RuneListProjector {
    fn name(&self) -> &str {
        RUNE_LIST
    }

    fn handle(&self, event: &Event, store: &dyn ProjectionStore) -> Result<()> {
        let Some(decoded) = RuneEvent::decode(event)? else {
            return Ok(());
        };
        let realm_id = event.realm_id.as_str();

        match decoded {
            RuneEvent::Created(data) => {
                let summary = RuneSummary {
                    id: data.id.clone(),
                    title: data.title,
                    status: RuneStatus::Open,
                    priority: data.priority,
                    claimant: None,
                    parent_id: data.parent_id,
                    created_at: event.timestamp,
                    updated_at: event.timestamp,
                };
                store.put_as(realm_id, RUNE_LIST, &data.id, &summary)
            }
            RuneEvent::Updated(data) => {
                let mut summary = self.load(store, realm_id, &data.id)?;
                if let Some(title) = data.title {
                    summary.title = title;
                }
                if let Some(priority) = data.priority {
                    summary.priority = priority;
                }
                summary.updated_at = event.timestamp;
                store.put_as(realm_id, RUNE_LIST, &data.id, &summary)
            }
            RuneEvent::Claimed(data) => {
                let mut summary = self.load(store, realm_id, &data.id)?;
                summary.status = RuneStatus::Claimed;
                summary.claimant = Some(data.claimant);
                summary.updated_at = event.timestamp;
                store.put_as(realm_id, RUNE_LIST, &data.id, &summary)
            }
            RuneEvent::Fulfilled(data) => {
                let mut summary = self.load(store, realm_id, &data.id)?;
                summary.status = RuneStatus::Fulfilled;
                summary.updated_at = event.timestamp;
                store.put_as(realm_id, RUNE_LIST, &data.id, &summary)
            }
            RuneEvent::Sealed(data) => {
                let mut summary = self.load(store, realm_id, &data.id)?;
                summary.status = RuneStatus::Sealed;
                summary.updated_at = event.timestamp;
                store.put_as(realm_id, RUNE_LIST, &data.id, &summary)
            }
            RuneEvent::DependencyAdded(_)
            | RuneEvent::DependencyRemoved(_)
            | RuneEvent::Noted(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::memory::{MemoryEventStore, MemoryProjectionStore},
        domain::rune::{ClaimRune, CreateRune, handle_claim_rune, handle_create_rune},
    };

    fn replay(events: &MemoryEventStore, projections: &MemoryProjectionStore) {
        use crate::core::store::EventStore;
        let projector = RuneListProjector;
        for event in events.read_all("realm-1", 0).unwrap() {
            projector.handle(&event, projections).unwrap();
        }
    }

    #[test]
    fn lifecycle_events_shape_the_summary() {
        let events = MemoryEventStore::new();
        let projections = MemoryProjectionStore::new();

        let outcome = handle_create_rune(
            "realm-1",
            CreateRune {
                title: "forge the anvil".into(),
                description: None,
                priority: 3,
                parent_id: None,
            },
            &events,
            &projections,
        )
        .unwrap();
        replay(&events, &projections);

        handle_claim_rune(
            "realm-1",
            ClaimRune {
                id: outcome.rune_id.clone(),
                claimant: "brokk".into(),
            },
            &events,
        )
        .unwrap();
        replay(&events, &projections);

        let summary: RuneSummary = projections
            .get_as("realm-1", RUNE_LIST, &outcome.rune_id)
            .unwrap();
        assert_eq!(summary.status, RuneStatus::Claimed);
        assert_eq!(summary.claimant.as_deref(), Some("brokk"));
        assert_eq!(summary.priority, 3);
        assert!(summary.updated_at >= summary.created_at);
    }

    #[test]
    fn replaying_the_stream_is_idempotent() {
        let events = MemoryEventStore::new();
        let projections = MemoryProjectionStore::new();

        let outcome = handle_create_rune(
            "realm-1",
            CreateRune {
                title: "forge the anvil".into(),
                description: None,
                priority: 1,
                parent_id: None,
            },
            &events,
            &projections,
        )
        .unwrap();
        replay(&events, &projections);
        let first: RuneSummary = projections
            .get_as("realm-1", RUNE_LIST, &outcome.rune_id)
            .unwrap();

        replay(&events, &projections);
        let second: RuneSummary = projections
            .get_as("realm-1", RUNE_LIST, &outcome.rune_id)
            .unwrap();
        assert_eq!(
            serde_json::to_value(&first).unwrap(),
            serde_json::to_value(&second).unwrap()
        );
    }
}
