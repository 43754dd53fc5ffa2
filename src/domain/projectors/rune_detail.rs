use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    core::{
        engine::Projector,
        event::Event,
        store::{ProjectionStore, ProjectionStoreExt},
    },
    domain::rune::{Relationship, RuneEvent, RuneStatus},
    error::Result,
};

pub const RUNE_DETAIL: &str = "rune_detail";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyRef {
    pub target_id: String,
    pub relationship: Relationship,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub text: String,
    pub noted_at: DateTime<Utc>,
}

/// The full per-rune document, including annotations the summary drops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuneDetail {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: RuneStatus,
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimant: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seal_reason: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<DependencyRef>,
    #[serde(default)]
    pub notes: Vec<Note>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct RuneDetailProjector;

impl Projector for RuneDetailProjector {
    fn name(&self) -> &str {
        RUNE_DETAIL
    }

    fn handle(&self, event: &Event, store: &dyn ProjectionStore) -> Result<()> {
        let Some(decoded) = RuneEvent::decode(event)? else {
            return Ok(());
        };
        let realm_id = event.realm_id.as_str();

        if let RuneEvent::Created(data) = &decoded {
            let detail = RuneDetail {
                id: data.id.clone(),
                title: data.title.clone(),
                description: data.description.clone(),
                status: RuneStatus::Open,
                priority: data.priority,
                claimant: None,
                parent_id: data.parent_id.clone(),
                seal_reason: None,
                dependencies: Vec::new(),
                notes: Vec::new(),
                version: event.version,
                created_at: event.timestamp,
                updated_at: event.timestamp,
            };
            return store.put_as(realm_id, RUNE_DETAIL, &data.id, &detail);
        }

        // every other event targets the stream of an existing rune
        let rune_id = event.stream_id.as_str();
        let mut detail: RuneDetail = store.get_as(realm_id, RUNE_DETAIL, rune_id)?;

        match decoded {
            RuneEvent::Created(_) => unreachable!("handled above"),
            RuneEvent::Updated(data) => {
                if let Some(title) = data.title {
                    detail.title = title;
                }
                if let Some(description) = data.description {
                    detail.description = Some(description);
                }
                if let Some(priority) = data.priority {
                    detail.priority = priority;
                }
            }
            RuneEvent::Claimed(data) => {
                detail.status = RuneStatus::Claimed;
                detail.claimant = Some(data.claimant);
            }
            RuneEvent::Fulfilled(_) => {
                detail.status = RuneStatus::Fulfilled;
            }
            RuneEvent::Sealed(data) => {
                detail.status = RuneStatus::Sealed;
                detail.seal_reason = data.reason;
            }
            RuneEvent::DependencyAdded(data) => {
                let dependency = DependencyRef {
                    target_id: data.target_id,
                    relationship: data.relationship,
                };
                if !detail.dependencies.contains(&dependency) {
                    detail.dependencies.push(dependency);
                }
            }
            RuneEvent::DependencyRemoved(data) => {
                detail.dependencies.retain(|dep| {
                    dep.target_id != data.target_id || dep.relationship != data.relationship
                });
            }
            RuneEvent::Noted(data) => {
                let note = Note {
                    text: data.text,
                    noted_at: event.timestamp,
                };
                // replays re-deliver the same event with the same timestamp
                if !detail.notes.contains(&note) {
                    detail.notes.push(note);
                }
            }
        }

        detail.version = detail.version.max(event.version);
        detail.updated_at = event.timestamp;
        store.put_as(realm_id, RUNE_DETAIL, rune_id, &detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::{
            memory::{MemoryEventStore, MemoryProjectionStore},
            store::EventStore,
        },
        domain::rune::{
            AddDependency, AddNote, CreateRune, RemoveDependency, handle_add_dependency,
            handle_add_note, handle_create_rune, handle_remove_dependency,
        },
    };

    fn replay_all(events: &MemoryEventStore, projections: &MemoryProjectionStore) {
        let summary = super::super::rune_list::RuneListProjector;
        let detail = RuneDetailProjector;
        for event in events.read_all("realm-1", 0).unwrap() {
            summary.handle(&event, projections).unwrap();
            detail.handle(&event, projections).unwrap();
        }
    }

    fn create(events: &MemoryEventStore, projections: &MemoryProjectionStore, title: &str) -> String {
        let outcome = handle_create_rune(
            "realm-1",
            CreateRune {
                title: title.into(),
                description: Some("hammer work".into()),
                priority: 2,
                parent_id: None,
            },
            events,
            projections,
        )
        .unwrap();
        replay_all(events, projections);
        outcome.rune_id
    }

    #[test]
    fn annotations_accumulate_in_the_detail_document() {
        let events = MemoryEventStore::new();
        let projections = MemoryProjectionStore::new();
        let rune_id = create(&events, &projections, "forge the anvil");
        let target_id = create(&events, &projections, "smelt the ore");

        handle_add_dependency(
            "realm-1",
            AddDependency {
                rune_id: rune_id.clone(),
                target_id: target_id.clone(),
                relationship: "blocks".into(),
            },
            &events,
            &projections,
        )
        .unwrap();
        handle_add_note(
            "realm-1",
            AddNote {
                rune_id: rune_id.clone(),
                text: "needs better coal".into(),
            },
            &events,
        )
        .unwrap();
        replay_all(&events, &projections);

        let detail: RuneDetail = projections
            .get_as("realm-1", RUNE_DETAIL, &rune_id)
            .unwrap();
        assert_eq!(detail.dependencies.len(), 1);
        assert_eq!(detail.dependencies[0].target_id, target_id);
        assert_eq!(detail.notes.len(), 1);
        assert_eq!(detail.notes[0].text, "needs better coal");
        assert_eq!(detail.version, 3);

        handle_remove_dependency(
            "realm-1",
            RemoveDependency {
                rune_id: rune_id.clone(),
                target_id,
                relationship: "blocks".into(),
            },
            &events,
        )
        .unwrap();
        replay_all(&events, &projections);

        let detail: RuneDetail = projections
            .get_as("realm-1", RUNE_DETAIL, &rune_id)
            .unwrap();
        assert!(detail.dependencies.is_empty());
    }

    #[test]
    fn replay_does_not_duplicate_annotations() {
        let events = MemoryEventStore::new();
        let projections = MemoryProjectionStore::new();
        let rune_id = create(&events, &projections, "forge the anvil");

        handle_add_note(
            "realm-1",
            AddNote {
                rune_id: rune_id.clone(),
                text: "quenched twice".into(),
            },
            &events,
        )
        .unwrap();

        replay_all(&events, &projections);
        replay_all(&events, &projections);

        let detail: RuneDetail = projections
            .get_as("realm-1", RUNE_DETAIL, &rune_id)
            .unwrap();
        assert_eq!(detail.notes.len(), 1);
    }
}
