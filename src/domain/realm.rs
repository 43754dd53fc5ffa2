use serde::{Deserialize, Serialize};

use crate::{
    core::{
        event::{Event, EventData},
        store::EventStore,
    },
    domain::{ADMIN_REALM_ID, short_hex},
    error::{ForgeError, Result},
};

pub const EVENT_REALM_CREATED: &str = "RealmCreated";
pub const EVENT_REALM_SUSPENDED: &str = "RealmSuspended";

const REALM_STREAM_PREFIX: &str = "realm-";

pub fn realm_stream_id(realm_id: &str) -> String {
    format!("{REALM_STREAM_PREFIX}{realm_id}")
}

pub fn new_realm_id() -> String {
    format!("rf-{}", short_hex(4))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealmCreated {
    pub realm_id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealmSuspended {
    pub realm_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
pub enum RealmEvent {
    Created(RealmCreated),
    Suspended(RealmSuspended),
}

impl RealmEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            RealmEvent::Created(_) => EVENT_REALM_CREATED,
            RealmEvent::Suspended(_) => EVENT_REALM_SUSPENDED,
        }
    }

    pub fn decode(event: &Event) -> Result<Option<Self>> {
        let decoded = match event.event_type.as_str() {
            EVENT_REALM_CREATED => RealmEvent::Created(serde_json::from_value(event.data.clone())?),
            EVENT_REALM_SUSPENDED => {
                RealmEvent::Suspended(serde_json::from_value(event.data.clone())?)
            }
            _ => return Ok(None),
        };
        Ok(Some(decoded))
    }

    pub fn into_event_data(self) -> Result<EventData> {
        let event_type = self.event_type();
        let data = match self {
            RealmEvent::Created(data) => serde_json::to_value(data)?,
            RealmEvent::Suspended(data) => serde_json::to_value(data)?,
        };
        Ok(EventData::new(event_type, data))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RealmStatus {
    #[default]
    Active,
    Suspended,
}

#[derive(Debug, Clone, Default)]
pub struct RealmState {
    pub exists: bool,
    pub realm_id: String,
    pub name: String,
    pub status: RealmStatus,
}

pub fn fold_realm(events: &[Event]) -> Result<RealmState> {
    let mut state = RealmState::default();
    for event in events {
        let Some(decoded) = RealmEvent::decode(event)? else {
            continue;
        };
        match decoded {
            RealmEvent::Created(data) => {
                state.exists = true;
                state.realm_id = data.realm_id;
                state.name = data.name;
                state.status = RealmStatus::Active;
            }
            RealmEvent::Suspended(_) => {
                state.status = RealmStatus::Suspended;
            }
        }
    }
    Ok(state)
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateRealm {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SuspendRealm {
    pub realm_id: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateRealmOutcome {
    pub realm_id: String,
    #[serde(skip)]
    pub committed: Vec<Event>,
}

pub fn handle_create_realm(
    cmd: CreateRealm,
    events: &dyn EventStore,
) -> Result<CreateRealmOutcome> {
    if cmd.name.trim().is_empty() {
        return Err(ForgeError::validation("realm name cannot be empty"));
    }

    let realm_id = new_realm_id();
    let created = RealmEvent::Created(RealmCreated {
        realm_id: realm_id.clone(),
        name: cmd.name,
    });
    let committed = events.append(
        ADMIN_REALM_ID,
        &realm_stream_id(&realm_id),
        0,
        &[created.into_event_data()?],
    )?;
    Ok(CreateRealmOutcome {
        realm_id,
        committed,
    })
}

pub fn handle_suspend_realm(cmd: SuspendRealm, events: &dyn EventStore) -> Result<Vec<Event>> {
    let stream_id = realm_stream_id(&cmd.realm_id);
    let stream = events.read_stream(ADMIN_REALM_ID, &stream_id, 0)?;
    let state = fold_realm(&stream)?;
    if !state.exists {
        return Err(ForgeError::not_found("realm", &cmd.realm_id));
    }
    if state.status == RealmStatus::Suspended {
        return Err(ForgeError::validation(format!(
            "realm {:?} is already suspended",
            cmd.realm_id
        )));
    }

    let suspended = RealmEvent::Suspended(RealmSuspended {
        realm_id: cmd.realm_id,
        reason: cmd.reason,
    });
    events.append(
        ADMIN_REALM_ID,
        &stream_id,
        stream.len() as u64,
        &[suspended.into_event_data()?],
    )
}
