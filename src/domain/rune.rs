use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    core::{
        event::{Event, EventData},
        store::{EventStore, ProjectionStore},
    },
    domain::{projectors::rune_list::RUNE_LIST, short_hex},
    error::{ForgeError, Result},
};

pub const EVENT_RUNE_CREATED: &str = "RuneCreated";
pub const EVENT_RUNE_UPDATED: &str = "RuneUpdated";
pub const EVENT_RUNE_CLAIMED: &str = "RuneClaimed";
pub const EVENT_RUNE_FULFILLED: &str = "RuneFulfilled";
pub const EVENT_RUNE_SEALED: &str = "RuneSealed";
pub const EVENT_DEPENDENCY_ADDED: &str = "DependencyAdded";
pub const EVENT_DEPENDENCY_REMOVED: &str = "DependencyRemoved";
pub const EVENT_RUNE_NOTED: &str = "RuneNoted";

pub fn new_rune_id() -> String {
    format!("rune-{}", short_hex(8))
}

/// How one rune relates to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relationship {
    Blocks,
    RelatesTo,
    Duplicates,
    Supersedes,
    RepliesTo,
}

impl Relationship {
    pub fn as_str(self) -> &'static str {
        match self {
            Relationship::Blocks => "blocks",
            Relationship::RelatesTo => "relates_to",
            Relationship::Duplicates => "duplicates",
            Relationship::Supersedes => "supersedes",
            Relationship::RepliesTo => "replies_to",
        }
    }
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Relationship {
    type Err = ForgeError;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "blocks" => Ok(Relationship::Blocks),
            "relates_to" => Ok(Relationship::RelatesTo),
            "duplicates" => Ok(Relationship::Duplicates),
            "supersedes" => Ok(Relationship::Supersedes),
            "replies_to" => Ok(Relationship::RepliesTo),
            other => Err(ForgeError::validation(format!(
                "unknown relationship {other:?}"
            ))),
        }
    }
}

// --- event payloads ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuneCreated {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuneUpdated {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuneClaimed {
    pub id: String,
    pub claimant: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuneFulfilled {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuneSealed {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyAdded {
    pub rune_id: String,
    pub target_id: String,
    pub relationship: Relationship,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyRemoved {
    pub rune_id: String,
    pub target_id: String,
    pub relationship: Relationship,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuneNoted {
    pub rune_id: String,
    pub text: String,
}

/// Tagged view of a rune stream event. The discriminator is the
/// persisted `event_type` string; folding matches exhaustively and
/// skips event types that belong to other aggregates.
#[derive(Debug, Clone)]
pub enum RuneEvent {
    Created(RuneCreated),
    Updated(RuneUpdated),
    Claimed(RuneClaimed),
    Fulfilled(RuneFulfilled),
    Sealed(RuneSealed),
    DependencyAdded(DependencyAdded),
    DependencyRemoved(DependencyRemoved),
    Noted(RuneNoted),
}

impl RuneEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            RuneEvent::Created(_) => EVENT_RUNE_CREATED,
            RuneEvent::Updated(_) => EVENT_RUNE_UPDATED,
            RuneEvent::Claimed(_) => EVENT_RUNE_CLAIMED,
            RuneEvent::Fulfilled(_) => EVENT_RUNE_FULFILLED,
            RuneEvent::Sealed(_) => EVENT_RUNE_SEALED,
            RuneEvent::DependencyAdded(_) => EVENT_DEPENDENCY_ADDED,
            RuneEvent::DependencyRemoved(_) => EVENT_DEPENDENCY_REMOVED,
            RuneEvent::Noted(_) => EVENT_RUNE_NOTED,
        }
    }

    pub fn decode(event: &Event) -> Result<Option<Self>> {
        let decoded = match event.event_type.as_str() {
            EVENT_RUNE_CREATED => RuneEvent::Created(serde_json::from_value(event.data.clone())?),
            EVENT_RUNE_UPDATED => RuneEvent::Updated(serde_json::from_value(event.data.clone())?),
            EVENT_RUNE_CLAIMED => RuneEvent::Claimed(serde_json::from_value(event.data.clone())?),
            EVENT_RUNE_FULFILLED => {
                RuneEvent::Fulfilled(serde_json::from_value(event.data.clone())?)
            }
            EVENT_RUNE_SEALED => RuneEvent::Sealed(serde_json::from_value(event.data.clone())?),
            EVENT_DEPENDENCY_ADDED => {
                RuneEvent::DependencyAdded(serde_json::from_value(event.data.clone())?)
            }
            EVENT_DEPENDENCY_REMOVED => {
                RuneEvent::DependencyRemoved(serde_json::from_value(event.data.clone())?)
            }
            EVENT_RUNE_NOTED => RuneEvent::Noted(serde_json::from_value(event.data.clone())?),
            _ => return Ok(None),
        };
        Ok(Some(decoded))
    }

    pub fn into_event_data(self) -> Result<EventData> {
        let event_type = self.event_type();
        let data = match self {
            RuneEvent::Created(data) => serde_json::to_value(data)?,
            RuneEvent::Updated(data) => serde_json::to_value(data)?,
            RuneEvent::Claimed(data) => serde_json::to_value(data)?,
            RuneEvent::Fulfilled(data) => serde_json::to_value(data)?,
            RuneEvent::Sealed(data) => serde_json::to_value(data)?,
            RuneEvent::DependencyAdded(data) => serde_json::to_value(data)?,
            RuneEvent::DependencyRemoved(data) => serde_json::to_value(data)?,
            RuneEvent::Noted(data) => serde_json::to_value(data)?,
        };
        Ok(EventData::new(event_type, data))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuneStatus {
    #[default]
    Open,
    Claimed,
    Fulfilled,
    Sealed,
}

impl RuneStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RuneStatus::Open => "open",
            RuneStatus::Claimed => "claimed",
            RuneStatus::Fulfilled => "fulfilled",
            RuneStatus::Sealed => "sealed",
        }
    }
}

/// In-memory fold of a rune stream, used to validate commands.
#[derive(Debug, Clone, Default)]
pub struct RuneState {
    pub exists: bool,
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub priority: i32,
    pub parent_id: Option<String>,
    pub status: RuneStatus,
    pub claimant: Option<String>,
    pub seal_reason: Option<String>,
}

pub fn fold_rune(events: &[Event]) -> Result<RuneState> {
    let mut state = RuneState::default();
    for event in events {
        let Some(decoded) = RuneEvent::decode(event)? else {
            continue;
        };
        match decoded {
            RuneEvent::Created(data) => {
                state.exists = true;
                state.id = data.id;
                state.title = data.title;
                state.description = data.description;
                state.priority = data.priority;
                state.parent_id = data.parent_id;
                state.status = RuneStatus::Open;
            }
            RuneEvent::Updated(data) => {
                if let Some(title) = data.title {
                    state.title = title;
                }
                if let Some(description) = data.description {
                    state.description = Some(description);
                }
                if let Some(priority) = data.priority {
                    state.priority = priority;
                }
            }
            RuneEvent::Claimed(data) => {
                state.status = RuneStatus::Claimed;
                state.claimant = Some(data.claimant);
            }
            RuneEvent::Fulfilled(_) => {
                state.status = RuneStatus::Fulfilled;
            }
            RuneEvent::Sealed(data) => {
                state.status = RuneStatus::Sealed;
                state.seal_reason = data.reason;
            }
            // annotations: no state transition
            RuneEvent::DependencyAdded(_)
            | RuneEvent::DependencyRemoved(_)
            | RuneEvent::Noted(_) => {}
        }
    }
    Ok(state)
}

// --- commands ---

#[derive(Debug, Clone, Deserialize)]
pub struct CreateRune {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateRune {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClaimRune {
    pub id: String,
    pub claimant: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FulfillRune {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SealRune {
    pub id: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddDependency {
    pub rune_id: String,
    pub target_id: String,
    pub relationship: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoveDependency {
    pub rune_id: String,
    pub target_id: String,
    pub relationship: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddNote {
    pub rune_id: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateRuneOutcome {
    pub rune_id: String,
    #[serde(skip)]
    pub committed: Vec<Event>,
}

// --- handlers ---

fn read_rune(
    realm_id: &str,
    rune_id: &str,
    events: &dyn EventStore,
) -> Result<(RuneState, u64)> {
    let stream = events.read_stream(realm_id, rune_id, 0)?;
    if stream.is_empty() {
        return Err(ForgeError::not_found("rune", rune_id));
    }
    let state = fold_rune(&stream)?;
    Ok((state, stream.len() as u64))
}

fn ensure_rune_listed(
    realm_id: &str,
    rune_id: &str,
    projections: &dyn ProjectionStore,
) -> Result<()> {
    match projections.get(realm_id, RUNE_LIST, rune_id) {
        Ok(_) => Ok(()),
        Err(err) if err.is_not_found() => Err(ForgeError::not_found("rune", rune_id)),
        Err(err) => Err(err),
    }
}

pub fn handle_create_rune(
    realm_id: &str,
    cmd: CreateRune,
    events: &dyn EventStore,
    projections: &dyn ProjectionStore,
) -> Result<CreateRuneOutcome> {
    if cmd.title.trim().is_empty() {
        return Err(ForgeError::validation("title cannot be empty"));
    }
    if let Some(parent_id) = cmd.parent_id.as_deref() {
        ensure_rune_listed(realm_id, parent_id, projections)?;
    }

    let rune_id = new_rune_id();
    let created = RuneEvent::Created(RuneCreated {
        id: rune_id.clone(),
        title: cmd.title,
        description: cmd.description,
        priority: cmd.priority,
        parent_id: cmd.parent_id,
    });
    let committed = events.append(realm_id, &rune_id, 0, &[created.into_event_data()?])?;
    Ok(CreateRuneOutcome { rune_id, committed })
}

pub fn handle_update_rune(
    realm_id: &str,
    cmd: UpdateRune,
    events: &dyn EventStore,
) -> Result<Vec<Event>> {
    let (state, version) = read_rune(realm_id, &cmd.id, events)?;
    if state.status == RuneStatus::Sealed {
        return Err(ForgeError::validation(format!(
            "cannot update sealed rune {:?}",
            cmd.id
        )));
    }
    if cmd.title.is_none() && cmd.description.is_none() && cmd.priority.is_none() {
        return Err(ForgeError::validation("update carries no changes"));
    }
    if let Some(title) = cmd.title.as_deref() {
        if title.trim().is_empty() {
            return Err(ForgeError::validation("title cannot be empty"));
        }
    }

    let updated = RuneEvent::Updated(RuneUpdated {
        id: cmd.id.clone(),
        title: cmd.title,
        description: cmd.description,
        priority: cmd.priority,
    });
    events.append(realm_id, &cmd.id, version, &[updated.into_event_data()?])
}

pub fn handle_claim_rune(
    realm_id: &str,
    cmd: ClaimRune,
    events: &dyn EventStore,
) -> Result<Vec<Event>> {
    if cmd.claimant.trim().is_empty() {
        return Err(ForgeError::validation("claimant cannot be empty"));
    }
    let (state, version) = read_rune(realm_id, &cmd.id, events)?;
    match state.status {
        RuneStatus::Open => {}
        RuneStatus::Claimed => {
            return Err(ForgeError::validation(format!(
                "rune {:?} is already claimed",
                cmd.id
            )));
        }
        RuneStatus::Fulfilled => {
            return Err(ForgeError::validation(format!(
                "cannot claim fulfilled rune {:?}",
                cmd.id
            )));
        }
        RuneStatus::Sealed => {
            return Err(ForgeError::validation(format!(
                "cannot claim sealed rune {:?}",
                cmd.id
            )));
        }
    }

    let claimed = RuneEvent::Claimed(RuneClaimed {
        id: cmd.id.clone(),
        claimant: cmd.claimant,
    });
    events.append(realm_id, &cmd.id, version, &[claimed.into_event_data()?])
}

pub fn handle_fulfill_rune(
    realm_id: &str,
    cmd: FulfillRune,
    events: &dyn EventStore,
) -> Result<Vec<Event>> {
    let (state, version) = read_rune(realm_id, &cmd.id, events)?;
    match state.status {
        RuneStatus::Claimed => {}
        RuneStatus::Open => {
            return Err(ForgeError::validation(format!(
                "rune {:?} is not claimed",
                cmd.id
            )));
        }
        RuneStatus::Fulfilled => {
            return Err(ForgeError::validation(format!(
                "rune {:?} is already fulfilled",
                cmd.id
            )));
        }
        RuneStatus::Sealed => {
            return Err(ForgeError::validation(format!(
                "cannot fulfill sealed rune {:?}",
                cmd.id
            )));
        }
    }

    let fulfilled = RuneEvent::Fulfilled(RuneFulfilled { id: cmd.id.clone() });
    events.append(realm_id, &cmd.id, version, &[fulfilled.into_event_data()?])
}

pub fn handle_seal_rune(
    realm_id: &str,
    cmd: SealRune,
    events: &dyn EventStore,
) -> Result<Vec<Event>> {
    let (state, version) = read_rune(realm_id, &cmd.id, events)?;
    if state.status == RuneStatus::Sealed {
        return Err(ForgeError::validation(format!(
            "rune {:?} is already sealed",
            cmd.id
        )));
    }

    let sealed = RuneEvent::Sealed(RuneSealed {
        id: cmd.id.clone(),
        reason: cmd.reason,
    });
    events.append(realm_id, &cmd.id, version, &[sealed.into_event_data()?])
}

pub fn handle_add_dependency(
    realm_id: &str,
    cmd: AddDependency,
    events: &dyn EventStore,
    projections: &dyn ProjectionStore,
) -> Result<Vec<Event>> {
    let relationship: Relationship = cmd.relationship.parse()?;
    if cmd.rune_id == cmd.target_id {
        return Err(ForgeError::validation("rune cannot depend on itself"));
    }
    let (_, version) = read_rune(realm_id, &cmd.rune_id, events)?;
    ensure_rune_listed(realm_id, &cmd.target_id, projections)?;

    let added = RuneEvent::DependencyAdded(DependencyAdded {
        rune_id: cmd.rune_id.clone(),
        target_id: cmd.target_id,
        relationship,
    });
    events.append(realm_id, &cmd.rune_id, version, &[added.into_event_data()?])
}

pub fn handle_remove_dependency(
    realm_id: &str,
    cmd: RemoveDependency,
    events: &dyn EventStore,
) -> Result<Vec<Event>> {
    let relationship: Relationship = cmd.relationship.parse()?;
    let (_, version) = read_rune(realm_id, &cmd.rune_id, events)?;

    let removed = RuneEvent::DependencyRemoved(DependencyRemoved {
        rune_id: cmd.rune_id.clone(),
        target_id: cmd.target_id,
        relationship,
    });
    events.append(realm_id, &cmd.rune_id, version, &[removed.into_event_data()?])
}

pub fn handle_add_note(
    realm_id: &str,
    cmd: AddNote,
    events: &dyn EventStore,
) -> Result<Vec<Event>> {
    if cmd.text.trim().is_empty() {
        return Err(ForgeError::validation("note text cannot be empty"));
    }
    let (_, version) = read_rune(realm_id, &cmd.rune_id, events)?;

    let noted = RuneEvent::Noted(RuneNoted {
        rune_id: cmd.rune_id.clone(),
        text: cmd.text,
    });
    events.append(realm_id, &cmd.rune_id, version, &[noted.into_event_data()?])
}
