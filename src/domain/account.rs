use std::collections::BTreeMap;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{RngCore, rngs::OsRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    core::{
        event::{Event, EventData},
        store::EventStore,
    },
    domain::{ADMIN_REALM_ID, roles::Role, short_hex},
    error::{ForgeError, Result},
};

pub const EVENT_ACCOUNT_CREATED: &str = "AccountCreated";
pub const EVENT_ACCOUNT_SUSPENDED: &str = "AccountSuspended";
pub const EVENT_REALM_GRANTED: &str = "RealmGranted";
pub const EVENT_REALM_REVOKED: &str = "RealmRevoked";
pub const EVENT_PAT_CREATED: &str = "PATCreated";
pub const EVENT_PAT_REVOKED: &str = "PATRevoked";
pub const EVENT_ROLE_ASSIGNED: &str = "RoleAssigned";
pub const EVENT_ROLE_REVOKED: &str = "RoleRevoked";

const ACCOUNT_STREAM_PREFIX: &str = "account-";

pub fn account_stream_id(account_id: &str) -> String {
    format!("{ACCOUNT_STREAM_PREFIX}{account_id}")
}

pub fn new_account_id() -> String {
    short_hex(16)
}

pub fn new_pat_id() -> String {
    format!("pat-{}", short_hex(8))
}

/// Mint a PAT: 32 random bytes. The caller gets the raw token once;
/// only the hash of the raw bytes is ever persisted.
fn generate_pat_secret() -> (String, String) {
    let mut raw = [0u8; 32];
    OsRng.fill_bytes(&mut raw);
    let raw_token = URL_SAFE_NO_PAD.encode(raw);
    let key_hash = URL_SAFE_NO_PAD.encode(Sha256::digest(raw));
    (raw_token, key_hash)
}

/// Recompute the persisted key hash from a presented raw token.
pub fn hash_raw_token(raw_token: &str) -> Result<String> {
    let raw = URL_SAFE_NO_PAD
        .decode(raw_token)
        .map_err(|_| ForgeError::validation("malformed token"))?;
    Ok(URL_SAFE_NO_PAD.encode(Sha256::digest(raw)))
}

// --- event payloads ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountCreated {
    pub account_id: String,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSuspended {
    pub account_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealmGranted {
    pub account_id: String,
    pub realm_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealmRevoked {
    pub account_id: String,
    pub realm_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatCreated {
    pub account_id: String,
    pub pat_id: String,
    pub key_hash: String,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatRevoked {
    pub account_id: String,
    pub pat_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleAssigned {
    pub account_id: String,
    pub realm_id: String,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleRevoked {
    pub account_id: String,
    pub realm_id: String,
}

#[derive(Debug, Clone)]
pub enum AccountEvent {
    Created(AccountCreated),
    Suspended(AccountSuspended),
    RealmGranted(RealmGranted),
    RealmRevoked(RealmRevoked),
    PatCreated(PatCreated),
    PatRevoked(PatRevoked),
    RoleAssigned(RoleAssigned),
    RoleRevoked(RoleRevoked),
}

impl AccountEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            AccountEvent::Created(_) => EVENT_ACCOUNT_CREATED,
            AccountEvent::Suspended(_) => EVENT_ACCOUNT_SUSPENDED,
            AccountEvent::RealmGranted(_) => EVENT_REALM_GRANTED,
            AccountEvent::RealmRevoked(_) => EVENT_REALM_REVOKED,
            AccountEvent::PatCreated(_) => EVENT_PAT_CREATED,
            AccountEvent::PatRevoked(_) => EVENT_PAT_REVOKED,
            AccountEvent::RoleAssigned(_) => EVENT_ROLE_ASSIGNED,
            AccountEvent::RoleRevoked(_) => EVENT_ROLE_REVOKED,
        }
    }

    pub fn decode(event: &Event) -> Result<Option<Self>> {
        let data = &event.data;
        let decoded = match event.event_type.as_str() {
            EVENT_ACCOUNT_CREATED => AccountEvent::Created(serde_json::from_value(data.clone())?),
            EVENT_ACCOUNT_SUSPENDED => {
                AccountEvent::Suspended(serde_json::from_value(data.clone())?)
            }
            EVENT_REALM_GRANTED => AccountEvent::RealmGranted(serde_json::from_value(data.clone())?),
            EVENT_REALM_REVOKED => AccountEvent::RealmRevoked(serde_json::from_value(data.clone())?),
            EVENT_PAT_CREATED => AccountEvent::PatCreated(serde_json::from_value(data.clone())?),
            EVENT_PAT_REVOKED => AccountEvent::PatRevoked(serde_json::from_value(data.clone())?),
            EVENT_ROLE_ASSIGNED => AccountEvent::RoleAssigned(serde_json::from_value(data.clone())?),
            EVENT_ROLE_REVOKED => AccountEvent::RoleRevoked(serde_json::from_value(data.clone())?),
            _ => return Ok(None),
        };
        Ok(Some(decoded))
    }

    pub fn into_event_data(self) -> Result<EventData> {
        let event_type = self.event_type();
        let data = match self {
            AccountEvent::Created(data) => serde_json::to_value(data)?,
            AccountEvent::Suspended(data) => serde_json::to_value(data)?,
            AccountEvent::RealmGranted(data) => serde_json::to_value(data)?,
            AccountEvent::RealmRevoked(data) => serde_json::to_value(data)?,
            AccountEvent::PatCreated(data) => serde_json::to_value(data)?,
            AccountEvent::PatRevoked(data) => serde_json::to_value(data)?,
            AccountEvent::RoleAssigned(data) => serde_json::to_value(data)?,
            AccountEvent::RoleRevoked(data) => serde_json::to_value(data)?,
        };
        Ok(EventData::new(event_type, data))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    #[default]
    Active,
    Suspended,
}

#[derive(Debug, Clone, Default)]
pub struct PatState {
    pub pat_id: String,
    pub key_hash: String,
    pub label: String,
    pub revoked: bool,
}

#[derive(Debug, Clone, Default)]
pub struct AccountState {
    pub exists: bool,
    pub account_id: String,
    pub username: String,
    pub status: AccountStatus,
    pub realms: Vec<String>,
    pub pats: Vec<PatState>,
    pub roles: BTreeMap<String, Role>,
}

impl AccountState {
    pub fn has_realm(&self, realm_id: &str) -> bool {
        self.realms.iter().any(|realm| realm == realm_id)
    }

    pub fn pat(&self, pat_id: &str) -> Option<&PatState> {
        self.pats.iter().find(|pat| pat.pat_id == pat_id)
    }
}

pub fn fold_account(events: &[Event]) -> Result<AccountState> {
    let mut state = AccountState::default();
    for event in events {
        let Some(decoded) = AccountEvent::decode(event)? else {
            continue;
        };
        match decoded {
            AccountEvent::Created(data) => {
                state.exists = true;
                state.account_id = data.account_id;
                state.username = data.username;
                state.status = AccountStatus::Active;
            }
            AccountEvent::Suspended(_) => {
                state.status = AccountStatus::Suspended;
            }
            AccountEvent::RealmGranted(data) => {
                if !state.has_realm(&data.realm_id) {
                    state.realms.push(data.realm_id);
                }
            }
            AccountEvent::RealmRevoked(data) => {
                state.realms.retain(|realm| realm != &data.realm_id);
            }
            AccountEvent::PatCreated(data) => {
                state.pats.push(PatState {
                    pat_id: data.pat_id,
                    key_hash: data.key_hash,
                    label: data.label,
                    revoked: false,
                });
            }
            AccountEvent::PatRevoked(data) => {
                if let Some(pat) = state.pats.iter_mut().find(|pat| pat.pat_id == data.pat_id) {
                    pat.revoked = true;
                }
            }
            AccountEvent::RoleAssigned(data) => {
                state.roles.insert(data.realm_id, data.role);
            }
            AccountEvent::RoleRevoked(data) => {
                state.roles.remove(&data.realm_id);
            }
        }
    }
    Ok(state)
}

// --- commands ---

#[derive(Debug, Clone, Deserialize)]
pub struct CreateAccount {
    pub username: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SuspendAccount {
    pub account_id: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GrantRealm {
    pub account_id: String,
    pub realm_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RevokeRealm {
    pub account_id: String,
    pub realm_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePat {
    pub account_id: String,
    pub label: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RevokePat {
    pub account_id: String,
    pub pat_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssignRole {
    pub account_id: String,
    pub realm_id: String,
    pub role: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RevokeRole {
    pub account_id: String,
    pub realm_id: String,
}

/// The raw token leaves the process exactly once, in this result.
#[derive(Debug, Clone, Serialize)]
pub struct CreateAccountOutcome {
    pub account_id: String,
    pub raw_token: String,
    #[serde(skip)]
    pub committed: Vec<Event>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatePatOutcome {
    pub pat_id: String,
    pub raw_token: String,
    #[serde(skip)]
    pub committed: Vec<Event>,
}

// --- handlers ---

fn read_account(account_id: &str, events: &dyn EventStore) -> Result<(AccountState, u64)> {
    let stream = events.read_stream(ADMIN_REALM_ID, &account_stream_id(account_id), 0)?;
    if stream.is_empty() {
        return Err(ForgeError::not_found("account", account_id));
    }
    let state = fold_account(&stream)?;
    Ok((state, stream.len() as u64))
}

pub fn handle_create_account(
    cmd: CreateAccount,
    events: &dyn EventStore,
) -> Result<CreateAccountOutcome> {
    if cmd.username.trim().is_empty() {
        return Err(ForgeError::validation("username cannot be empty"));
    }

    let account_id = new_account_id();
    let (raw_token, key_hash) = generate_pat_secret();

    let created = AccountEvent::Created(AccountCreated {
        account_id: account_id.clone(),
        username: cmd.username,
    });
    let initial_pat = AccountEvent::PatCreated(PatCreated {
        account_id: account_id.clone(),
        pat_id: new_pat_id(),
        key_hash,
        label: "default".to_string(),
    });

    let committed = events.append(
        ADMIN_REALM_ID,
        &account_stream_id(&account_id),
        0,
        &[created.into_event_data()?, initial_pat.into_event_data()?],
    )?;
    Ok(CreateAccountOutcome {
        account_id,
        raw_token,
        committed,
    })
}

pub fn handle_suspend_account(cmd: SuspendAccount, events: &dyn EventStore) -> Result<Vec<Event>> {
    let (state, version) = read_account(&cmd.account_id, events)?;
    if state.status == AccountStatus::Suspended {
        return Err(ForgeError::validation(format!(
            "account {:?} is already suspended",
            cmd.account_id
        )));
    }

    let suspended = AccountEvent::Suspended(AccountSuspended {
        account_id: cmd.account_id.clone(),
        reason: cmd.reason,
    });
    events.append(
        ADMIN_REALM_ID,
        &account_stream_id(&cmd.account_id),
        version,
        &[suspended.into_event_data()?],
    )
}

pub fn handle_grant_realm(cmd: GrantRealm, events: &dyn EventStore) -> Result<Vec<Event>> {
    let (state, version) = read_account(&cmd.account_id, events)?;
    if state.has_realm(&cmd.realm_id) {
        return Err(ForgeError::validation(format!(
            "realm {:?} already granted to account {:?}",
            cmd.realm_id, cmd.account_id
        )));
    }

    let granted = AccountEvent::RealmGranted(RealmGranted {
        account_id: cmd.account_id.clone(),
        realm_id: cmd.realm_id,
    });
    events.append(
        ADMIN_REALM_ID,
        &account_stream_id(&cmd.account_id),
        version,
        &[granted.into_event_data()?],
    )
}

pub fn handle_revoke_realm(cmd: RevokeRealm, events: &dyn EventStore) -> Result<Vec<Event>> {
    let (state, version) = read_account(&cmd.account_id, events)?;
    if !state.has_realm(&cmd.realm_id) {
        return Err(ForgeError::validation(format!(
            "realm {:?} is not granted to account {:?}",
            cmd.realm_id, cmd.account_id
        )));
    }

    let revoked = AccountEvent::RealmRevoked(RealmRevoked {
        account_id: cmd.account_id.clone(),
        realm_id: cmd.realm_id,
    });
    events.append(
        ADMIN_REALM_ID,
        &account_stream_id(&cmd.account_id),
        version,
        &[revoked.into_event_data()?],
    )
}

pub fn handle_create_pat(cmd: CreatePat, events: &dyn EventStore) -> Result<CreatePatOutcome> {
    let (state, version) = read_account(&cmd.account_id, events)?;
    if state.status == AccountStatus::Suspended {
        return Err(ForgeError::validation(format!(
            "cannot create PAT for suspended account {:?}",
            cmd.account_id
        )));
    }

    let pat_id = new_pat_id();
    let (raw_token, key_hash) = generate_pat_secret();
    let created = AccountEvent::PatCreated(PatCreated {
        account_id: cmd.account_id.clone(),
        pat_id: pat_id.clone(),
        key_hash,
        label: cmd.label,
    });

    let committed = events.append(
        ADMIN_REALM_ID,
        &account_stream_id(&cmd.account_id),
        version,
        &[created.into_event_data()?],
    )?;
    Ok(CreatePatOutcome {
        pat_id,
        raw_token,
        committed,
    })
}

pub fn handle_revoke_pat(cmd: RevokePat, events: &dyn EventStore) -> Result<Vec<Event>> {
    let (state, version) = read_account(&cmd.account_id, events)?;
    let pat = state
        .pat(&cmd.pat_id)
        .ok_or_else(|| ForgeError::not_found("pat", &cmd.pat_id))?;
    if pat.revoked {
        return Err(ForgeError::validation(format!(
            "PAT {:?} is already revoked",
            cmd.pat_id
        )));
    }

    let revoked = AccountEvent::PatRevoked(PatRevoked {
        account_id: cmd.account_id.clone(),
        pat_id: cmd.pat_id,
    });
    events.append(
        ADMIN_REALM_ID,
        &account_stream_id(&cmd.account_id),
        version,
        &[revoked.into_event_data()?],
    )
}

pub fn handle_assign_role(cmd: AssignRole, events: &dyn EventStore) -> Result<Vec<Event>> {
    let role: Role = cmd.role.parse()?;
    let (_, version) = read_account(&cmd.account_id, events)?;

    let assigned = AccountEvent::RoleAssigned(RoleAssigned {
        account_id: cmd.account_id.clone(),
        realm_id: cmd.realm_id,
        role,
    });
    events.append(
        ADMIN_REALM_ID,
        &account_stream_id(&cmd.account_id),
        version,
        &[assigned.into_event_data()?],
    )
}

pub fn handle_revoke_role(cmd: RevokeRole, events: &dyn EventStore) -> Result<Vec<Event>> {
    let (state, version) = read_account(&cmd.account_id, events)?;
    if !state.roles.contains_key(&cmd.realm_id) {
        return Err(ForgeError::validation(format!(
            "no role assigned in realm {:?} for account {:?}",
            cmd.realm_id, cmd.account_id
        )));
    }

    let revoked = AccountEvent::RoleRevoked(RoleRevoked {
        account_id: cmd.account_id.clone(),
        realm_id: cmd.realm_id,
    });
    events.append(
        ADMIN_REALM_ID,
        &account_stream_id(&cmd.account_id),
        version,
        &[revoked.into_event_data()?],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::memory::MemoryEventStore;

    fn create(events: &MemoryEventStore) -> CreateAccountOutcome {
        handle_create_account(
            CreateAccount {
                username: "brokk".into(),
            },
            events,
        )
        .unwrap()
    }

    #[test]
    fn create_account_mints_a_default_pat() {
        let events = MemoryEventStore::new();
        let outcome = create(&events);

        let stream = events
            .read_stream(ADMIN_REALM_ID, &account_stream_id(&outcome.account_id), 0)
            .unwrap();
        assert_eq!(stream.len(), 2);
        assert_eq!(stream[0].event_type, EVENT_ACCOUNT_CREATED);
        assert_eq!(stream[1].event_type, EVENT_PAT_CREATED);

        let state = fold_account(&stream).unwrap();
        assert_eq!(state.username, "brokk");
        assert_eq!(state.pats.len(), 1);
        assert_eq!(state.pats[0].label, "default");
    }

    #[test]
    fn only_the_key_hash_is_persisted() {
        let events = MemoryEventStore::new();
        let outcome = create(&events);

        let stream = events
            .read_stream(ADMIN_REALM_ID, &account_stream_id(&outcome.account_id), 0)
            .unwrap();
        let state = fold_account(&stream).unwrap();

        let expected_hash = hash_raw_token(&outcome.raw_token).unwrap();
        assert_eq!(state.pats[0].key_hash, expected_hash);

        // the raw token never appears in any persisted payload
        for event in &stream {
            assert!(!event.data.to_string().contains(&outcome.raw_token));
        }
    }

    #[test]
    fn grants_are_tracked_and_deduplicated() {
        let events = MemoryEventStore::new();
        let outcome = create(&events);

        handle_grant_realm(
            GrantRealm {
                account_id: outcome.account_id.clone(),
                realm_id: "rf-aaaa".into(),
            },
            &events,
        )
        .unwrap();

        let err = handle_grant_realm(
            GrantRealm {
                account_id: outcome.account_id.clone(),
                realm_id: "rf-aaaa".into(),
            },
            &events,
        )
        .unwrap_err();
        assert!(matches!(err, ForgeError::Validation(_)));

        handle_revoke_realm(
            RevokeRealm {
                account_id: outcome.account_id.clone(),
                realm_id: "rf-aaaa".into(),
            },
            &events,
        )
        .unwrap();

        let err = handle_revoke_realm(
            RevokeRealm {
                account_id: outcome.account_id.clone(),
                realm_id: "rf-aaaa".into(),
            },
            &events,
        )
        .unwrap_err();
        assert!(matches!(err, ForgeError::Validation(_)));
    }

    #[test]
    fn pat_lifecycle_enforces_revocation_rules() {
        let events = MemoryEventStore::new();
        let outcome = create(&events);

        let pat = handle_create_pat(
            CreatePat {
                account_id: outcome.account_id.clone(),
                label: "ci".into(),
            },
            &events,
        )
        .unwrap();
        assert_ne!(pat.raw_token, outcome.raw_token);

        handle_revoke_pat(
            RevokePat {
                account_id: outcome.account_id.clone(),
                pat_id: pat.pat_id.clone(),
            },
            &events,
        )
        .unwrap();

        let err = handle_revoke_pat(
            RevokePat {
                account_id: outcome.account_id.clone(),
                pat_id: pat.pat_id.clone(),
            },
            &events,
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("PAT {:?} is already revoked", pat.pat_id)
        );

        let err = handle_revoke_pat(
            RevokePat {
                account_id: outcome.account_id.clone(),
                pat_id: "pat-missing".into(),
            },
            &events,
        )
        .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn suspended_accounts_cannot_mint_pats() {
        let events = MemoryEventStore::new();
        let outcome = create(&events);

        handle_suspend_account(
            SuspendAccount {
                account_id: outcome.account_id.clone(),
                reason: None,
            },
            &events,
        )
        .unwrap();

        let err = handle_create_pat(
            CreatePat {
                account_id: outcome.account_id.clone(),
                label: "ci".into(),
            },
            &events,
        )
        .unwrap_err();
        assert!(matches!(err, ForgeError::Validation(_)));

        let err = handle_suspend_account(
            SuspendAccount {
                account_id: outcome.account_id.clone(),
                reason: None,
            },
            &events,
        )
        .unwrap_err();
        assert!(matches!(err, ForgeError::Validation(_)));
    }

    #[test]
    fn roles_round_trip_through_the_fold() {
        let events = MemoryEventStore::new();
        let outcome = create(&events);

        let err = handle_assign_role(
            AssignRole {
                account_id: outcome.account_id.clone(),
                realm_id: "rf-aaaa".into(),
                role: "sorcerer".into(),
            },
            &events,
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "unknown role \"sorcerer\"");

        handle_assign_role(
            AssignRole {
                account_id: outcome.account_id.clone(),
                realm_id: "rf-aaaa".into(),
                role: "member".into(),
            },
            &events,
        )
        .unwrap();

        let stream = events
            .read_stream(ADMIN_REALM_ID, &account_stream_id(&outcome.account_id), 0)
            .unwrap();
        let state = fold_account(&stream).unwrap();
        assert_eq!(state.roles.get("rf-aaaa"), Some(&Role::Member));

        handle_revoke_role(
            RevokeRole {
                account_id: outcome.account_id.clone(),
                realm_id: "rf-aaaa".into(),
            },
            &events,
        )
        .unwrap();

        let err = handle_revoke_role(
            RevokeRole {
                account_id: outcome.account_id,
                realm_id: "rf-aaaa".into(),
            },
            &events,
        )
        .unwrap_err();
        assert!(matches!(err, ForgeError::Validation(_)));
    }
}
