use serde::{Deserialize, Serialize};

use crate::{
    core::{
        engine::Projector,
        event::Event,
        store::{ProjectionStore, ProjectionStoreExt},
    },
    domain::account::{AccountEvent, AccountStatus},
    error::Result,
};

/// Credential lookup keyed by PAT key hash. Consumers present a raw
/// token, hash it, and resolve the owning account in one read.
pub const ACCOUNT_LOOKUP: &str = "account_lookup";

/// Companion document keyed by account id. It remembers which key
/// hashes belong to the account so that suspensions and grant changes
/// can fan out to every active lookup entry.
pub const ACCOUNT_INDEX: &str = "account_index";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountLookupEntry {
    pub account_id: String,
    pub username: String,
    pub status: AccountStatus,
    pub realms: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct IndexedPat {
    pat_id: String,
    key_hash: String,
    revoked: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AccountIndexEntry {
    account_id: String,
    username: String,
    status: AccountStatus,
    realms: Vec<String>,
    pats: Vec<IndexedPat>,
}

impl AccountIndexEntry {
    fn lookup_entry(&self) -> AccountLookupEntry {
        AccountLookupEntry {
            account_id: self.account_id.clone(),
            username: self.username.clone(),
            status: self.status,
            realms: self.realms.clone(),
        }
    }
}

pub struct AccountLookupProjector;

impl AccountLookupProjector {
    fn load_index(
        &self,
        store: &dyn ProjectionStore,
        realm_id: &str,
        account_id: &str,
    ) -> Result<AccountIndexEntry> {
        store.get_as(realm_id, ACCOUNT_INDEX, account_id)
    }

    fn save_index(
        &self,
        store: &dyn ProjectionStore,
        realm_id: &str,
        index: &AccountIndexEntry,
    ) -> Result<()> {
        store.put_as(realm_id, ACCOUNT_INDEX, &index.account_id, index)
    }

    /// Rewrite the lookup entry behind every non-revoked PAT.
    fn refresh_lookups(
        &self,
        store: &dyn ProjectionStore,
        realm_id: &str,
        index: &AccountIndexEntry,
    ) -> Result<()> {
        let entry = index.lookup_entry();
        for pat in index.pats.iter().filter(|pat| !pat.revoked) {
            store.put_as(realm_id, ACCOUNT_LOOKUP, &pat.key_hash, &entry)?;
        }
        Ok(())
    }
}

impl Projector for AccountLookupProjector {
    fn name(&self) -> &str {
        ACCOUNT_LOOKUP
    }

    fn handle(&self, event: &Event, store: &dyn ProjectionStore) -> Result<()> {
        let Some(decoded) = AccountEvent::decode(event)? else {
            return Ok(());
        };
        let realm_id = event.realm_id.as_str();

        match decoded {
            AccountEvent::Created(data) => {
                let index = AccountIndexEntry {
                    account_id: data.account_id,
                    username: data.username,
                    status: AccountStatus::Active,
                    realms: Vec::new(),
                    pats: Vec::new(),
                };
                self.save_index(store, realm_id, &index)
            }
            AccountEvent::PatCreated(data) => {
                let mut index = self.load_index(store, realm_id, &data.account_id)?;
                let pat = IndexedPat {
                    pat_id: data.pat_id,
                    key_hash: data.key_hash.clone(),
                    revoked: false,
                };
                if !index.pats.contains(&pat) {
                    index.pats.push(pat);
                }
                store.put_as(realm_id, ACCOUNT_LOOKUP, &data.key_hash, &index.lookup_entry())?;
                self.save_index(store, realm_id, &index)
            }
            AccountEvent::PatRevoked(data) => {
                let mut index = self.load_index(store, realm_id, &data.account_id)?;
                if let Some(pat) = index.pats.iter_mut().find(|pat| pat.pat_id == data.pat_id) {
                    pat.revoked = true;
                    store.delete(realm_id, ACCOUNT_LOOKUP, &pat.key_hash)?;
                }
                self.save_index(store, realm_id, &index)
            }
            AccountEvent::Suspended(data) => {
                let mut index = self.load_index(store, realm_id, &data.account_id)?;
                index.status = AccountStatus::Suspended;
                self.refresh_lookups(store, realm_id, &index)?;
                self.save_index(store, realm_id, &index)
            }
            AccountEvent::RealmGranted(data) => {
                let mut index = self.load_index(store, realm_id, &data.account_id)?;
                if !index.realms.contains(&data.realm_id) {
                    index.realms.push(data.realm_id);
                }
                self.refresh_lookups(store, realm_id, &index)?;
                self.save_index(store, realm_id, &index)
            }
            AccountEvent::RealmRevoked(data) => {
                let mut index = self.load_index(store, realm_id, &data.account_id)?;
                index.realms.retain(|realm| realm != &data.realm_id);
                self.refresh_lookups(store, realm_id, &index)?;
                self.save_index(store, realm_id, &index)
            }
            // roles live in the account stream, not in the credential lookup
            AccountEvent::RoleAssigned(_) | AccountEvent::RoleRevoked(_) => Ok(()),
        }
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
        domain::{
            ADMIN_REALM_ID,
            account::{
                CreateAccount, CreatePat, GrantRealm, RevokePat, SuspendAccount,
                handle_create_account, handle_create_pat, handle_grant_realm, handle_revoke_pat,
                handle_suspend_account, hash_raw_token,
            },
        },
    };

    fn replay(events: &MemoryEventStore, projections: &MemoryProjectionStore) {
        let projector = AccountLookupProjector;
        for event in events.read_all(ADMIN_REALM_ID, 0).unwrap() {
            projector.handle(&event, projections).unwrap();
        }
    }

    #[test]
    fn raw_token_resolves_to_the_account_through_its_hash() {
        let events = MemoryEventStore::new();
        let projections = MemoryProjectionStore::new();

        let outcome = handle_create_account(
            CreateAccount {
                username: "brokk".into(),
            },
            &events,
        )
        .unwrap();
        handle_grant_realm(
            GrantRealm {
                account_id: outcome.account_id.clone(),
                realm_id: "rf-aaaa".into(),
            },
            &events,
        )
        .unwrap();
        replay(&events, &projections);

        let key_hash = hash_raw_token(&outcome.raw_token).unwrap();
        let entry: AccountLookupEntry = projections
            .get_as(ADMIN_REALM_ID, ACCOUNT_LOOKUP, &key_hash)
            .unwrap();
        assert_eq!(entry.account_id, outcome.account_id);
        assert_eq!(entry.username, "brokk");
        assert_eq!(entry.status, AccountStatus::Active);
        assert_eq!(entry.realms, vec!["rf-aaaa"]);
    }

    #[test]
    fn revoking_a_pat_removes_its_lookup_entry() {
        let events = MemoryEventStore::new();
        let projections = MemoryProjectionStore::new();

        let account = handle_create_account(
            CreateAccount {
                username: "brokk".into(),
            },
            &events,
        )
        .unwrap();
        let pat = handle_create_pat(
            CreatePat {
                account_id: account.account_id.clone(),
                label: "ci".into(),
            },
            &events,
        )
        .unwrap();
        handle_revoke_pat(
            RevokePat {
                account_id: account.account_id.clone(),
                pat_id: pat.pat_id.clone(),
            },
            &events,
        )
        .unwrap();
        replay(&events, &projections);

        let revoked_hash = hash_raw_token(&pat.raw_token).unwrap();
        assert!(projections
            .get(ADMIN_REALM_ID, ACCOUNT_LOOKUP, &revoked_hash)
            .unwrap_err()
            .is_not_found());

        // the default PAT from account creation still resolves
        let default_hash = hash_raw_token(&account.raw_token).unwrap();
        assert!(projections
            .get(ADMIN_REALM_ID, ACCOUNT_LOOKUP, &default_hash)
            .is_ok());
    }

    #[test]
    fn suspension_fans_out_to_every_active_lookup_entry() {
        let events = MemoryEventStore::new();
        let projections = MemoryProjectionStore::new();

        let account = handle_create_account(
            CreateAccount {
                username: "brokk".into(),
            },
            &events,
        )
        .unwrap();
        let pat = handle_create_pat(
            CreatePat {
                account_id: account.account_id.clone(),
                label: "ci".into(),
            },
            &events,
        )
        .unwrap();
        handle_suspend_account(
            SuspendAccount {
                account_id: account.account_id.clone(),
                reason: Some("left the guild".into()),
            },
            &events,
        )
        .unwrap();
        replay(&events, &projections);

        for raw in [&account.raw_token, &pat.raw_token] {
            let entry: AccountLookupEntry = projections
                .get_as(ADMIN_REALM_ID, ACCOUNT_LOOKUP, &hash_raw_token(raw).unwrap())
                .unwrap();
            assert_eq!(entry.status, AccountStatus::Suspended);
        }
    }

    #[test]
    fn replay_from_zero_is_idempotent() {
        let events = MemoryEventStore::new();
        let projections = MemoryProjectionStore::new();

        let account = handle_create_account(
            CreateAccount {
                username: "brokk".into(),
            },
            &events,
        )
        .unwrap();
        handle_grant_realm(
            GrantRealm {
                account_id: account.account_id.clone(),
                realm_id: "rf-aaaa".into(),
            },
            &events,
        )
        .unwrap();

        replay(&events, &projections);
        replay(&events, &projections);

        let key_hash = hash_raw_token(&account.raw_token).unwrap();
        let entry: AccountLookupEntry = projections
            .get_as(ADMIN_REALM_ID, ACCOUNT_LOOKUP, &key_hash)
            .unwrap();
        assert_eq!(entry.realms, vec!["rf-aaaa"]);
    }
}
