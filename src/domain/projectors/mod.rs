//! Built-in read models. Every projector tolerates at-least-once
//! delivery: replaying a realm's events from any checkpoint converges
//! on the same documents.

pub mod account_lookup;
pub mod realm_list;
pub mod rune_child_count;
pub mod rune_detail;
pub mod rune_list;

pub use account_lookup::{ACCOUNT_LOOKUP, AccountLookupEntry, AccountLookupProjector};
pub use realm_list::{REALM_LIST, RealmListEntry, RealmListProjector};
pub use rune_child_count::{RUNE_CHILD_COUNT, RuneChildCountProjector};
pub use rune_detail::{RUNE_DETAIL, RuneDetail, RuneDetailProjector};
pub use rune_list::{RUNE_LIST, RuneListProjector, RuneSummary};
