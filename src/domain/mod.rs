//! Domain command handlers and aggregates. Each handler reads the full
//! stream, folds it into a state, validates the command, and appends at
//! the version it observed.

use uuid::Uuid;

pub mod account;
pub mod projectors;
pub mod realm;
pub mod roles;
pub mod rune;

/// Reserved meta-realm holding realm and account management streams.
pub const ADMIN_REALM_ID: &str = "_admin";

/// Lowercase hex fragment of a fresh v4 UUID.
pub(crate) fn short_hex(len: usize) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    hex[..len].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_hex_is_lowercase_hex_of_requested_length() {
        let id = short_hex(8);
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
