//! runeforge: an event-sourced task tracker. Runes (tasks) live in
//! realms (tenants); every change is an immutable event in a per-stream
//! versioned log, and read models are maintained by projectors that
//! tail the log with durable checkpoints.

pub mod config;
pub mod core;
pub mod domain;
pub mod error;
pub mod logging;
pub mod sqlite;

pub use error::{ForgeError, Result};
