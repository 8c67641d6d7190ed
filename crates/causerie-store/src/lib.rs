//! # causerie-store
//!
//! SQLite persistence for the Causerie synchronization core.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for every domain
//! record: users, conversations, the message log, unread counters and
//! attachment registrations.  Callers are expected to serialize access to a
//! `Database` (the sync layer keeps it behind a mutex).

pub mod attachments;
pub mod conversations;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod unread;
pub mod users;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
