//! # causerie-sync
//!
//! The conversation synchronization core.
//!
//! - [`identity`] maps participant sets to stable conversation ids
//! - [`MessageStore`] owns the ordered per-conversation log
//! - [`SubscriptionHub`] fans committed updates out to listeners and carries
//!   per-user presence channels
//! - [`PresenceTracker`] persists and publishes online flags
//! - [`AttachmentResolver`] validates opaque media references
//! - [`ConversationManager`] ties them together behind one handle
//!
//! Everything is synchronous except listening: subscriptions are driven by
//! tokio channels and must be consumed inside a tokio runtime.

pub mod attachments;
pub mod config;
pub mod hub;
pub mod identity;
pub mod manager;
pub mod message_store;
pub mod presence;

mod backoff;
mod handle;

pub use attachments::AttachmentResolver;
pub use config::{DatabaseLocation, SyncConfig};
pub use hub::{
    HubSettings, Snapshot, SnapshotSource, StreamHandler, StreamUpdate, Subscription,
    SubscriptionHandle, SubscriptionHub,
};
pub use manager::{ConversationManager, ConversationSummary};
pub use message_store::MessageStore;
pub use presence::PresenceTracker;
