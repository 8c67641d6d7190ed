//! Message Store: the ordered, append-only log of each conversation.
//!
//! All writes run inside [`DbHandle::with`], so id and `sent_at` assignment,
//! the commit and the hub notification form one critical section.  Hub
//! publication is a non-blocking channel send, so a slow listener can
//! never hold the lock.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info};

use causerie_shared::{ChatError, Content, ConversationId, MessageId, RequestId, UserId};
use causerie_store::{AppendOutcome, Message};

use crate::handle::DbHandle;
use crate::hub::{HubEvent, Snapshot, SnapshotSource, SubscriptionHub};

#[derive(Clone)]
pub struct MessageStore {
    db: DbHandle,
    hub: SubscriptionHub,
    dedup_window: Duration,
}

impl MessageStore {
    pub(crate) fn new(db: DbHandle, hub: SubscriptionHub, dedup_window: Duration) -> Self {
        Self {
            db,
            hub,
            dedup_window,
        }
    }

    /// Append a message and notify the conversation's listeners.
    ///
    /// A `request_id` already accepted for this sender and conversation
    /// inside the dedup window yields [`AppendOutcome::Duplicate`] with the
    /// original message; nothing is written or published in that case.
    pub fn append(
        &self,
        conversation_id: &ConversationId,
        sender_id: &UserId,
        content: &Content,
        request_id: Option<&RequestId>,
    ) -> Result<AppendOutcome, ChatError> {
        self.db.with(|db| {
            if let Err(e) = db.get_conversation(conversation_id) {
                return Err(match ChatError::from(e) {
                    ChatError::NotFound(_) => {
                        ChatError::NotFound(format!("conversation {conversation_id}"))
                    }
                    other => other,
                });
            }

            let outcome = db.append_message(
                conversation_id,
                sender_id,
                content,
                request_id,
                Utc::now(),
                self.dedup_window,
            )?;

            match &outcome {
                AppendOutcome::Accepted(message) => {
                    self.hub
                        .publish(conversation_id, HubEvent::Appended(message.clone()));
                    debug!(
                        conversation = %conversation_id,
                        message_id = message.id.0,
                        kind = content.kind_str(),
                        "Message appended"
                    );
                }
                AppendOutcome::Duplicate(message) => {
                    info!(
                        conversation = %conversation_id,
                        message_id = message.id.0,
                        "Duplicate append request, returning original"
                    );
                }
            }

            Ok(outcome)
        })
    }

    /// Full replay of visible messages in `(sent_at, id)` order.
    pub fn list_ordered(&self, conversation_id: &ConversationId) -> Result<Vec<Message>, ChatError> {
        self.db
            .with(|db| Ok(db.list_messages_ordered(conversation_id)?))
    }

    /// Most recent visible message, if any.
    pub fn last_visible(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<Message>, ChatError> {
        self.db
            .with(|db| Ok(db.last_visible_message(conversation_id)?))
    }

    /// Fetch a message, deleted or not.
    pub fn get(&self, id: MessageId) -> Result<Message, ChatError> {
        self.db
            .with(|db| db.get_message(id).map_err(|e| message_error(e, id)))
    }

    /// Soft-delete a message.  Deleting an already deleted message succeeds
    /// without notifying anyone.
    pub fn soft_delete(&self, id: MessageId) -> Result<Message, ChatError> {
        self.db.with(|db| {
            let (message, changed) = db
                .soft_delete_message(id)
                .map_err(|e| message_error(e, id))?;

            if changed {
                self.hub
                    .publish(&message.conversation_id, HubEvent::Retracted(id));
                info!(
                    conversation = %message.conversation_id,
                    message_id = id.0,
                    "Message deleted"
                );
            }

            Ok(message)
        })
    }

    /// Soft-delete every message of the conversation.  Serialised with
    /// `append`, so a racing append is either cleared or survives whole.
    pub fn clear_conversation(&self, conversation_id: &ConversationId) -> Result<usize, ChatError> {
        self.db.with(|db| {
            let cleared = db.clear_conversation_messages(conversation_id)?;
            if cleared > 0 {
                self.hub.publish(conversation_id, HubEvent::Cleared);
            }
            info!(conversation = %conversation_id, cleared, "Conversation cleared");
            Ok(cleared)
        })
    }

    /// This store as a snapshot source for hub subscriptions.
    pub fn snapshot_source(&self) -> Arc<dyn SnapshotSource> {
        Arc::new(self.clone())
    }
}

impl SnapshotSource for MessageStore {
    fn snapshot(&self, conversation_id: &ConversationId) -> Result<Snapshot, ChatError> {
        // Reading the sequence number under the same lock as the messages
        // ties the snapshot to an exact point in the update stream.
        self.db.with(|db| {
            let messages = db.list_messages_ordered(conversation_id)?;
            Ok(Snapshot {
                messages,
                seq: self.hub.current_seq(conversation_id),
            })
        })
    }
}

fn message_error(e: causerie_store::StoreError, id: MessageId) -> ChatError {
    match ChatError::from(e) {
        ChatError::NotFound(_) => ChatError::NotFound(format!("message {}", id.0)),
        other => other,
    }
}
