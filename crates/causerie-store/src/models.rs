//! Domain records persisted in the local SQLite database.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to the UI layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use causerie_shared::{Content, ConversationId, ConversationKind, MessageId, UserId};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A known user.  The id comes from the external auth provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub display_name: String,
    /// Opaque handle of the profile picture.
    pub profile_image: Option<String>,
    /// Free-text status line shown under the name.
    pub status_text: Option<String>,
    pub online: bool,
    /// Opaque handle of the chat background; applies to every conversation
    /// the user opens.
    pub wallpaper: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Editable profile fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub display_name: String,
    #[serde(default)]
    pub profile_image: Option<String>,
    #[serde(default)]
    pub status_text: Option<String>,
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// A durable channel of ordered messages among a fixed set of participants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    pub kind: ConversationKind,
    /// Display name, groups only.
    pub name: Option<String>,
    pub created_by: UserId,
    /// Sorted ascending.
    pub participant_ids: Vec<UserId>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn has_participant(&self, user: &UserId) -> bool {
        self.participant_ids.binary_search(user).is_ok()
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: Content,
    /// Assigned by the store when the write is accepted.
    pub sent_at: DateTime<Utc>,
    pub deleted: bool,
}

impl Message {
    /// Position of the message in its conversation's total order.
    pub fn order_key(&self) -> (DateTime<Utc>, MessageId) {
        (self.sent_at, self.id)
    }
}

/// Result of an append attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    /// A new message was written.
    Accepted(Message),
    /// The request id was already accepted inside the dedup window; this is
    /// the message written the first time.
    Duplicate(Message),
}

impl AppendOutcome {
    pub fn message(&self) -> &Message {
        match self {
            Self::Accepted(m) | Self::Duplicate(m) => m,
        }
    }

    pub fn into_message(self) -> Message {
        match self {
            Self::Accepted(m) | Self::Duplicate(m) => m,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}
