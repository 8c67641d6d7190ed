//! Conversation Manager: the entry point for every client action.
//!
//! Resolves conversation identity, enforces membership and content rules,
//! appends through the [`MessageStore`] and keeps unread counters. Profile,
//! wallpaper and presence operations are routed here too so a UI layer only
//! needs one handle.

use std::collections::BTreeSet;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info};

use causerie_shared::{
    AttachmentRef, ChatError, Content, ConversationId, ConversationKind, MediaKind, MessageId,
    RequestId, UserId,
};
use causerie_store::{Conversation, Database, Message, ProfileUpdate, User};

use crate::attachments::AttachmentResolver;
use crate::config::SyncConfig;
use crate::handle::DbHandle;
use crate::hub::{HubSettings, StreamHandler, Subscription, SubscriptionHandle, SubscriptionHub};
use crate::identity;
use crate::message_store::MessageStore;
use crate::presence::PresenceTracker;

/// One row of a user's conversation list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub conversation: Conversation,
    pub last_message: Option<Message>,
    pub unread: u32,
}

#[derive(Clone)]
pub struct ConversationManager {
    db: DbHandle,
    hub: SubscriptionHub,
    messages: MessageStore,
    presence: PresenceTracker,
    attachments: AttachmentResolver,
    max_text_len: usize,
}

impl ConversationManager {
    /// Open the configured database and wire up every component.
    pub fn open(config: &SyncConfig) -> Result<Self, ChatError> {
        let db = DbHandle::open(&config.database)?;
        info!(database = ?config.database, "Synchronization core ready");
        Ok(Self::from_handle(db, config))
    }

    /// Build on an already opened database.
    pub fn with_database(db: Database, config: &SyncConfig) -> Self {
        Self::from_handle(DbHandle::new(db), config)
    }

    fn from_handle(db: DbHandle, config: &SyncConfig) -> Self {
        let hub = SubscriptionHub::new(HubSettings::from(config));
        Self {
            messages: MessageStore::new(db.clone(), hub.clone(), config.dedup_window),
            presence: PresenceTracker::new(db.clone(), hub.clone()),
            attachments: AttachmentResolver::new(db.clone(), config.max_handle_len),
            max_text_len: config.max_text_len,
            hub,
            db,
        }
    }

    pub fn messages(&self) -> &MessageStore {
        &self.messages
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn attachments(&self) -> &AttachmentResolver {
        &self.attachments
    }

    pub fn hub(&self) -> &SubscriptionHub {
        &self.hub
    }

    // ------------------------------------------------------------------
    // Conversations
    // ------------------------------------------------------------------

    /// The direct conversation between two users, created on first use.
    pub fn open_direct(&self, user: &UserId, other: &UserId) -> Result<Conversation, ChatError> {
        if user == other {
            return Err(ChatError::InvalidMembership(
                "a direct conversation needs two distinct users".into(),
            ));
        }

        let mut participant_ids = vec![user.clone(), other.clone()];
        participant_ids.sort();

        let record = Conversation {
            id: identity::resolve_direct(user, other),
            kind: ConversationKind::Direct,
            name: None,
            created_by: user.clone(),
            participant_ids,
            created_at: Utc::now(),
        };

        let (conversation, created) = self
            .db
            .with(|db| Ok(db.get_or_create_conversation(&record)?))?;
        if created {
            info!(conversation = %conversation.id, "Direct conversation created");
        }
        Ok(conversation)
    }

    /// Create a group of the creator plus at least two other members.
    pub fn create_group(
        &self,
        creator: &UserId,
        members: &[UserId],
        name: Option<String>,
    ) -> Result<Conversation, ChatError> {
        let others: BTreeSet<&UserId> = members.iter().filter(|m| *m != creator).collect();
        if others.len() < 2 {
            return Err(ChatError::InvalidMembership(format!(
                "a group needs at least 2 members besides the creator, got {}",
                others.len()
            )));
        }

        let mut participant_ids: Vec<UserId> = others.into_iter().cloned().collect();
        participant_ids.push(creator.clone());
        participant_ids.sort();

        let record = Conversation {
            id: identity::create_group(&participant_ids)?,
            kind: ConversationKind::Group,
            name: name
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty()),
            created_by: creator.clone(),
            participant_ids,
            created_at: Utc::now(),
        };

        self.db.with(|db| Ok(db.create_conversation(&record)?))?;
        info!(
            conversation = %record.id,
            members = record.participant_ids.len(),
            "Group created"
        );
        Ok(record)
    }

    pub fn conversation(&self, id: &ConversationId) -> Result<Conversation, ChatError> {
        self.db
            .with(|db| Ok(db.get_conversation(id)?))
            .map_err(|e| conversation_error(e, id))
    }

    /// The user's conversations, most recent activity first.
    pub fn conversations_for(&self, user: &UserId) -> Result<Vec<ConversationSummary>, ChatError> {
        self.db.with(|db| {
            let mut summaries = Vec::new();
            for conversation in db.list_conversations_for_user(user)? {
                let last_message = db.last_visible_message(&conversation.id)?;
                let unread = db.unread_count(user, &conversation.id)?;
                summaries.push(ConversationSummary {
                    conversation,
                    last_message,
                    unread,
                });
            }
            Ok(summaries)
        })
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    /// Validate and append a message.  Every other participant's unread
    /// counter is bumped in the same commit as the message, before any
    /// listener sees it.  A retried `request_id` returns the original
    /// message and leaves the counters alone.
    pub fn send_message(
        &self,
        conversation_id: &ConversationId,
        sender: &UserId,
        content: Content,
        request_id: Option<&RequestId>,
    ) -> Result<Message, ChatError> {
        self.validate_content(&content)?;

        let conversation = self.conversation_for_send(conversation_id, sender)?;
        if !conversation.has_participant(sender) {
            return Err(ChatError::InvalidMembership(format!(
                "{sender} is not a participant of {conversation_id}"
            )));
        }

        let outcome = self
            .messages
            .append(conversation_id, sender, &content, request_id)?;

        Ok(outcome.into_message())
    }

    /// A direct conversation comes into existence with its first message.
    fn conversation_for_send(
        &self,
        conversation_id: &ConversationId,
        sender: &UserId,
    ) -> Result<Conversation, ChatError> {
        match self.conversation(conversation_id) {
            Err(ChatError::NotFound(reason)) => {
                match identity::participants_of_direct(conversation_id) {
                    Some((a, b)) if &a == sender => self.open_direct(&a, &b),
                    Some((a, b)) if &b == sender => self.open_direct(&b, &a),
                    _ => Err(ChatError::NotFound(reason)),
                }
            }
            other => other,
        }
    }

    fn validate_content(&self, content: &Content) -> Result<(), ChatError> {
        match content {
            Content::Text(text) => {
                if text.trim().is_empty() {
                    return Err(ChatError::InvalidContent("empty message".into()));
                }
                if text.len() > self.max_text_len {
                    return Err(ChatError::InvalidContent(format!(
                        "message exceeds {} bytes",
                        self.max_text_len
                    )));
                }
                Ok(())
            }
            Content::Image(r) => self.check_attachment(r, MediaKind::Image),
            Content::Audio(r) => self.check_attachment(r, MediaKind::Audio),
        }
    }

    fn check_attachment(&self, r: &AttachmentRef, expected: MediaKind) -> Result<(), ChatError> {
        if r.kind != expected {
            return Err(ChatError::InvalidAttachment(format!(
                "{} reference sent as {expected}",
                r.kind
            )));
        }
        self.attachments.check_handle(r)
    }

    /// Visible messages of an existing conversation, oldest first.
    pub fn list_messages(&self, conversation_id: &ConversationId) -> Result<Vec<Message>, ChatError> {
        self.conversation(conversation_id)?;
        self.messages.list_ordered(conversation_id)
    }

    pub fn delete_message(&self, id: MessageId) -> Result<Message, ChatError> {
        self.messages.soft_delete(id)
    }

    pub fn clear_conversation(&self, conversation_id: &ConversationId) -> Result<usize, ChatError> {
        self.conversation(conversation_id)?;
        self.messages.clear_conversation(conversation_id)
    }

    // ------------------------------------------------------------------
    // Unread counters
    // ------------------------------------------------------------------

    pub fn mark_read(&self, user: &UserId, conversation_id: &ConversationId) -> Result<(), ChatError> {
        let conversation = self.conversation(conversation_id)?;
        if !conversation.has_participant(user) {
            return Err(ChatError::InvalidMembership(format!(
                "{user} is not a participant of {conversation_id}"
            )));
        }
        self.db
            .with(|db| Ok(db.reset_unread(user, conversation_id)?))?;
        debug!(user = %user, conversation = %conversation_id, "Marked read");
        Ok(())
    }

    pub fn unread_count(
        &self,
        user: &UserId,
        conversation_id: &ConversationId,
    ) -> Result<u32, ChatError> {
        self.conversation(conversation_id)?;
        self.db
            .with(|db| Ok(db.unread_count(user, conversation_id)?))
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    pub fn upsert_profile(&self, user: &UserId, profile: &ProfileUpdate) -> Result<User, ChatError> {
        if profile.display_name.trim().is_empty() {
            return Err(ChatError::InvalidContent("display name is empty".into()));
        }
        let user = self.db.with(|db| Ok(db.upsert_user(user, profile)?))?;
        debug!(user = %user.id, "Profile saved");
        Ok(user)
    }

    pub fn user(&self, id: &UserId) -> Result<User, ChatError> {
        self.db
            .with(|db| Ok(db.get_user(id)?))
            .map_err(|e| match e {
                ChatError::NotFound(_) => ChatError::NotFound(format!("user {id}")),
                other => other,
            })
    }

    pub fn search_users(&self, query: &str) -> Result<Vec<User>, ChatError> {
        self.db.with(|db| Ok(db.search_users(query.trim())?))
    }

    /// The user's chat background.  The same wallpaper applies to every
    /// conversation the user opens.
    pub fn get_wallpaper(&self, user: &UserId) -> Result<Option<AttachmentRef>, ChatError> {
        let handle = self.db.with(|db| Ok(db.get_user_wallpaper(user)?))?;
        Ok(handle.map(|handle| AttachmentRef {
            kind: MediaKind::Image,
            handle,
        }))
    }

    /// Save or clear (`None`) the user's chat background.
    pub fn set_wallpaper(
        &self,
        user: &UserId,
        wallpaper: Option<&AttachmentRef>,
    ) -> Result<(), ChatError> {
        if let Some(r) = wallpaper {
            self.check_attachment(r, MediaKind::Image)?;
        }
        let handle = wallpaper.map(|r| r.handle.as_str());
        let found = self
            .db
            .with(|db| Ok(db.set_user_wallpaper(user, handle)?))?;
        if !found {
            return Err(ChatError::NotFound(format!("user {user}")));
        }
        debug!(user = %user, cleared = wallpaper.is_none(), "Wallpaper saved");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Presence
    // ------------------------------------------------------------------

    pub fn set_online(&self, user: &UserId, online: bool) -> Result<(), ChatError> {
        self.presence.set_online(user, online)
    }

    pub fn watch_presence(&self, user: &UserId) -> Result<watch::Receiver<bool>, ChatError> {
        self.presence.watch(user)
    }

    // ------------------------------------------------------------------
    // Listeners
    // ------------------------------------------------------------------

    /// Pull-based listener on an existing conversation.
    pub fn stream(&self, conversation_id: &ConversationId) -> Result<Subscription, ChatError> {
        self.conversation(conversation_id)?;
        Ok(self
            .hub
            .stream(conversation_id.clone(), self.messages.snapshot_source()))
    }

    /// Callback listener on an existing conversation.  Must be called from
    /// within a tokio runtime.
    pub fn subscribe<H: StreamHandler>(
        &self,
        conversation_id: &ConversationId,
        handler: H,
    ) -> Result<SubscriptionHandle, ChatError> {
        self.conversation(conversation_id)?;
        Ok(self.hub.subscribe(
            conversation_id.clone(),
            self.messages.snapshot_source(),
            handler,
        ))
    }

    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        self.hub.unsubscribe(handle)
    }
}

fn conversation_error(e: ChatError, id: &ConversationId) -> ChatError {
    match e {
        ChatError::NotFound(_) => ChatError::NotFound(format!("conversation {id}")),
        other => other,
    }
}
