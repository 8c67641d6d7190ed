//! The per-conversation message log.
//!
//! Messages are never physically removed.  Ordering is `(sent_at, id)`
//! ascending; `sent_at` is clamped so it never goes backwards inside a
//! conversation and `id` is an AUTOINCREMENT rowid, so commit order and
//! list order agree.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use causerie_shared::{Content, ConversationId, MessageId, RequestId, UserId};

use crate::database::{column_micros, column_user_id, conversion_failure, Database};
use crate::error::{not_found, Result};
use crate::models::{AppendOutcome, Message};
use crate::unread::bump_unread_for_recipients;

const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, content_kind, body, sent_at, deleted";

impl Database {
    /// Append a message, assigning its id and `sent_at`.
    ///
    /// `now` is the server clock reading; the stored `sent_at` is
    /// `max(now, latest sent_at in the conversation)`.  When `request_id` was
    /// already accepted for this sender and conversation within
    /// `dedup_window`, the original message is returned and nothing is
    /// written.  Every other member's unread counter is bumped in the same
    /// transaction as the insert.
    pub fn append_message(
        &mut self,
        conversation_id: &ConversationId,
        sender_id: &UserId,
        content: &Content,
        request_id: Option<&RequestId>,
        now: DateTime<Utc>,
        dedup_window: Duration,
    ) -> Result<AppendOutcome> {
        let now_micros = now.timestamp_micros();
        let window_micros = i64::try_from(dedup_window.as_micros()).unwrap_or(i64::MAX);
        let cutoff = now_micros.saturating_sub(window_micros);

        let tx = self.conn_mut().transaction()?;

        tx.execute(
            "DELETE FROM append_requests WHERE accepted_at < ?1",
            params![cutoff],
        )?;

        if let Some(request_id) = request_id {
            let existing: Option<i64> = tx
                .query_row(
                    "SELECT message_id FROM append_requests
                     WHERE conversation_id = ?1 AND sender_id = ?2 AND request_id = ?3",
                    params![conversation_id.as_str(), sender_id.as_str(), request_id.0],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(message_id) = existing {
                let message = select_message(&tx, MessageId(message_id))?;
                tx.commit()?;
                return Ok(AppendOutcome::Duplicate(message));
            }
        }

        let latest: Option<i64> = tx.query_row(
            "SELECT MAX(sent_at) FROM messages WHERE conversation_id = ?1",
            params![conversation_id.as_str()],
            |row| row.get(0),
        )?;
        let sent_at_micros = latest.map_or(now_micros, |l| l.max(now_micros));

        tx.execute(
            "INSERT INTO messages (conversation_id, sender_id, content_kind, body, sent_at, deleted)
             VALUES (?1, ?2, ?3, ?4, ?5, 0)",
            params![
                conversation_id.as_str(),
                sender_id.as_str(),
                content.kind_str(),
                content.body(),
                sent_at_micros,
            ],
        )?;
        let id = MessageId(tx.last_insert_rowid());

        bump_unread_for_recipients(&tx, conversation_id, sender_id)?;

        if let Some(request_id) = request_id {
            tx.execute(
                "INSERT INTO append_requests
                    (conversation_id, sender_id, request_id, message_id, accepted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    conversation_id.as_str(),
                    sender_id.as_str(),
                    request_id.0,
                    id.0,
                    now_micros,
                ],
            )?;
        }

        let message = select_message(&tx, id)?;
        tx.commit()?;

        Ok(AppendOutcome::Accepted(message))
    }

    /// Every visible message of the conversation in ascending
    /// `(sent_at, id)` order.
    pub fn list_messages_ordered(&self, conversation_id: &ConversationId) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM messages
             WHERE conversation_id = ?1 AND deleted = 0
             ORDER BY sent_at ASC, id ASC"
        ))?;

        let rows = stmt.query_map(params![conversation_id.as_str()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Fetch a message by id, deleted or not.
    pub fn get_message(&self, id: MessageId) -> Result<Message> {
        select_message(self.conn(), id)
    }

    /// The most recent visible message of the conversation.
    pub fn last_visible_message(&self, conversation_id: &ConversationId) -> Result<Option<Message>> {
        Ok(self
            .conn()
            .query_row(
                &format!(
                    "SELECT {MESSAGE_COLUMNS}
                     FROM messages
                     WHERE conversation_id = ?1 AND deleted = 0
                     ORDER BY sent_at DESC, id DESC
                     LIMIT 1"
                ),
                params![conversation_id.as_str()],
                row_to_message,
            )
            .optional()?)
    }

    /// Mark a message deleted.  Returns the message (with `deleted = true`)
    /// and whether this call changed it.
    pub fn soft_delete_message(&self, id: MessageId) -> Result<(Message, bool)> {
        let mut message = self.get_message(id)?;
        let affected = self.conn().execute(
            "UPDATE messages SET deleted = 1 WHERE id = ?1 AND deleted = 0",
            params![id.0],
        )?;
        message.deleted = true;
        Ok((message, affected > 0))
    }

    /// Mark every visible message of the conversation deleted in a single
    /// statement.  Returns the number of messages cleared.
    pub fn clear_conversation_messages(&self, conversation_id: &ConversationId) -> Result<usize> {
        let affected = self.conn().execute(
            "UPDATE messages SET deleted = 1 WHERE conversation_id = ?1 AND deleted = 0",
            params![conversation_id.as_str()],
        )?;
        Ok(affected)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn select_message(conn: &Connection, id: MessageId) -> Result<Message> {
    conn.query_row(
        &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
        params![id.0],
        row_to_message,
    )
    .map_err(not_found)
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id: i64 = row.get(0)?;
    let conversation_id: String = row.get(1)?;
    let kind: String = row.get(3)?;
    let body: String = row.get(4)?;
    let deleted: i64 = row.get(6)?;

    let content = Content::from_parts(&kind, body).ok_or_else(|| {
        conversion_failure(
            3,
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unknown content kind '{kind}'"),
            ),
        )
    })?;

    Ok(Message {
        id: MessageId(id),
        conversation_id: ConversationId::from_raw(conversation_id),
        sender_id: column_user_id(row, 2)?,
        content,
        sent_at: column_micros(row, 5)?,
        deleted: deleted != 0,
    })
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use causerie_shared::{AttachmentRef, ConversationKind, MediaKind};

    use super::*;
    use crate::error::StoreError;
    use crate::models::Conversation;

    const WINDOW: Duration = Duration::from_secs(300);

    fn uid(s: &str) -> UserId {
        UserId::parse(s).unwrap()
    }

    fn setup() -> (Database, ConversationId) {
        let mut db = Database::open_in_memory().unwrap();
        let id = ConversationId::from_raw("u1_u2");
        db.create_conversation(&Conversation {
            id: id.clone(),
            kind: ConversationKind::Direct,
            name: None,
            created_by: uid("u1"),
            participant_ids: vec![uid("u1"), uid("u2")],
            created_at: Utc::now(),
        })
        .unwrap();
        (db, id)
    }

    fn text(s: &str) -> Content {
        Content::Text(s.into())
    }

    #[test]
    fn sent_at_never_goes_backwards() {
        let (mut db, conv) = setup();
        let later = Utc.timestamp_opt(2_000_000, 0).unwrap();
        let earlier = Utc.timestamp_opt(1_000_000, 0).unwrap();

        let first = db
            .append_message(&conv, &uid("u1"), &text("first"), None, later, WINDOW)
            .unwrap()
            .into_message();
        // A skewed clock reading must not reorder the log.
        let second = db
            .append_message(&conv, &uid("u2"), &text("second"), None, earlier, WINDOW)
            .unwrap()
            .into_message();

        assert_eq!(second.sent_at, first.sent_at);
        assert!(second.id > first.id);

        let listed: Vec<_> = db
            .list_messages_ordered(&conv)
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(listed, vec![text("first"), text("second")]);
    }

    #[test]
    fn request_id_deduplicates_within_window() {
        let (mut db, conv) = setup();
        let rid = RequestId("req-1".into());
        let t0 = Utc.timestamp_opt(1_000_000, 0).unwrap();

        let first = db
            .append_message(&conv, &uid("u1"), &text("hi"), Some(&rid), t0, WINDOW)
            .unwrap();
        assert!(first.is_new());

        let retry = db
            .append_message(
                &conv,
                &uid("u1"),
                &text("hi"),
                Some(&rid),
                t0 + chrono::Duration::seconds(10),
                WINDOW,
            )
            .unwrap();
        assert!(!retry.is_new());
        assert_eq!(retry.message().id, first.message().id);
        assert_eq!(db.list_messages_ordered(&conv).unwrap().len(), 1);

        // Outside the window the id is forgotten.
        let late = db
            .append_message(
                &conv,
                &uid("u1"),
                &text("hi"),
                Some(&rid),
                t0 + chrono::Duration::seconds(301),
                WINDOW,
            )
            .unwrap();
        assert!(late.is_new());
    }

    #[test]
    fn soft_delete_hides_but_keeps_the_row() {
        let (mut db, conv) = setup();
        let now = Utc::now();
        let m = db
            .append_message(&conv, &uid("u1"), &text("oops"), None, now, WINDOW)
            .unwrap()
            .into_message();

        let (deleted, changed) = db.soft_delete_message(m.id).unwrap();
        assert!(changed && deleted.deleted);
        let (_, changed_again) = db.soft_delete_message(m.id).unwrap();
        assert!(!changed_again);

        assert!(db.list_messages_ordered(&conv).unwrap().is_empty());
        assert!(db.get_message(m.id).unwrap().deleted);
        assert!(matches!(
            db.soft_delete_message(MessageId(9_999)),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn clear_then_append_survives() {
        let (mut db, conv) = setup();
        let now = Utc::now();
        for body in ["a", "b", "c"] {
            db.append_message(&conv, &uid("u1"), &text(body), None, now, WINDOW)
                .unwrap();
        }
        assert_eq!(db.clear_conversation_messages(&conv).unwrap(), 3);
        assert!(db.list_messages_ordered(&conv).unwrap().is_empty());
        assert_eq!(db.last_visible_message(&conv).unwrap(), None);

        let image = Content::Image(AttachmentRef {
            kind: MediaKind::Image,
            handle: "ref-123".into(),
        });
        let after = db
            .append_message(&conv, &uid("u2"), &image, None, now, WINDOW)
            .unwrap()
            .into_message();
        let listed = db.list_messages_ordered(&conv).unwrap();
        assert_eq!(listed, vec![after.clone()]);
        assert_eq!(db.last_visible_message(&conv).unwrap(), Some(after));
    }
}
