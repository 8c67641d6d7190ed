//! Per `(user, conversation)` unread counters.

use rusqlite::{params, Connection, OptionalExtension};

use causerie_shared::{ConversationId, UserId};

use crate::database::Database;
use crate::error::Result;

/// Add one to the counter of every member except `sender`.  Runs on the
/// caller's connection so it commits together with the message insert.
pub(crate) fn bump_unread_for_recipients(
    conn: &Connection,
    conversation_id: &ConversationId,
    sender_id: &UserId,
) -> Result<()> {
    conn.execute(
        "INSERT INTO unread_counters (user_id, conversation_id, count)
         SELECT user_id, conversation_id, 1 FROM conversation_members
         WHERE conversation_id = ?1 AND user_id <> ?2
         ON CONFLICT(user_id, conversation_id) DO UPDATE SET count = count + 1",
        params![conversation_id.as_str(), sender_id.as_str()],
    )?;
    Ok(())
}

impl Database {
    pub fn reset_unread(&self, user: &UserId, conversation_id: &ConversationId) -> Result<()> {
        self.conn().execute(
            "INSERT INTO unread_counters (user_id, conversation_id, count)
             VALUES (?1, ?2, 0)
             ON CONFLICT(user_id, conversation_id) DO UPDATE SET count = 0",
            params![user.as_str(), conversation_id.as_str()],
        )?;
        Ok(())
    }

    /// Current counter value; 0 when nothing was ever recorded.
    pub fn unread_count(&self, user: &UserId, conversation_id: &ConversationId) -> Result<u32> {
        let count: Option<u32> = self
            .conn()
            .query_row(
                "SELECT count FROM unread_counters WHERE user_id = ?1 AND conversation_id = ?2",
                params![user.as_str(), conversation_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(count.unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;

    use causerie_shared::{Content, ConversationKind, RequestId};

    use super::*;
    use crate::models::Conversation;

    const WINDOW: Duration = Duration::from_secs(300);

    fn send(db: &mut Database, conv: &ConversationId, sender: &UserId) {
        db.append_message(conv, sender, &Content::Text("hi".into()), None, Utc::now(), WINDOW)
            .unwrap();
    }

    #[test]
    fn appends_bump_recipients_and_reset_clears() {
        let mut db = Database::open_in_memory().unwrap();
        let u1 = UserId::parse("u1").unwrap();
        let u2 = UserId::parse("u2").unwrap();
        let conv = ConversationId::from_raw("u1_u2");
        db.create_conversation(&Conversation {
            id: conv.clone(),
            kind: ConversationKind::Direct,
            name: None,
            created_by: u1.clone(),
            participant_ids: vec![u1.clone(), u2.clone()],
            created_at: Utc::now(),
        })
        .unwrap();

        assert_eq!(db.unread_count(&u2, &conv).unwrap(), 0);
        send(&mut db, &conv, &u1);
        send(&mut db, &conv, &u1);
        assert_eq!(db.unread_count(&u2, &conv).unwrap(), 2);
        assert_eq!(db.unread_count(&u1, &conv).unwrap(), 0);

        db.reset_unread(&u2, &conv).unwrap();
        assert_eq!(db.unread_count(&u2, &conv).unwrap(), 0);
        send(&mut db, &conv, &u1);
        assert_eq!(db.unread_count(&u2, &conv).unwrap(), 1);
        // The sender's own messages never count against them.
        send(&mut db, &conv, &u2);
        assert_eq!(db.unread_count(&u1, &conv).unwrap(), 1);
    }

    #[test]
    fn duplicate_request_does_not_bump_again() {
        let mut db = Database::open_in_memory().unwrap();
        let u1 = UserId::parse("u1").unwrap();
        let u2 = UserId::parse("u2").unwrap();
        let conv = ConversationId::from_raw("u1_u2");
        db.create_conversation(&Conversation {
            id: conv.clone(),
            kind: ConversationKind::Direct,
            name: None,
            created_by: u1.clone(),
            participant_ids: vec![u1.clone(), u2.clone()],
            created_at: Utc::now(),
        })
        .unwrap();

        let rid = RequestId("req-7".into());
        let content = Content::Text("once".into());
        db.append_message(&conv, &u1, &content, Some(&rid), Utc::now(), WINDOW)
            .unwrap();
        let retry = db
            .append_message(&conv, &u1, &content, Some(&rid), Utc::now(), WINDOW)
            .unwrap();
        assert!(!retry.is_new());
        assert_eq!(db.unread_count(&u2, &conv).unwrap(), 1);
    }
}
