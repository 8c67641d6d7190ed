//! CRUD operations for [`Conversation`] records and their membership.

use rusqlite::{params, Connection};

use causerie_shared::{ConversationId, ConversationKind, UserId};

use crate::database::{column_rfc3339, column_user_id, conversion_failure, Database};
use crate::error::{not_found, Result};
use crate::models::Conversation;

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a conversation and its members in one transaction.
    pub fn create_conversation(&mut self, conversation: &Conversation) -> Result<()> {
        let tx = self.conn_mut().transaction()?;
        insert_conversation_row(&tx, conversation, false)?;
        insert_members(&tx, &conversation.id, &conversation.participant_ids)?;
        tx.commit()?;
        Ok(())
    }

    /// Insert `conversation` unless a record with the same id exists, then
    /// return the stored record.  The boolean is `true` when this call
    /// created it.
    pub fn get_or_create_conversation(
        &mut self,
        conversation: &Conversation,
    ) -> Result<(Conversation, bool)> {
        let tx = self.conn_mut().transaction()?;
        let created = insert_conversation_row(&tx, conversation, true)?;
        if created {
            insert_members(&tx, &conversation.id, &conversation.participant_ids)?;
        }
        tx.commit()?;

        Ok((self.get_conversation(&conversation.id)?, created))
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single conversation, participants included.
    pub fn get_conversation(&self, id: &ConversationId) -> Result<Conversation> {
        let mut conversation = self
            .conn()
            .query_row(
                "SELECT id, kind, name, created_by, created_at
                 FROM conversations
                 WHERE id = ?1",
                params![id.as_str()],
                row_to_conversation,
            )
            .map_err(not_found)?;

        conversation.participant_ids = self.conversation_members(id)?;
        Ok(conversation)
    }

    /// Participants of a conversation, sorted ascending.
    pub fn conversation_members(&self, id: &ConversationId) -> Result<Vec<UserId>> {
        let mut stmt = self.conn().prepare(
            "SELECT user_id FROM conversation_members
             WHERE conversation_id = ?1
             ORDER BY user_id ASC",
        )?;

        let rows = stmt.query_map(params![id.as_str()], |row| column_user_id(row, 0))?;

        let mut members = Vec::new();
        for row in rows {
            members.push(row?);
        }
        Ok(members)
    }

    /// Conversations the user participates in, most recent activity first.
    pub fn list_conversations_for_user(&self, user: &UserId) -> Result<Vec<Conversation>> {
        let ids: Vec<ConversationId> = {
            let mut stmt = self.conn().prepare(
                "SELECT c.id
                 FROM conversations c
                 JOIN conversation_members m ON m.conversation_id = c.id
                 WHERE m.user_id = ?1
                 ORDER BY COALESCE(
                     (SELECT MAX(sent_at) FROM messages
                      WHERE conversation_id = c.id AND deleted = 0),
                     0
                 ) DESC, c.created_at DESC",
            )?;

            let rows = stmt.query_map(params![user.as_str()], |row| {
                row.get::<_, String>(0).map(ConversationId::from_raw)
            })?;

            let mut ids = Vec::new();
            for row in rows {
                ids.push(row?);
            }
            ids
        };

        ids.iter().map(|id| self.get_conversation(id)).collect()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Returns `true` if a row was inserted.
fn insert_conversation_row(
    conn: &Connection,
    conversation: &Conversation,
    ignore_existing: bool,
) -> Result<bool> {
    let verb = if ignore_existing {
        "INSERT OR IGNORE"
    } else {
        "INSERT"
    };
    let affected = conn.execute(
        &format!(
            "{verb} INTO conversations (id, kind, name, created_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)"
        ),
        params![
            conversation.id.as_str(),
            conversation.kind.as_str(),
            conversation.name,
            conversation.created_by.as_str(),
            conversation.created_at.to_rfc3339(),
        ],
    )?;
    Ok(affected > 0)
}

fn insert_members(conn: &Connection, id: &ConversationId, members: &[UserId]) -> Result<()> {
    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO conversation_members (conversation_id, user_id) VALUES (?1, ?2)",
    )?;
    for member in members {
        stmt.execute(params![id.as_str(), member.as_str()])?;
    }
    Ok(())
}

/// Map a row to a [`Conversation`] with an empty participant list; callers
/// fill it in.
fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    let id: String = row.get(0)?;
    let kind_str: String = row.get(1)?;
    let kind = ConversationKind::from_db(&kind_str).ok_or_else(|| {
        conversion_failure(
            1,
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unknown conversation kind '{kind_str}'"),
            ),
        )
    })?;

    Ok(Conversation {
        id: ConversationId::from_raw(id),
        kind,
        name: row.get(2)?,
        created_by: column_user_id(row, 3)?,
        participant_ids: Vec::new(),
        created_at: column_rfc3339(row, 4)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::error::StoreError;

    fn uid(s: &str) -> UserId {
        UserId::parse(s).unwrap()
    }

    fn direct(a: &str, b: &str) -> Conversation {
        Conversation {
            id: ConversationId::from_raw(format!("{a}_{b}")),
            kind: ConversationKind::Direct,
            name: None,
            created_by: uid(a),
            participant_ids: vec![uid(a), uid(b)],
            created_at: Utc::now(),
        }
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let mut db = Database::open_in_memory().unwrap();
        let conv = direct("u1", "u2");

        let (first, created) = db.get_or_create_conversation(&conv).unwrap();
        assert!(created);
        let (second, created_again) = db.get_or_create_conversation(&conv).unwrap();
        assert!(!created_again);
        assert_eq!(first, second);
        assert_eq!(second.participant_ids, vec![uid("u1"), uid("u2")]);
    }

    #[test]
    fn duplicate_plain_insert_fails() {
        let mut db = Database::open_in_memory().unwrap();
        let conv = direct("u1", "u2");
        db.create_conversation(&conv).unwrap();
        assert!(db.create_conversation(&conv).is_err());
    }

    #[test]
    fn missing_conversation_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        let err = db
            .get_conversation(&ConversationId::from_raw("nope"))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[test]
    fn list_only_includes_memberships() {
        let mut db = Database::open_in_memory().unwrap();
        db.create_conversation(&direct("u1", "u2")).unwrap();
        db.create_conversation(&direct("u2", "u3")).unwrap();

        let for_u2 = db.list_conversations_for_user(&uid("u2")).unwrap();
        assert_eq!(for_u2.len(), 2);
        let for_u1 = db.list_conversations_for_user(&uid("u1")).unwrap();
        assert_eq!(for_u1.len(), 1);
        assert_eq!(for_u1[0].id.as_str(), "u1_u2");
    }
}
