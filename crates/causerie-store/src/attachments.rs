//! Registrations of opaque attachment references.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use causerie_shared::AttachmentRef;

use crate::database::Database;
use crate::error::Result;

impl Database {
    /// Record a reference.  Registering the same `(kind, handle)` twice is a
    /// no-op; returns `true` when a new row was written.
    pub fn register_attachment(&self, attachment: &AttachmentRef) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO attachments (id, kind, handle, registered_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                Uuid::new_v4().to_string(),
                attachment.kind.as_str(),
                attachment.handle,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(affected > 0)
    }

    pub fn is_attachment_registered(&self, attachment: &AttachmentRef) -> Result<bool> {
        let found: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM attachments WHERE kind = ?1 AND handle = ?2",
                params![attachment.kind.as_str(), attachment.handle],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}
