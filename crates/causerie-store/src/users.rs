//! CRUD operations for [`User`] records.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use causerie_shared::UserId;

use crate::database::{column_rfc3339, column_user_id, Database};
use crate::error::{not_found, Result, StoreError};
use crate::models::{ProfileUpdate, User};

const USER_COLUMNS: &str =
    "id, display_name, profile_image, status_text, online, wallpaper, created_at";

impl Database {
    // ------------------------------------------------------------------
    // Create / update
    // ------------------------------------------------------------------

    /// Insert a user or update the profile fields of an existing one.
    /// Presence and wallpaper are left untouched on update.
    pub fn upsert_user(&self, id: &UserId, profile: &ProfileUpdate) -> Result<User> {
        self.conn().execute(
            "INSERT INTO users (id, display_name, profile_image, status_text, online, created_at)
             VALUES (?1, ?2, ?3, ?4, 0, ?5)
             ON CONFLICT(id) DO UPDATE SET
                display_name  = excluded.display_name,
                profile_image = excluded.profile_image,
                status_text   = excluded.status_text",
            params![
                id.as_str(),
                profile.display_name,
                profile.profile_image,
                profile.status_text,
                Utc::now().to_rfc3339(),
            ],
        )?;
        self.get_user(id)
    }

    /// Set the online flag.  Returns `false` if the user does not exist.
    pub fn set_user_online(&self, id: &UserId, online: bool) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE users SET online = ?1 WHERE id = ?2",
            params![online as i32, id.as_str()],
        )?;
        Ok(affected > 0)
    }

    /// Save (or clear) the user's chat background.  Returns `false` if the
    /// user does not exist.
    pub fn set_user_wallpaper(&self, id: &UserId, handle: Option<&str>) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE users SET wallpaper = ?1 WHERE id = ?2",
            params![handle, id.as_str()],
        )?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_user(&self, id: &UserId) -> Result<User> {
        self.conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id.as_str()],
                row_to_user,
            )
            .map_err(not_found)
    }

    /// The saved wallpaper handle, `None` when unset or the user is unknown.
    pub fn get_user_wallpaper(&self, id: &UserId) -> Result<Option<String>> {
        let wallpaper: Option<Option<String>> = self
            .conn()
            .query_row(
                "SELECT wallpaper FROM users WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(wallpaper.flatten())
    }

    pub fn is_user_online(&self, id: &UserId) -> Result<bool> {
        self.conn()
            .query_row(
                "SELECT online FROM users WHERE id = ?1",
                params![id.as_str()],
                |row| row.get::<_, i64>(0),
            )
            .map(|v| v != 0)
            .map_err(not_found)
    }

    /// Case-insensitive substring search on display names, ordered by name.
    /// An empty query lists every user.
    pub fn search_users(&self, query: &str) -> Result<Vec<User>> {
        let pattern = format!("%{}%", escape_like(&query.to_lowercase()));
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users
             WHERE lower(display_name) LIKE ?1 ESCAPE '\\'
             ORDER BY display_name ASC"
        ))?;

        let rows = stmt.query_map(params![pattern], row_to_user)?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let online: i64 = row.get(4)?;
    Ok(User {
        id: column_user_id(row, 0)?,
        display_name: row.get(1)?,
        profile_image: row.get(2)?,
        status_text: row.get(3)?,
        online: online != 0,
        wallpaper: row.get(5)?,
        created_at: column_rfc3339(row, 6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(name: &str) -> ProfileUpdate {
        ProfileUpdate {
            display_name: name.into(),
            profile_image: None,
            status_text: None,
        }
    }

    fn uid(s: &str) -> UserId {
        UserId::parse(s).unwrap()
    }

    #[test]
    fn upsert_keeps_presence_and_wallpaper() {
        let db = Database::open_in_memory().unwrap();
        let alice = uid("alice");

        db.upsert_user(&alice, &profile("Alice")).unwrap();
        assert!(db.set_user_online(&alice, true).unwrap());
        assert!(db.set_user_wallpaper(&alice, Some("wp-1")).unwrap());

        let updated = db
            .upsert_user(
                &alice,
                &ProfileUpdate {
                    display_name: "Alice L.".into(),
                    profile_image: Some("img-9".into()),
                    status_text: Some("busy".into()),
                },
            )
            .unwrap();

        assert_eq!(updated.display_name, "Alice L.");
        assert_eq!(updated.profile_image.as_deref(), Some("img-9"));
        assert!(updated.online);
        assert_eq!(updated.wallpaper.as_deref(), Some("wp-1"));
    }

    #[test]
    fn unknown_users() {
        let db = Database::open_in_memory().unwrap();
        let ghost = uid("ghost");
        assert!(matches!(db.get_user(&ghost), Err(StoreError::NotFound)));
        assert!(!db.set_user_online(&ghost, true).unwrap());
        assert_eq!(db.get_user_wallpaper(&ghost).unwrap(), None);
    }

    #[test]
    fn search_is_case_insensitive_and_escapes_wildcards() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_user(&uid("u1"), &profile("Ravi Kumar")).unwrap();
        db.upsert_user(&uid("u2"), &profile("Priya")).unwrap();
        db.upsert_user(&uid("u3"), &profile("100% real")).unwrap();

        let hits = db.search_users("KUM").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, uid("u1"));

        assert_eq!(db.search_users("").unwrap().len(), 3);
        assert_eq!(db.search_users("%").unwrap().len(), 1);
    }
}
