//! v001 -- Initial schema creation.
//!
//! Creates `users`, `conversations`, `conversation_members`, `messages`,
//! `append_requests`, `unread_counters` and `attachments`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id            TEXT PRIMARY KEY NOT NULL,   -- opaque id from the auth provider
    display_name  TEXT NOT NULL,
    profile_image TEXT,                        -- opaque image handle
    status_text   TEXT,
    online        INTEGER NOT NULL DEFAULT 0,  -- boolean 0/1
    wallpaper     TEXT,                        -- opaque image handle, user-scoped
    created_at    TEXT NOT NULL                -- RFC-3339
);

-- ----------------------------------------------------------------
-- Conversations
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS conversations (
    id         TEXT PRIMARY KEY NOT NULL,      -- "a_b" (direct) or "grp-<uuid>"
    kind       TEXT NOT NULL,                  -- 'direct' | 'group'
    name       TEXT,
    created_by TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS conversation_members (
    conversation_id TEXT NOT NULL,
    user_id         TEXT NOT NULL,

    PRIMARY KEY (conversation_id, user_id),
    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_members_user ON conversation_members(user_id);

-- ----------------------------------------------------------------
-- Messages (append-only log, soft delete)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,  -- never reused
    conversation_id TEXT NOT NULL,
    sender_id       TEXT NOT NULL,
    content_kind    TEXT NOT NULL,                      -- 'text' | 'image' | 'audio'
    body            TEXT NOT NULL,                      -- text or attachment handle
    sent_at         INTEGER NOT NULL,                   -- unix micros, server-assigned
    deleted         INTEGER NOT NULL DEFAULT 0,         -- boolean 0/1

    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation_order
    ON messages(conversation_id, sent_at, id);

-- ----------------------------------------------------------------
-- Request ids remembered for idempotent append retries
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS append_requests (
    conversation_id TEXT NOT NULL,
    sender_id       TEXT NOT NULL,
    request_id      TEXT NOT NULL,
    message_id      INTEGER NOT NULL,
    accepted_at     INTEGER NOT NULL,                   -- unix micros

    PRIMARY KEY (conversation_id, sender_id, request_id),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_append_requests_accepted ON append_requests(accepted_at);

-- ----------------------------------------------------------------
-- Unread counters
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS unread_counters (
    user_id         TEXT NOT NULL,
    conversation_id TEXT NOT NULL,
    count           INTEGER NOT NULL DEFAULT 0,

    PRIMARY KEY (user_id, conversation_id),
    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Attachment registrations
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS attachments (
    id            TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    kind          TEXT NOT NULL,               -- 'image' | 'audio'
    handle        TEXT NOT NULL,
    registered_at TEXT NOT NULL,

    UNIQUE (kind, handle)
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
