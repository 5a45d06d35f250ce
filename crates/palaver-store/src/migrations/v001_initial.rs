//! v001 -- Initial schema creation.
//!
//! Users, uploaded files, personal messages, groups and group messages.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id         TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    name       TEXT NOT NULL,
    email      TEXT NOT NULL UNIQUE,
    phone      TEXT,
    about      TEXT,
    photo_url  TEXT,
    api_token  TEXT NOT NULL UNIQUE,        -- bearer credential
    created_at TEXT NOT NULL                -- RFC-3339, microsecond precision
);

-- ----------------------------------------------------------------
-- Blobs (uploaded file metadata, bytes live on disk)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS blobs (
    id           TEXT PRIMARY KEY NOT NULL, -- UUID v4
    uploader_id  TEXT NOT NULL,
    file_name    TEXT NOT NULL,
    content_type TEXT,
    file_size    INTEGER NOT NULL,
    blake3_hash  TEXT NOT NULL,
    created_at   TEXT NOT NULL,

    FOREIGN KEY (uploader_id) REFERENCES users(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Personal messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chat_messages (
    id            TEXT PRIMARY KEY NOT NULL,
    sender_id     TEXT NOT NULL,
    receiver_id   TEXT NOT NULL,
    body          TEXT,
    file_id       TEXT,
    reply_to      TEXT,
    call_metadata TEXT,                     -- JSON object, NULL for plain messages
    deleted_by    TEXT NOT NULL DEFAULT '[]', -- JSON array of user ids
    created_at    TEXT NOT NULL,

    FOREIGN KEY (sender_id) REFERENCES users(id) ON DELETE CASCADE,
    FOREIGN KEY (receiver_id) REFERENCES users(id) ON DELETE CASCADE,
    FOREIGN KEY (file_id) REFERENCES blobs(id) ON DELETE SET NULL,
    FOREIGN KEY (reply_to) REFERENCES chat_messages(id) ON DELETE SET NULL
);

CREATE INDEX IF NOT EXISTS idx_chat_messages_pair
    ON chat_messages(sender_id, receiver_id, created_at DESC);

-- ----------------------------------------------------------------
-- Groups
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS groups (
    id          TEXT PRIMARY KEY NOT NULL,
    name        TEXT NOT NULL,
    description TEXT,
    owner_id    TEXT NOT NULL,
    created_at  TEXT NOT NULL,

    FOREIGN KEY (owner_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS group_members (
    group_id  TEXT NOT NULL,
    user_id   TEXT NOT NULL,
    role      TEXT NOT NULL,                -- owner | member
    joined_at TEXT NOT NULL,

    PRIMARY KEY (group_id, user_id),
    FOREIGN KEY (group_id) REFERENCES groups(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_group_members_user ON group_members(user_id);

CREATE TABLE IF NOT EXISTS group_messages (
    id            TEXT PRIMARY KEY NOT NULL,
    group_id      TEXT NOT NULL,
    sender_id     TEXT NOT NULL,
    body          TEXT,
    file_id       TEXT,
    reply_to      TEXT,
    call_metadata TEXT,
    deleted_by    TEXT NOT NULL DEFAULT '[]',
    created_at    TEXT NOT NULL,

    FOREIGN KEY (group_id) REFERENCES groups(id) ON DELETE CASCADE,
    FOREIGN KEY (sender_id) REFERENCES users(id) ON DELETE CASCADE,
    FOREIGN KEY (file_id) REFERENCES blobs(id) ON DELETE SET NULL,
    FOREIGN KEY (reply_to) REFERENCES group_messages(id) ON DELETE SET NULL
);

CREATE INDEX IF NOT EXISTS idx_group_messages_group_ts
    ON group_messages(group_id, created_at DESC);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
