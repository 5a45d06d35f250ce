//! v002 -- Call signaling tables.

use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS personal_calls (
    id            TEXT PRIMARY KEY NOT NULL,
    caller_id     TEXT NOT NULL,
    callee_id     TEXT NOT NULL,
    call_type     TEXT NOT NULL,            -- audio | video
    status        TEXT NOT NULL,            -- ringing | ongoing | ended | missed | rejected | cancelled
    channel_name  TEXT NOT NULL,
    created_at    TEXT NOT NULL,
    answered_at   TEXT,
    ended_at      TEXT,
    duration_secs INTEGER,

    CHECK (caller_id <> callee_id),
    FOREIGN KEY (caller_id) REFERENCES users(id) ON DELETE CASCADE,
    FOREIGN KEY (callee_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_personal_calls_caller ON personal_calls(caller_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_personal_calls_callee ON personal_calls(callee_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_personal_calls_status ON personal_calls(status);

CREATE TABLE IF NOT EXISTS group_calls (
    id            TEXT PRIMARY KEY NOT NULL,
    group_id      TEXT NOT NULL,
    host_id       TEXT NOT NULL,
    call_type     TEXT NOT NULL,
    status        TEXT NOT NULL,
    channel_name  TEXT NOT NULL,
    created_at    TEXT NOT NULL,
    started_at    TEXT,
    ended_at      TEXT,
    duration_secs INTEGER,

    FOREIGN KEY (group_id) REFERENCES groups(id) ON DELETE CASCADE,
    FOREIGN KEY (host_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_group_calls_group ON group_calls(group_id, created_at DESC);

CREATE TABLE IF NOT EXISTS group_call_participants (
    call_id   TEXT NOT NULL,
    user_id   TEXT NOT NULL,
    status    TEXT NOT NULL,                -- ringing | joined | declined | left | missed
    joined_at TEXT,
    left_at   TEXT,

    PRIMARY KEY (call_id, user_id),
    FOREIGN KEY (call_id) REFERENCES group_calls(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

-- Append-only; one row per state change of either call kind.
CREATE TABLE IF NOT EXISTS call_events (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    call_id    TEXT NOT NULL,
    call_kind  TEXT NOT NULL,               -- personal | group
    actor_id   TEXT,                        -- NULL for system transitions
    event      TEXT NOT NULL,
    metadata   TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_call_events_call ON call_events(call_id, id);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
