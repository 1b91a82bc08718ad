//! v001 -- Initial registry schema.
//!
//! Creates `users` and the single-row `my_user` marker.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id          TEXT PRIMARY KEY NOT NULL,   -- UUID v4 or caller-chosen slug
    name        TEXT NOT NULL,
    bio         TEXT,
    avatar_hash TEXT,                        -- BLAKE3 hex of a committed file
    created_at  TEXT NOT NULL                -- RFC-3339
);

-- ----------------------------------------------------------------
-- My user (at most one row)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS my_user (
    slot    INTEGER PRIMARY KEY NOT NULL CHECK (slot = 1),
    user_id TEXT NOT NULL,

    FOREIGN KEY (user_id) REFERENCES users(id)
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
