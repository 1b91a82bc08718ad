//! v001 -- Initial per-user post index.

use rusqlite::Connection;

const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Posts. `seq` is the creation order used for pagination.
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS posts (
    seq          INTEGER PRIMARY KEY AUTOINCREMENT,
    id           TEXT NOT NULL UNIQUE,
    body         TEXT NOT NULL,
    sender_id    TEXT NOT NULL,
    recipient_id TEXT,                       -- NULL = no recipient
    visibility   TEXT NOT NULL,              -- 'public' | 'private'
    created_at   TEXT NOT NULL               -- RFC-3339
);

-- ----------------------------------------------------------------
-- Attachments, in display order
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS post_files (
    post_id  TEXT NOT NULL,
    position INTEGER NOT NULL,
    hash     TEXT NOT NULL,                  -- BLAKE3 hex, file name in files/
    name     TEXT NOT NULL,
    size     INTEGER NOT NULL,

    PRIMARY KEY (post_id, position),
    FOREIGN KEY (post_id) REFERENCES posts(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_post_files_hash ON post_files(hash);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
