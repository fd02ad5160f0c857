use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (groups, memberships, messages)");
        conn.execute_batch(
            "
            CREATE TABLE groups (
                id          TEXT PRIMARY KEY,
                name        TEXT NOT NULL,
                owner_id    TEXT NOT NULL,
                visibility  TEXT NOT NULL CHECK (visibility IN ('public', 'private')),
                created_at  TEXT NOT NULL,
                UNIQUE(name, visibility)
            );

            CREATE TABLE memberships (
                group_id    TEXT NOT NULL REFERENCES groups(id),
                user_id     TEXT NOT NULL,
                joined_at   TEXT NOT NULL,
                PRIMARY KEY (group_id, user_id)
            );

            CREATE INDEX idx_memberships_user ON memberships(user_id);

            -- seq breaks created_at ties in insertion order.
            -- reply_to_id has no FK: grandchild replies survive a one-level cascade.
            CREATE TABLE messages (
                seq             INTEGER PRIMARY KEY AUTOINCREMENT,
                id              TEXT NOT NULL UNIQUE,
                group_id        TEXT NOT NULL REFERENCES groups(id),
                author_id       TEXT NOT NULL,
                text            TEXT NOT NULL,
                reply_to_id     TEXT,
                attachment_ref  TEXT,
                created_at      TEXT NOT NULL,
                edited_at       TEXT
            );

            CREATE INDEX idx_messages_group ON messages(group_id, created_at, seq);
            CREATE INDEX idx_messages_reply ON messages(reply_to_id);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
