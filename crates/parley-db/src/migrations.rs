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
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                username        TEXT NOT NULL UNIQUE,
                password_hash   TEXT NOT NULL,
                avatar_file_id  INTEGER,
                created_at      TEXT NOT NULL DEFAULT (datetime('now'))
            );

            -- Blob bodies are stored elsewhere; only metadata is kept here
            CREATE TABLE files (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id        INTEGER NOT NULL REFERENCES users(id),
                original_name   TEXT NOT NULL,
                mime            TEXT NOT NULL,
                size            INTEGER NOT NULL,
                created_at      TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE dm_chats (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                user1_id    INTEGER NOT NULL REFERENCES users(id),
                user2_id    INTEGER NOT NULL REFERENCES users(id),
                CHECK (user1_id < user2_id),
                UNIQUE (user1_id, user2_id)
            );

            CREATE INDEX idx_dm_chats_user2 ON dm_chats(user2_id);

            CREATE TABLE messages (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id     INTEGER NOT NULL REFERENCES dm_chats(id),
                sender_id   INTEGER NOT NULL REFERENCES users(id),
                text        TEXT,
                created_at  TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX idx_messages_chat ON messages(chat_id, id);

            CREATE TABLE message_attachments (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id  INTEGER NOT NULL REFERENCES messages(id),
                file_id     INTEGER NOT NULL REFERENCES files(id),
                UNIQUE (message_id, file_id)
            );

            CREATE TABLE dm_reads (
                id                      INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id                 INTEGER NOT NULL REFERENCES dm_chats(id),
                user_id                 INTEGER NOT NULL REFERENCES users(id),
                last_read_message_id    INTEGER NOT NULL DEFAULT 0,
                updated_at              TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE (chat_id, user_id)
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
