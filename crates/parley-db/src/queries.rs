use std::collections::HashMap;

use crate::models::{AttachmentRow, ChatRow, MessageRow, UserRow};
use crate::Database;
use anyhow::Result;
use rusqlite::{Connection, params};

use parley_types::models::{Attachment, Message};
use parley_types::{ChatId, MessageId, UserId};

const USER_COLUMNS: &str = "id, username, password_hash, avatar_file_id, created_at";

impl Database {
    // -- Users --

    /// Returns `None` if the username is already taken.
    pub fn create_user(&self, username: &str, password_hash: &str) -> Result<Option<UserId>> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO users (username, password_hash) VALUES (?1, ?2)
                 ON CONFLICT (username) DO NOTHING",
                (username, password_hash),
            )?;
            Ok((inserted > 0).then(|| conn.last_insert_rowid()))
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            query_user(
                conn,
                &format!("SELECT {} FROM users WHERE username = ?1", USER_COLUMNS),
                params![username],
            )
        })
    }

    pub fn get_user_by_id(&self, id: UserId) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            query_user(
                conn,
                &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
                params![id],
            )
        })
    }

    /// Case-sensitive substring search on usernames, excluding `exclude`.
    pub fn search_users(&self, query: &str, exclude: UserId, limit: u32) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM users
                 WHERE instr(username, ?1) > 0 AND id != ?2
                 ORDER BY username ASC
                 LIMIT ?3",
                USER_COLUMNS
            ))?;

            let rows = stmt
                .query_map(params![query, exclude, limit], map_user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Files --

    /// Which of `file_ids` are known to the external file store. Keeps the
    /// first occurrence of each id, in request order.
    pub fn existing_files(&self, file_ids: &[i64]) -> Result<Vec<i64>> {
        if file_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT 1 FROM files WHERE id = ?1")?;
            let mut found = Vec::new();
            for &id in file_ids {
                if !found.contains(&id) && stmt.exists([id])? {
                    found.push(id);
                }
            }
            Ok(found)
        })
    }

    // -- Chats --

    /// Fetch the chat for an unordered pair, creating it (with zeroed read
    /// watermarks for both sides) if it does not exist yet.
    /// Returns (chat, created).
    pub fn get_or_create_chat(&self, a: UserId, b: UserId) -> Result<(ChatRow, bool)> {
        let (user1_id, user2_id) = if a < b { (a, b) } else { (b, a) };

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let existing = tx
                .query_row(
                    "SELECT id, user1_id, user2_id FROM dm_chats WHERE user1_id = ?1 AND user2_id = ?2",
                    params![user1_id, user2_id],
                    map_chat,
                )
                .optional()?;

            if let Some(chat) = existing {
                return Ok((chat, false));
            }

            tx.execute(
                "INSERT INTO dm_chats (user1_id, user2_id) VALUES (?1, ?2)",
                params![user1_id, user2_id],
            )?;
            let chat = ChatRow {
                id: tx.last_insert_rowid(),
                user1_id,
                user2_id,
            };

            for user_id in [user1_id, user2_id] {
                tx.execute(
                    "INSERT INTO dm_reads (chat_id, user_id, last_read_message_id) VALUES (?1, ?2, 0)",
                    params![chat.id, user_id],
                )?;
            }

            tx.commit()?;
            Ok((chat, true))
        })
    }

    pub fn get_chat(&self, chat_id: ChatId) -> Result<Option<ChatRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, user1_id, user2_id FROM dm_chats WHERE id = ?1",
                [chat_id],
                map_chat,
            )
            .optional()
        })
    }

    /// Most recently created chats first.
    pub fn list_chats_for_user(&self, user_id: UserId, limit: u32) -> Result<Vec<ChatRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user1_id, user2_id FROM dm_chats
                 WHERE user1_id = ?1 OR user2_id = ?1
                 ORDER BY id DESC
                 LIMIT ?2",
            )?;

            let rows = stmt
                .query_map(params![user_id, limit], map_chat)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Id of the newest message in `chat_id` not sent by `user_id`, or 0.
    pub fn last_incoming_id(&self, chat_id: ChatId, user_id: UserId) -> Result<MessageId> {
        self.with_conn(|conn| {
            let id = conn.query_row(
                "SELECT COALESCE(MAX(id), 0) FROM messages WHERE chat_id = ?1 AND sender_id != ?2",
                params![chat_id, user_id],
                |row| row.get(0),
            )?;
            Ok(id)
        })
    }

    // -- Messages --

    /// Insert a message and its attachment links in one transaction.
    /// Attachment ids that do not reference a known file are skipped.
    pub fn insert_message(
        &self,
        chat_id: ChatId,
        sender_id: UserId,
        text: Option<&str>,
        file_ids: &[i64],
    ) -> Result<(MessageRow, Vec<AttachmentRow>)> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            tx.execute(
                "INSERT INTO messages (chat_id, sender_id, text) VALUES (?1, ?2, ?3)",
                params![chat_id, sender_id, text],
            )?;
            let message_id = tx.last_insert_rowid();

            for file_id in file_ids {
                tx.execute(
                    "INSERT OR IGNORE INTO message_attachments (message_id, file_id)
                     SELECT ?1, id FROM files WHERE id = ?2",
                    params![message_id, file_id],
                )?;
            }

            let row = tx.query_row(
                "SELECT id, chat_id, sender_id, text, created_at FROM messages WHERE id = ?1",
                [message_id],
                map_message,
            )?;
            let attachments = query_attachments(&tx, &[message_id])?;

            tx.commit()?;
            Ok((row, attachments))
        })
    }

    /// The chat a message belongs to, if the message exists.
    pub fn get_message_chat(&self, message_id: MessageId) -> Result<Option<ChatId>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT chat_id FROM messages WHERE id = ?1",
                [message_id],
                |row| row.get(0),
            )
            .optional()
        })
    }

    /// One page of history in ascending id order. `before_id` is an exclusive
    /// upper bound on message ids.
    pub fn get_messages(
        &self,
        chat_id: ChatId,
        before_id: Option<MessageId>,
        limit: u32,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, chat_id, sender_id, text, created_at FROM messages
                 WHERE chat_id = ?1 AND (?2 IS NULL OR id < ?2)
                 ORDER BY id DESC
                 LIMIT ?3",
            )?;

            let mut rows = stmt
                .query_map(params![chat_id, before_id, limit], map_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.reverse();
            Ok(rows)
        })
    }

    /// Batch-fetch attachments for a set of message ids.
    pub fn get_attachments_for_messages(&self, message_ids: &[MessageId]) -> Result<Vec<AttachmentRow>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| query_attachments(conn, message_ids))
    }

    /// A page of history with each message's attachments resolved.
    pub fn get_history(
        &self,
        chat_id: ChatId,
        before_id: Option<MessageId>,
        limit: u32,
    ) -> Result<Vec<Message>> {
        let rows = self.get_messages(chat_id, before_id, limit)?;
        let ids: Vec<MessageId> = rows.iter().map(|r| r.id).collect();

        let mut by_message: HashMap<MessageId, Vec<Attachment>> = HashMap::new();
        for a in self.get_attachments_for_messages(&ids)? {
            by_message.entry(a.message_id).or_default().push(a.into_attachment());
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let attachments = by_message.remove(&row.id).unwrap_or_default();
                row.into_message(attachments)
            })
            .collect())
    }

    // -- Read watermarks --

    pub fn get_read_state(&self, chat_id: ChatId, user_id: UserId) -> Result<MessageId> {
        self.with_conn(|conn| {
            let watermark = conn
                .query_row(
                    "SELECT last_read_message_id FROM dm_reads WHERE chat_id = ?1 AND user_id = ?2",
                    params![chat_id, user_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(watermark.unwrap_or(0))
        })
    }

    /// Raise the watermark to `upto` if it is currently lower.
    /// Returns (advanced, watermark after the call).
    pub fn advance_read_watermark(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        upto: MessageId,
    ) -> Result<(bool, MessageId)> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            tx.execute(
                "INSERT OR IGNORE INTO dm_reads (chat_id, user_id, last_read_message_id) VALUES (?1, ?2, 0)",
                params![chat_id, user_id],
            )?;

            let changed = tx.execute(
                "UPDATE dm_reads
                 SET last_read_message_id = ?3, updated_at = datetime('now')
                 WHERE chat_id = ?1 AND user_id = ?2 AND last_read_message_id < ?3",
                params![chat_id, user_id, upto],
            )?;

            let watermark: MessageId = tx.query_row(
                "SELECT last_read_message_id FROM dm_reads WHERE chat_id = ?1 AND user_id = ?2",
                params![chat_id, user_id],
                |row| row.get(0),
            )?;

            tx.commit()?;
            Ok((changed > 0, watermark))
        })
    }
}

fn query_user(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(sql)?;
    stmt.query_row(params, map_user).optional()
}

fn query_attachments(conn: &Connection, message_ids: &[MessageId]) -> Result<Vec<AttachmentRow>> {
    let placeholders: Vec<String> = (1..=message_ids.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "SELECT ma.message_id, f.id, f.mime, f.original_name
         FROM message_attachments ma
         JOIN files f ON f.id = ma.file_id
         WHERE ma.message_id IN ({})
         ORDER BY ma.id",
        placeholders.join(", ")
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(message_ids.iter()), |row| {
            Ok(AttachmentRow {
                message_id: row.get(0)?,
                file_id: row.get(1)?,
                mime: row.get(2)?,
                original_name: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn map_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        password_hash: row.get(2)?,
        avatar_file_id: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn map_chat(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatRow> {
    Ok(ChatRow {
        id: row.get(0)?,
        user1_id: row.get(1)?,
        user2_id: row.get(2)?,
    })
}

fn map_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        sender_id: row.get(2)?,
        text: row.get(3)?,
        created_at: row.get(4)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
