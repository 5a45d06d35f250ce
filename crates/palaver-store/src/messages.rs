//! Personal and group messages.
//!
//! Deleting "for me" never removes a row: the viewer's id is appended to the
//! message's `deleted_by` JSON array and listings skip messages the viewer
//! has hidden.

use chrono::{DateTime, Utc};
use palaver_shared::{GroupId, MessageId, UserId};
use rusqlite::params;

use crate::database::Database;
use crate::error::{not_found, Result};
use crate::models::{Attachment, ChatMessage, GroupMessage, NewMessage};
use crate::sql::{self, json_col, json_opt_col, parse_col, parse_opt_col, ts_col};

const CHAT_SELECT: &str = "SELECT m.id, m.sender_id, m.receiver_id, m.body, m.reply_to,
        m.call_metadata, m.deleted_by, m.created_at,
        b.id, b.file_name, b.content_type, b.file_size, b.blake3_hash
    FROM chat_messages m LEFT JOIN blobs b ON b.id = m.file_id";

const GROUP_SELECT: &str = "SELECT m.id, m.group_id, m.sender_id, m.body, m.reply_to,
        m.call_metadata, m.deleted_by, m.created_at,
        b.id, b.file_name, b.content_type, b.file_size, b.blake3_hash
    FROM group_messages m LEFT JOIN blobs b ON b.id = m.file_id";

impl Database {
    // ------------------------------------------------------------------
    // Personal messages
    // ------------------------------------------------------------------

    pub fn insert_chat_message(
        &self,
        sender: UserId,
        receiver: UserId,
        message: &NewMessage,
    ) -> Result<ChatMessage> {
        let id = MessageId::new();
        self.conn().execute(
            "INSERT INTO chat_messages (id, sender_id, receiver_id, body, file_id, reply_to, call_metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id.to_string(),
                sender.to_string(),
                receiver.to_string(),
                message.body,
                message.file_id.map(|f| f.to_string()),
                message.reply_to.map(|r| r.to_string()),
                message
                    .call_metadata
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                sql::ts(&sql::now()),
            ],
        )?;
        self.get_chat_message(id)
    }

    pub fn get_chat_message(&self, id: MessageId) -> Result<ChatMessage> {
        self.conn()
            .query_row(
                &format!("{CHAT_SELECT} WHERE m.id = ?1"),
                params![id.to_string()],
                row_to_chat_message,
            )
            .map_err(not_found)
    }

    /// Conversation between `viewer` and `peer`, newest first, skipping
    /// messages the viewer has hidden.
    pub fn list_conversation(
        &self,
        viewer: UserId,
        peer: UserId,
        limit: u32,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<ChatMessage>> {
        let mut stmt = self.conn().prepare(&format!(
            "{CHAT_SELECT}
             WHERE ((m.sender_id = ?1 AND m.receiver_id = ?2)
                 OR (m.sender_id = ?2 AND m.receiver_id = ?1))
               AND NOT EXISTS (SELECT 1 FROM json_each(m.deleted_by) WHERE value = ?1)
               AND (?3 IS NULL OR m.created_at < ?3)
             ORDER BY m.created_at DESC, m.rowid DESC
             LIMIT ?4"
        ))?;

        let rows = stmt.query_map(
            params![
                viewer.to_string(),
                peer.to_string(),
                before.as_ref().map(sql::ts),
                limit,
            ],
            row_to_chat_message,
        )?;
        sql::collect(rows)
    }

    /// Hide a message from `user`'s view. Returns `false` if it was already
    /// hidden.
    pub fn hide_chat_message_for(&self, id: MessageId, user: UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE chat_messages
             SET deleted_by = json_insert(deleted_by, '$[#]', ?2)
             WHERE id = ?1
               AND NOT EXISTS (SELECT 1 FROM json_each(chat_messages.deleted_by) WHERE value = ?2)",
            params![id.to_string(), user.to_string()],
        )?;
        if affected == 0 {
            // Distinguish "already hidden" from "no such message".
            self.get_chat_message(id)?;
        }
        Ok(affected > 0)
    }

    /// Remove a message for both parties.
    pub fn delete_chat_message(&self, id: MessageId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM chat_messages WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Group messages
    // ------------------------------------------------------------------

    pub fn insert_group_message(
        &self,
        group_id: GroupId,
        sender: UserId,
        message: &NewMessage,
    ) -> Result<GroupMessage> {
        let id = MessageId::new();
        self.conn().execute(
            "INSERT INTO group_messages (id, group_id, sender_id, body, file_id, reply_to, call_metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id.to_string(),
                group_id.to_string(),
                sender.to_string(),
                message.body,
                message.file_id.map(|f| f.to_string()),
                message.reply_to.map(|r| r.to_string()),
                message
                    .call_metadata
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                sql::ts(&sql::now()),
            ],
        )?;
        self.get_group_message(id)
    }

    pub fn get_group_message(&self, id: MessageId) -> Result<GroupMessage> {
        self.conn()
            .query_row(
                &format!("{GROUP_SELECT} WHERE m.id = ?1"),
                params![id.to_string()],
                row_to_group_message,
            )
            .map_err(not_found)
    }

    pub fn list_group_messages(
        &self,
        viewer: UserId,
        group_id: GroupId,
        limit: u32,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<GroupMessage>> {
        let mut stmt = self.conn().prepare(&format!(
            "{GROUP_SELECT}
             WHERE m.group_id = ?2
               AND NOT EXISTS (SELECT 1 FROM json_each(m.deleted_by) WHERE value = ?1)
               AND (?3 IS NULL OR m.created_at < ?3)
             ORDER BY m.created_at DESC, m.rowid DESC
             LIMIT ?4"
        ))?;

        let rows = stmt.query_map(
            params![
                viewer.to_string(),
                group_id.to_string(),
                before.as_ref().map(sql::ts),
                limit,
            ],
            row_to_group_message,
        )?;
        sql::collect(rows)
    }

    pub fn hide_group_message_for(&self, id: MessageId, user: UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE group_messages
             SET deleted_by = json_insert(deleted_by, '$[#]', ?2)
             WHERE id = ?1
               AND NOT EXISTS (SELECT 1 FROM json_each(group_messages.deleted_by) WHERE value = ?2)",
            params![id.to_string(), user.to_string()],
        )?;
        if affected == 0 {
            self.get_group_message(id)?;
        }
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn row_to_attachment(row: &rusqlite::Row<'_>, first: usize) -> rusqlite::Result<Option<Attachment>> {
    let Some(blob_id) = parse_opt_col(row, first)? else {
        return Ok(None);
    };
    Ok(Some(Attachment {
        blob_id,
        file_name: row.get(first + 1)?,
        content_type: row.get(first + 2)?,
        file_size: row.get(first + 3)?,
        blake3_hash: row.get(first + 4)?,
    }))
}

fn row_to_chat_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatMessage> {
    Ok(ChatMessage {
        id: parse_col(row, 0)?,
        sender_id: parse_col(row, 1)?,
        receiver_id: parse_col(row, 2)?,
        body: row.get(3)?,
        reply_to: parse_opt_col(row, 4)?,
        call_metadata: json_opt_col(row, 5)?,
        deleted_by: json_col(row, 6)?,
        created_at: ts_col(row, 7)?,
        file: row_to_attachment(row, 8)?,
    })
}

fn row_to_group_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<GroupMessage> {
    Ok(GroupMessage {
        id: parse_col(row, 0)?,
        group_id: parse_col(row, 1)?,
        sender_id: parse_col(row, 2)?,
        body: row.get(3)?,
        reply_to: parse_opt_col(row, 4)?,
        call_metadata: json_opt_col(row, 5)?,
        deleted_by: json_col(row, 6)?,
        created_at: ts_col(row, 7)?,
        file: row_to_attachment(row, 8)?,
    })
}
