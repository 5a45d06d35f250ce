//! Metadata for uploaded files.

use palaver_shared::{BlobId, UserId};
use rusqlite::params;

use crate::database::Database;
use crate::error::{not_found, Result};
use crate::models::BlobMeta;
use crate::sql::{self, parse_col, ts_col};

impl Database {
    pub fn insert_blob(&self, blob: &BlobMeta) -> Result<()> {
        self.conn().execute(
            "INSERT INTO blobs (id, uploader_id, file_name, content_type, file_size, blake3_hash, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                blob.id.to_string(),
                blob.uploader_id.to_string(),
                blob.file_name,
                blob.content_type,
                blob.file_size,
                blob.blake3_hash,
                sql::ts(&blob.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_blob_meta(&self, id: BlobId) -> Result<BlobMeta> {
        self.conn()
            .query_row(
                "SELECT id, uploader_id, file_name, content_type, file_size, blake3_hash, created_at
                 FROM blobs WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    Ok(BlobMeta {
                        id: parse_col(row, 0)?,
                        uploader_id: parse_col(row, 1)?,
                        file_name: row.get(2)?,
                        content_type: row.get(3)?,
                        file_size: row.get(4)?,
                        blake3_hash: row.get(5)?,
                        created_at: ts_col(row, 6)?,
                    })
                },
            )
            .map_err(not_found)
    }

    /// Whether `user` may read the blob: they uploaded it, or it is attached
    /// to a chat message they are a party to, or to a message in a group
    /// they belong to.
    pub fn blob_visible_to(&self, blob: BlobId, user: UserId) -> Result<bool> {
        let visible = self.conn().query_row(
            "SELECT EXISTS(SELECT 1 FROM blobs WHERE id = ?1 AND uploader_id = ?2)
                 OR EXISTS(SELECT 1 FROM chat_messages
                           WHERE file_id = ?1 AND (sender_id = ?2 OR receiver_id = ?2))
                 OR EXISTS(SELECT 1 FROM group_messages m
                           JOIN group_members gm ON gm.group_id = m.group_id
                           WHERE m.file_id = ?1 AND gm.user_id = ?2)",
            params![blob.to_string(), user.to_string()],
            |row| row.get(0),
        )?;
        Ok(visible)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::tests::add_user;
    use crate::{NewMessage, StoreError};

    fn photo(uploader: UserId) -> BlobMeta {
        BlobMeta {
            id: BlobId::new(),
            uploader_id: uploader,
            file_name: "photo.png".into(),
            content_type: Some("image/png".into()),
            file_size: 42,
            blake3_hash: "ab".repeat(32),
            created_at: sql::now(),
        }
    }

    #[test]
    fn test_insert_and_get() {
        let db = Database::open_in_memory().unwrap();
        let alice = add_user(&db, "Alice");
        let meta = photo(alice.id);

        db.insert_blob(&meta).unwrap();
        assert_eq!(db.get_blob_meta(meta.id).unwrap(), meta);
        assert!(matches!(db.get_blob_meta(BlobId::new()), Err(StoreError::NotFound)));
    }

    #[test]
    fn test_blob_visibility() {
        let mut db = Database::open_in_memory().unwrap();
        let alice = add_user(&db, "Alice");
        let bob = add_user(&db, "Bob");
        let carol = add_user(&db, "Carol");
        let dave = add_user(&db, "Dave");

        let direct = photo(alice.id);
        db.insert_blob(&direct).unwrap();
        assert!(db.blob_visible_to(direct.id, alice.id).unwrap());
        assert!(!db.blob_visible_to(direct.id, bob.id).unwrap());

        let attach = |file: BlobId| NewMessage {
            file_id: Some(file),
            ..Default::default()
        };
        db.insert_chat_message(alice.id, bob.id, &attach(direct.id)).unwrap();
        assert!(db.blob_visible_to(direct.id, bob.id).unwrap());
        assert!(!db.blob_visible_to(direct.id, carol.id).unwrap());

        let shared = photo(alice.id);
        db.insert_blob(&shared).unwrap();
        let group = db.create_group("Team", None, alice.id, &[carol.id]).unwrap();
        db.insert_group_message(group.id, alice.id, &attach(shared.id)).unwrap();
        assert!(db.blob_visible_to(shared.id, carol.id).unwrap());
        assert!(!db.blob_visible_to(shared.id, dave.id).unwrap());

        db.remove_group_member(group.id, carol.id).unwrap();
        assert!(!db.blob_visible_to(shared.id, carol.id).unwrap());
    }
}
