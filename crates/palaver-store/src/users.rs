//! CRUD operations for [`User`] records.

use palaver_shared::UserId;
use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::{not_found, Result};
use crate::models::{NewUser, ProfileUpdate, User};
use crate::sql::{self, parse_col, ts_col};

const USER_COLUMNS: &str = "id, name, email, phone, about, photo_url, created_at";

impl Database {
    /// Register a user with the given bearer token.
    pub fn create_user(&self, new: &NewUser, api_token: &str) -> Result<User> {
        let user = User {
            id: UserId::new(),
            name: new.name.clone(),
            email: new.email.clone(),
            phone: new.phone.clone(),
            about: None,
            photo_url: None,
            created_at: sql::now(),
        };

        self.conn().execute(
            "INSERT INTO users (id, name, email, phone, api_token, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                user.id.to_string(),
                user.name,
                user.email,
                user.phone,
                api_token,
                sql::ts(&user.created_at),
            ],
        )?;

        tracing::debug!(user = %user.id, "created user");
        Ok(user)
    }

    pub fn get_user(&self, id: UserId) -> Result<User> {
        self.conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id.to_string()],
                row_to_user,
            )
            .map_err(not_found)
    }

    pub fn user_exists(&self, id: UserId) -> Result<bool> {
        let found = self
            .conn()
            .query_row(
                "SELECT 1 FROM users WHERE id = ?1",
                params![id.to_string()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<User> {
        self.conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
                params![email],
                row_to_user,
            )
            .map_err(not_found)
    }

    /// Resolve a bearer token to its user, `None` when unknown.
    pub fn get_user_by_token(&self, api_token: &str) -> Result<Option<User>> {
        let user = self
            .conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE api_token = ?1"),
                params![api_token],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    /// Everyone except `viewer`, optionally filtered by a name/email substring.
    pub fn list_contacts(&self, viewer: UserId, search: Option<&str>) -> Result<Vec<User>> {
        let pattern = search
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| format!("%{}%", s.replace('%', "\\%").replace('_', "\\_")));

        let mut stmt = self.conn().prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users
             WHERE id <> ?1
               AND (?2 IS NULL OR name LIKE ?2 ESCAPE '\\' OR email LIKE ?2 ESCAPE '\\')
             ORDER BY name COLLATE NOCASE ASC"
        ))?;

        let rows = stmt.query_map(params![viewer.to_string(), pattern], row_to_user)?;
        sql::collect(rows)
    }

    /// Apply a partial profile update and return the new state.
    pub fn update_profile(&self, id: UserId, update: &ProfileUpdate) -> Result<User> {
        let affected = self.conn().execute(
            "UPDATE users SET
                name      = COALESCE(?2, name),
                phone     = COALESCE(?3, phone),
                about     = COALESCE(?4, about),
                photo_url = COALESCE(?5, photo_url)
             WHERE id = ?1",
            params![
                id.to_string(),
                update.name,
                update.phone,
                update.about,
                update.photo_url,
            ],
        )?;
        if affected == 0 {
            return Err(crate::StoreError::NotFound);
        }
        self.get_user(id)
    }
}

pub(crate) fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: parse_col(row, 0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        phone: row.get(3)?,
        about: row.get(4)?,
        photo_url: row.get(5)?,
        created_at: ts_col(row, 6)?,
    })
}
