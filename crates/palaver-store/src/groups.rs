//! CRUD operations for [`Group`] records and their membership.

use palaver_shared::{GroupId, MemberRole, UserId};
use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::{not_found, Result};
use crate::models::{Group, GroupMember};
use crate::sql::{self, parse_col, ts_col};

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Create a group owned by `owner` with the given initial members.
    ///
    /// The owner is always a member; duplicates in `members` are ignored.
    pub fn create_group(
        &mut self,
        name: &str,
        description: Option<&str>,
        owner: UserId,
        members: &[UserId],
    ) -> Result<Group> {
        let group = Group {
            id: GroupId::new(),
            name: name.to_string(),
            description: description.map(str::to_string),
            owner_id: owner,
            created_at: sql::now(),
        };
        let created = sql::ts(&group.created_at);

        let tx = self.conn_mut().transaction()?;
        tx.execute(
            "INSERT INTO groups (id, name, description, owner_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                group.id.to_string(),
                group.name,
                group.description,
                owner.to_string(),
                created,
            ],
        )?;
        tx.execute(
            "INSERT INTO group_members (group_id, user_id, role, joined_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                group.id.to_string(),
                owner.to_string(),
                MemberRole::Owner.as_str(),
                created,
            ],
        )?;
        for member in members.iter().filter(|m| **m != owner) {
            tx.execute(
                "INSERT OR IGNORE INTO group_members (group_id, user_id, role, joined_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    group.id.to_string(),
                    member.to_string(),
                    MemberRole::Member.as_str(),
                    created,
                ],
            )?;
        }
        tx.commit()?;

        tracing::debug!(group = %group.id, members = members.len(), "created group");
        Ok(group)
    }

    /// Add a member. Returns `false` if they were already in the group.
    pub fn add_group_member(&self, group_id: GroupId, user_id: UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO group_members (group_id, user_id, role, joined_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                group_id.to_string(),
                user_id.to_string(),
                MemberRole::Member.as_str(),
                sql::ts(&sql::now()),
            ],
        )?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_group(&self, id: GroupId) -> Result<Group> {
        self.conn()
            .query_row(
                "SELECT id, name, description, owner_id, created_at
                 FROM groups WHERE id = ?1",
                params![id.to_string()],
                row_to_group,
            )
            .map_err(not_found)
    }

    /// Groups `user` belongs to, ordered by name.
    pub fn list_groups_for_user(&self, user: UserId) -> Result<Vec<Group>> {
        let mut stmt = self.conn().prepare(
            "SELECT g.id, g.name, g.description, g.owner_id, g.created_at
             FROM groups g
             JOIN group_members gm ON gm.group_id = g.id
             WHERE gm.user_id = ?1
             ORDER BY g.name COLLATE NOCASE ASC",
        )?;
        let rows = stmt.query_map(params![user.to_string()], row_to_group)?;
        sql::collect(rows)
    }

    pub fn list_group_members(&self, group_id: GroupId) -> Result<Vec<GroupMember>> {
        let mut stmt = self.conn().prepare(
            "SELECT group_id, user_id, role, joined_at
             FROM group_members WHERE group_id = ?1
             ORDER BY joined_at ASC, user_id ASC",
        )?;
        let rows = stmt.query_map(params![group_id.to_string()], |row| {
            Ok(GroupMember {
                group_id: parse_col(row, 0)?,
                user_id: parse_col(row, 1)?,
                role: parse_col(row, 2)?,
                joined_at: ts_col(row, 3)?,
            })
        })?;
        sql::collect(rows)
    }

    pub fn list_group_member_ids(&self, group_id: GroupId) -> Result<Vec<UserId>> {
        Ok(self
            .list_group_members(group_id)?
            .into_iter()
            .map(|m| m.user_id)
            .collect())
    }

    pub fn is_group_member(&self, group_id: GroupId, user_id: UserId) -> Result<bool> {
        let found = self
            .conn()
            .query_row(
                "SELECT 1 FROM group_members WHERE group_id = ?1 AND user_id = ?2",
                params![group_id.to_string(), user_id.to_string()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Remove a member. Returns `true` if a row was deleted.
    pub fn remove_group_member(&self, group_id: GroupId, user_id: UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM group_members WHERE group_id = ?1 AND user_id = ?2",
            params![group_id.to_string(), user_id.to_string()],
        )?;
        Ok(affected > 0)
    }
}

fn row_to_group(row: &rusqlite::Row<'_>) -> rusqlite::Result<Group> {
    Ok(Group {
        id: parse_col(row, 0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        owner_id: parse_col(row, 3)?,
        created_at: ts_col(row, 4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::tests::add_user;
    use crate::StoreError;

    #[test]
    fn test_create_group_with_members() {
        let mut db = Database::open_in_memory().unwrap();
        let alice = add_user(&db, "Alice");
        let bob = add_user(&db, "Bob");

        let group = db
            .create_group("Team", None, alice.id, &[bob.id, bob.id, alice.id])
            .unwrap();

        let members = db.list_group_members(group.id).unwrap();
        assert_eq!(members.len(), 2);
        let owner = members.iter().find(|m| m.user_id == alice.id).unwrap();
        assert_eq!(owner.role, MemberRole::Owner);
        assert!(db.is_group_member(group.id, bob.id).unwrap());
        assert_eq!(db.get_group(group.id).unwrap(), group);
    }

    #[test]
    fn test_membership_changes() {
        let mut db = Database::open_in_memory().unwrap();
        let alice = add_user(&db, "Alice");
        let bob = add_user(&db, "Bob");
        let group = db.create_group("Team", Some("desc"), alice.id, &[]).unwrap();

        assert!(db.add_group_member(group.id, bob.id).unwrap());
        assert!(!db.add_group_member(group.id, bob.id).unwrap());
        assert_eq!(db.list_groups_for_user(bob.id).unwrap().len(), 1);

        assert!(db.remove_group_member(group.id, bob.id).unwrap());
        assert!(!db.is_group_member(group.id, bob.id).unwrap());
        assert!(db.list_groups_for_user(bob.id).unwrap().is_empty());
    }

    #[test]
    fn test_missing_group() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(db.get_group(GroupId::new()), Err(StoreError::NotFound)));
    }
}
