use crate::Database;
use crate::models::{GroupRow, MembershipRow, MessageRow};
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

/// Row counts removed by a group cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupCascade {
    pub messages: usize,
    pub memberships: usize,
}

impl Database {
    // -- Groups --

    /// Insert a group. For private groups the owner becomes the first member
    /// in the same transaction.
    pub fn create_group(&self, group: &GroupRow, owner_joined_at: Option<&str>) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO groups (id, name, owner_id, visibility, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![group.id, group.name, group.owner_id, group.visibility, group.created_at],
            )?;
            if let Some(joined_at) = owner_joined_at {
                tx.execute(
                    "INSERT INTO memberships (group_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
                    params![group.id, group.owner_id, joined_at],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_group(&self, id: &str) -> Result<Option<GroupRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM groups WHERE id = ?1", GroupRow::COLUMNS);
            Ok(conn.query_row(&sql, [id], GroupRow::from_row).optional()?)
        })
    }

    pub fn find_group_by_name(&self, name: &str, visibility: &str) -> Result<Option<GroupRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM groups WHERE name = ?1 AND visibility = ?2",
                GroupRow::COLUMNS
            );
            Ok(conn
                .query_row(&sql, [name, visibility], GroupRow::from_row)
                .optional()?)
        })
    }

    /// Returns false when no row matched.
    pub fn rename_group(&self, id: &str, name: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute("UPDATE groups SET name = ?1 WHERE id = ?2", [name, id])?;
            Ok(n > 0)
        })
    }

    pub fn list_groups_by_visibility(&self, visibility: &str) -> Result<Vec<GroupRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM groups WHERE visibility = ?1 ORDER BY name",
                GroupRow::COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([visibility], GroupRow::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Private groups the user is a member of.
    pub fn list_groups_for_member(&self, user_id: &str) -> Result<Vec<GroupRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT g.id, g.name, g.owner_id, g.visibility, g.created_at
                 FROM groups g
                 JOIN memberships m ON m.group_id = g.id
                 WHERE m.user_id = ?1 AND g.visibility = 'private'
                 ORDER BY g.name",
            )?;
            let rows = stmt
                .query_map([user_id], GroupRow::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Delete the group's messages, then its memberships, then the group row,
    /// all in one transaction. Any failure rolls back every step.
    pub fn delete_group_cascade(&self, id: &str) -> Result<GroupCascade> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let messages = tx.execute("DELETE FROM messages WHERE group_id = ?1", [id])?;
            let memberships = tx.execute("DELETE FROM memberships WHERE group_id = ?1", [id])?;
            let groups = tx.execute("DELETE FROM groups WHERE id = ?1", [id])?;
            if groups == 0 {
                anyhow::bail!("group {} vanished during cascade", id);
            }
            tx.commit()?;
            debug!(
                "Group {} cascade removed {} messages, {} memberships",
                id, messages, memberships
            );
            Ok(GroupCascade {
                messages,
                memberships,
            })
        })
    }

    // -- Memberships --

    pub fn is_member(&self, group_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM memberships WHERE group_id = ?1 AND user_id = ?2",
                    [group_id, user_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    pub fn insert_membership(&self, group_id: &str, user_id: &str, joined_at: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO memberships (group_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
                [group_id, user_id, joined_at],
            )?;
            Ok(())
        })
    }

    /// Returns false when no such membership existed.
    pub fn delete_membership(&self, group_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM memberships WHERE group_id = ?1 AND user_id = ?2",
                [group_id, user_id],
            )?;
            Ok(n > 0)
        })
    }

    pub fn list_members(&self, group_id: &str) -> Result<Vec<MembershipRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT group_id, user_id, joined_at FROM memberships WHERE group_id = ?1 ORDER BY joined_at, rowid",
            )?;
            let rows = stmt
                .query_map([group_id], |row| {
                    Ok(MembershipRow {
                        group_id: row.get(0)?,
                        user_id: row.get(1)?,
                        joined_at: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Messages --

    pub fn insert_message(&self, msg: &MessageRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, group_id, author_id, text, reply_to_id, attachment_ref, created_at, edited_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    msg.id,
                    msg.group_id,
                    msg.author_id,
                    msg.text,
                    msg.reply_to_id,
                    msg.attachment_ref,
                    msg.created_at,
                    msg.edited_at,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| query_message(conn, id))
    }

    /// Overwrite the editable fields. Returns false when no row matched.
    pub fn update_message(
        &self,
        id: &str,
        text: &str,
        reply_to_id: Option<&str>,
        attachment_ref: Option<&str>,
        edited_at: &str,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE messages SET text = ?1, reply_to_id = ?2, attachment_ref = ?3, edited_at = ?4 WHERE id = ?5",
                params![text, reply_to_id, attachment_ref, edited_at, id],
            )?;
            Ok(n > 0)
        })
    }

    /// Delete the direct replies of a message, then the message itself, in one
    /// transaction. Replies of replies are left alone. Returns the ids of the
    /// deleted replies.
    pub fn delete_message_cascade(&self, id: &str) -> Result<Vec<String>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let reply_ids = {
                let mut stmt =
                    tx.prepare("SELECT id FROM messages WHERE reply_to_id = ?1 ORDER BY seq")?;
                let ids = stmt
                    .query_map([id], |row| row.get::<_, String>(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                ids
            };
            tx.execute("DELETE FROM messages WHERE reply_to_id = ?1", [id])?;
            let n = tx.execute("DELETE FROM messages WHERE id = ?1", [id])?;
            if n == 0 {
                anyhow::bail!("message {} vanished during cascade", id);
            }
            tx.commit()?;
            Ok(reply_ids)
        })
    }

    /// Newest first; `created_at` ties resolve to the later insert first.
    pub fn list_messages(&self, group_id: &str, skip: u32, limit: u32) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM messages WHERE group_id = ?1
                 ORDER BY created_at DESC, seq DESC
                 LIMIT ?2 OFFSET ?3",
                MessageRow::COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![group_id, limit, skip], MessageRow::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn count_messages(&self, group_id: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE group_id = ?1",
                [group_id],
                |row| row.get(0),
            )?;
            Ok(n as usize)
        })
    }
}

fn query_message(conn: &Connection, id: &str) -> Result<Option<MessageRow>> {
    let sql = format!("SELECT {} FROM messages WHERE id = ?1", MessageRow::COLUMNS);
    Ok(conn.query_row(&sql, [id], MessageRow::from_row).optional()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::is_unique_violation;

    const T0: &str = "2024-01-01T00:00:00.000000Z";

    fn group(id: &str, name: &str, visibility: &str) -> GroupRow {
        GroupRow {
            id: id.into(),
            name: name.into(),
            owner_id: "owner".into(),
            visibility: visibility.into(),
            created_at: T0.into(),
        }
    }

    fn message(id: &str, group_id: &str, reply_to: Option<&str>, created_at: &str) -> MessageRow {
        MessageRow {
            id: id.into(),
            group_id: group_id.into(),
            author_id: "author".into(),
            text: format!("text of {}", id),
            reply_to_id: reply_to.map(String::from),
            attachment_ref: None,
            created_at: created_at.into(),
            edited_at: None,
        }
    }

    #[test]
    fn private_group_creation_adds_owner_membership() {
        let db = Database::open_in_memory().unwrap();
        db.create_group(&group("g1", "team", "private"), Some(T0)).unwrap();

        assert!(db.is_member("g1", "owner").unwrap());
        assert_eq!(db.list_groups_for_member("owner").unwrap().len(), 1);
    }

    #[test]
    fn duplicate_name_same_visibility_is_a_unique_violation() {
        let db = Database::open_in_memory().unwrap();
        db.create_group(&group("g1", "x", "public"), None).unwrap();
        db.create_group(&group("g2", "x", "private"), None).unwrap();

        let err = db.create_group(&group("g3", "x", "public"), None).unwrap_err();
        assert!(is_unique_violation(&err));
    }

    #[test]
    fn duplicate_membership_is_a_unique_violation() {
        let db = Database::open_in_memory().unwrap();
        db.create_group(&group("g1", "team", "private"), Some(T0)).unwrap();

        let err = db.insert_membership("g1", "owner", T0).unwrap_err();
        assert!(is_unique_violation(&err));
    }

    #[test]
    fn list_messages_breaks_timestamp_ties_by_insert_order() {
        let db = Database::open_in_memory().unwrap();
        db.create_group(&group("g1", "general", "public"), None).unwrap();
        db.insert_message(&message("a", "g1", None, T0)).unwrap();
        db.insert_message(&message("b", "g1", None, T0)).unwrap();
        db.insert_message(&message("c", "g1", None, "2024-01-01T00:00:01.000000Z"))
            .unwrap();

        let ids: Vec<String> = db
            .list_messages("g1", 0, 10)
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec!["c", "b", "a"]);

        let page: Vec<String> = db
            .list_messages("g1", 1, 1)
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(page, vec!["b"]);
    }

    #[test]
    fn message_cascade_is_one_level() {
        let db = Database::open_in_memory().unwrap();
        db.create_group(&group("g1", "general", "public"), None).unwrap();
        db.insert_message(&message("a", "g1", None, T0)).unwrap();
        db.insert_message(&message("b", "g1", Some("a"), T0)).unwrap();
        db.insert_message(&message("c", "g1", Some("b"), T0)).unwrap();

        let removed = db.delete_message_cascade("a").unwrap();
        assert_eq!(removed, vec!["b".to_string()]);
        assert!(db.get_message("a").unwrap().is_none());
        assert!(db.get_message("b").unwrap().is_none());
        assert!(db.get_message("c").unwrap().is_some());
    }

    #[test]
    fn group_cascade_rolls_back_on_failure() {
        let db = Database::open_in_memory().unwrap();
        db.create_group(&group("g1", "team", "private"), Some(T0)).unwrap();
        db.insert_message(&message("a", "g1", None, T0)).unwrap();
        db.with_conn(|conn| {
            conn.execute_batch(
                "CREATE TRIGGER block_membership_delete BEFORE DELETE ON memberships
                 BEGIN SELECT RAISE(ABORT, 'blocked'); END;",
            )?;
            Ok(())
        })
        .unwrap();

        assert!(db.delete_group_cascade("g1").is_err());
        assert!(db.get_group("g1").unwrap().is_some());
        assert_eq!(db.count_messages("g1").unwrap(), 1);
        assert!(db.is_member("g1", "owner").unwrap());
    }

    #[test]
    fn group_cascade_removes_everything() {
        let db = Database::open_in_memory().unwrap();
        db.create_group(&group("g1", "team", "private"), Some(T0)).unwrap();
        db.insert_membership("g1", "other", T0).unwrap();
        db.insert_message(&message("a", "g1", None, T0)).unwrap();

        let cascade = db.delete_group_cascade("g1").unwrap();
        assert_eq!(
            cascade,
            GroupCascade {
                messages: 1,
                memberships: 2
            }
        );
        assert!(db.get_group("g1").unwrap().is_none());
        assert!(db.list_members("g1").unwrap().is_empty());
    }
}
