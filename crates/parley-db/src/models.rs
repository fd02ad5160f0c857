//! Database row types. These map directly to SQLite rows and stay separate
//! from the parley-types API models to keep the DB layer independent.

use anyhow::{Context, Result};
use rusqlite::Row;
use uuid::Uuid;

use parley_types::{Group, Membership, Message};

use crate::{format_timestamp, parse_timestamp};

pub struct GroupRow {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    pub visibility: String,
    pub created_at: String,
}

impl GroupRow {
    pub(crate) const COLUMNS: &'static str = "id, name, owner_id, visibility, created_at";

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            owner_id: row.get(2)?,
            visibility: row.get(3)?,
            created_at: row.get(4)?,
        })
    }
}

impl From<&Group> for GroupRow {
    fn from(g: &Group) -> Self {
        Self {
            id: g.id.to_string(),
            name: g.name.clone(),
            owner_id: g.owner_user_id.to_string(),
            visibility: g.visibility.as_str().to_string(),
            created_at: format_timestamp(&g.created_at),
        }
    }
}

impl TryFrom<GroupRow> for Group {
    type Error = anyhow::Error;

    fn try_from(row: GroupRow) -> Result<Self> {
        Ok(Self {
            id: parse_uuid(&row.id, "group id")?,
            owner_user_id: parse_uuid(&row.owner_id, "owner_id")?,
            visibility: row
                .visibility
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))
                .with_context(|| format!("corrupt visibility on group '{}'", row.id))?,
            created_at: parse_timestamp(&row.created_at)
                .with_context(|| format!("corrupt created_at on group '{}'", row.id))?,
            name: row.name,
        })
    }
}

pub struct MembershipRow {
    pub group_id: String,
    pub user_id: String,
    pub joined_at: String,
}

impl TryFrom<MembershipRow> for Membership {
    type Error = anyhow::Error;

    fn try_from(row: MembershipRow) -> Result<Self> {
        Ok(Self {
            group_id: parse_uuid(&row.group_id, "membership group_id")?,
            user_id: parse_uuid(&row.user_id, "membership user_id")?,
            joined_at: parse_timestamp(&row.joined_at)?,
        })
    }
}

pub struct MessageRow {
    pub id: String,
    pub group_id: String,
    pub author_id: String,
    pub text: String,
    pub reply_to_id: Option<String>,
    pub attachment_ref: Option<String>,
    pub created_at: String,
    pub edited_at: Option<String>,
}

impl MessageRow {
    pub(crate) const COLUMNS: &'static str =
        "id, group_id, author_id, text, reply_to_id, attachment_ref, created_at, edited_at";

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            group_id: row.get(1)?,
            author_id: row.get(2)?,
            text: row.get(3)?,
            reply_to_id: row.get(4)?,
            attachment_ref: row.get(5)?,
            created_at: row.get(6)?,
            edited_at: row.get(7)?,
        })
    }
}

impl From<&Message> for MessageRow {
    fn from(m: &Message) -> Self {
        Self {
            id: m.id.to_string(),
            group_id: m.group_id.to_string(),
            author_id: m.author_user_id.to_string(),
            text: m.text.clone(),
            reply_to_id: m.reply_to_id.map(|id| id.to_string()),
            attachment_ref: m.attachment_ref.clone(),
            created_at: format_timestamp(&m.created_at),
            edited_at: m.edited_at.as_ref().map(format_timestamp),
        }
    }
}

impl TryFrom<MessageRow> for Message {
    type Error = anyhow::Error;

    fn try_from(row: MessageRow) -> Result<Self> {
        Ok(Self {
            id: parse_uuid(&row.id, "message id")?,
            author_user_id: parse_uuid(&row.author_id, "author_id")?,
            group_id: parse_uuid(&row.group_id, "group_id")?,
            reply_to_id: row
                .reply_to_id
                .as_deref()
                .map(|id| parse_uuid(id, "reply_to_id"))
                .transpose()?,
            created_at: parse_timestamp(&row.created_at)
                .with_context(|| format!("corrupt created_at on message '{}'", row.id))?,
            edited_at: row.edited_at.as_deref().map(parse_timestamp).transpose()?,
            text: row.text,
            attachment_ref: row.attachment_ref,
        })
    }
}

fn parse_uuid(raw: &str, what: &str) -> Result<Uuid> {
    raw.parse()
        .with_context(|| format!("corrupt {} '{}'", what, raw))
}
