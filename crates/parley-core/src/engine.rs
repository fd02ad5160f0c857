use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use uuid::Uuid;

use parley_db::Database;
use parley_types::{Group, Message, Visibility};

use crate::error::{EngineError, EngineResult};

/// Validates every state-changing request against the ownership, uniqueness
/// and cascade rules, then applies it through the [`Database`].
///
/// All methods are synchronous and hit SQLite directly; async callers should
/// run them on a blocking thread.
#[derive(Clone)]
pub struct Engine {
    pub(crate) db: Arc<Database>,
}

/// Input for [`Engine::add_message`].
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub group_id: Uuid,
    pub author_user_id: Uuid,
    pub text: String,
    pub reply_to_id: Option<Uuid>,
    pub attachment_ref: Option<String>,
}

/// Input for [`Engine::edit_message`]. Carries the full new value of every
/// editable field.
#[derive(Debug, Clone)]
pub struct MessageEdit {
    pub message_id: Uuid,
    pub caller_user_id: Uuid,
    pub text: String,
    pub reply_to_id: Option<Uuid>,
    pub attachment_ref: Option<String>,
}

/// Current time at the store's resolution, so values read back compare equal.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

impl Engine {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub(crate) fn load_group(&self, group_id: Uuid) -> EngineResult<Group> {
        let row = self
            .db
            .get_group(&group_id.to_string())?
            .ok_or_else(|| EngineError::group_not_found(group_id))?;
        Ok(Group::try_from(row)?)
    }

    pub(crate) fn load_message(&self, message_id: Uuid) -> EngineResult<Message> {
        let row = self
            .db
            .get_message(&message_id.to_string())?
            .ok_or_else(|| EngineError::message_not_found(message_id))?;
        Ok(Message::try_from(row)?)
    }

    pub(crate) fn is_member(&self, group_id: Uuid, user_id: Uuid) -> EngineResult<bool> {
        Ok(self
            .db
            .is_member(&group_id.to_string(), &user_id.to_string())?)
    }

    /// Public groups are readable by anyone; private groups only by members.
    pub(crate) fn ensure_can_view(&self, group: &Group, user_id: Uuid) -> EngineResult<()> {
        if group.visibility == Visibility::Private && !self.is_member(group.id, user_id)? {
            return Err(EngineError::forbidden(format!(
                "User {} is not a member of private group {}",
                user_id, group.id
            )));
        }
        Ok(())
    }

    /// Load a group and check the user may read it. Used to gate channel joins.
    pub fn authorize_view(&self, group_id: Uuid, user_id: Uuid) -> EngineResult<Group> {
        let group = self.load_group(group_id)?;
        self.ensure_can_view(&group, user_id)?;
        Ok(group)
    }

    pub fn group_exists(&self, group_id: Uuid) -> EngineResult<bool> {
        Ok(self.db.get_group(&group_id.to_string())?.is_some())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    pub(crate) fn engine() -> Engine {
        let db = Database::open_in_memory().expect("in-memory database");
        Engine::new(Arc::new(db))
    }

    pub(crate) fn user() -> Uuid {
        Uuid::new_v4()
    }

    /// Install a trigger that makes every DELETE on `table` abort.
    pub(crate) fn block_deletes(engine: &Engine, table: &str, when: &str) {
        let sql = format!(
            "CREATE TRIGGER block_{table}_delete BEFORE DELETE ON {table} {when}
             BEGIN SELECT RAISE(ABORT, 'injected failure'); END;"
        );
        engine
            .database()
            .with_conn(|conn| {
                conn.execute_batch(&sql)?;
                Ok(())
            })
            .expect("install trigger");
    }
}
