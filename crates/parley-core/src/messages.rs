use tracing::{info, warn};
use uuid::Uuid;

use parley_db::format_timestamp;
use parley_db::models::MessageRow;
use parley_types::api::DeletedMessages;
use parley_types::{Message, Visibility};

use crate::engine::{Engine, MessageEdit, NewMessage, now};
use crate::error::{EngineError, EngineResult};
use crate::validation;

impl Engine {
    /// Post a message. The engine assigns the id and timestamp.
    pub fn add_message(&self, new: NewMessage) -> EngineResult<Message> {
        let group = self.load_group(new.group_id)?;
        if group.visibility == Visibility::Private && !self.is_member(group.id, new.author_user_id)? {
            return Err(EngineError::forbidden(
                "Only members may post to a private group",
            ));
        }

        let text = validation::message_text(&new.text)?;
        let attachment_ref = validation::attachment_ref(new.attachment_ref.as_deref())?;
        if let Some(parent) = new.reply_to_id {
            self.ensure_reply_target(group.id, parent, None)?;
        }

        let message = Message {
            id: Uuid::new_v4(),
            author_user_id: new.author_user_id,
            group_id: group.id,
            text,
            created_at: now(),
            reply_to_id: new.reply_to_id,
            attachment_ref,
            edited_at: None,
        };
        self.db.insert_message(&MessageRow::from(&message))?;

        info!(
            "{} posted message {} to group {}",
            message.author_user_id, message.id, message.group_id
        );
        Ok(message)
    }

    /// Replace the editable fields of a message. Only its author may edit it,
    /// and an edit that changes nothing is rejected.
    pub fn edit_message(&self, edit: MessageEdit) -> EngineResult<Message> {
        let mut message = self.load_message(edit.message_id)?;
        if message.author_user_id != edit.caller_user_id {
            return Err(EngineError::forbidden("Only the author may edit a message"));
        }

        let text = validation::message_text(&edit.text)?;
        let attachment_ref = validation::attachment_ref(edit.attachment_ref.as_deref())?;
        if message.has_content(&text, edit.reply_to_id, attachment_ref.as_deref()) {
            return Err(EngineError::no_modification(
                "Text, reply target and attachment are unchanged",
            ));
        }
        // An unchanged link is left alone even if its target was cascaded away.
        if let Some(parent) = edit.reply_to_id.filter(|p| Some(*p) != message.reply_to_id) {
            self.ensure_reply_target(message.group_id, parent, Some(message.id))?;
        }

        let edited_at = now();
        let updated = self.db.update_message(
            &message.id.to_string(),
            &text,
            edit.reply_to_id.map(|id| id.to_string()).as_deref(),
            attachment_ref.as_deref(),
            &format_timestamp(&edited_at),
        )?;
        if !updated {
            return Err(EngineError::message_not_found(message.id));
        }

        message.text = text;
        message.reply_to_id = edit.reply_to_id;
        message.attachment_ref = attachment_ref;
        message.edited_at = Some(edited_at);

        info!("{} edited message {}", edit.caller_user_id, message.id);
        Ok(message)
    }

    /// Delete a message and its direct replies. Replies of those replies are
    /// kept. Nothing is deleted if any part fails.
    pub fn delete_message(&self, message_id: Uuid, caller: Uuid) -> EngineResult<DeletedMessages> {
        let message = self.load_message(message_id)?;
        if message.author_user_id != caller {
            return Err(EngineError::forbidden("Only the author may delete a message"));
        }

        let reply_ids = self
            .db
            .delete_message_cascade(&message_id.to_string())
            .map_err(|e| {
                warn!("Cascade delete of message {} failed: {:#}", message_id, e);
                EngineError::cascade_failed(&e)
            })?
            .into_iter()
            .map(|id| id.parse::<Uuid>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| EngineError::from(anyhow::Error::from(e)))?;

        info!(
            "{} deleted message {} and {} direct replies",
            caller,
            message_id,
            reply_ids.len()
        );
        Ok(DeletedMessages {
            group_id: message.group_id,
            message_id,
            reply_ids,
        })
    }

    pub fn get_message(&self, message_id: Uuid, caller: Uuid) -> EngineResult<Message> {
        let message = self.load_message(message_id)?;
        let group = self.load_group(message.group_id)?;
        self.ensure_can_view(&group, caller)?;
        Ok(message)
    }

    /// One page of history, newest first, skipping the `skip` newest messages.
    pub fn list_messages(
        &self,
        group_id: Uuid,
        caller: Uuid,
        skip: u32,
        page_size: u32,
    ) -> EngineResult<Vec<Message>> {
        let group = self.load_group(group_id)?;
        self.ensure_can_view(&group, caller)?;

        let rows = self.db.list_messages(
            &group_id.to_string(),
            skip,
            validation::page_size(page_size),
        )?;
        Ok(rows
            .into_iter()
            .map(Message::try_from)
            .collect::<anyhow::Result<Vec<_>>>()?)
    }

    fn ensure_reply_target(
        &self,
        group_id: Uuid,
        parent: Uuid,
        replying: Option<Uuid>,
    ) -> EngineResult<()> {
        if replying == Some(parent) {
            return Err(EngineError::validation("A message cannot reply to itself"));
        }
        let target = self.load_message(parent).map_err(|e| match e {
            EngineError::NotFound { .. } => {
                EngineError::validation(format!("Reply target {} does not exist", parent))
            }
            other => other,
        })?;
        if target.group_id != group_id {
            return Err(EngineError::validation(format!(
                "Reply target {} belongs to another group",
                parent
            )));
        }
        Ok(())
    }
}
