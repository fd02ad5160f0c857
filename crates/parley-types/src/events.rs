use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::models::Message;

/// Commands sent FROM client TO server over the channel connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all_fields = "camelCase")]
pub enum ChannelCommand {
    /// Subscribe this connection to a group's channel
    JoinGroup { group_id: Uuid },

    /// Unsubscribe this connection from a group's channel
    LeaveGroup { group_id: Uuid },

    /// Relay a message the client just created over REST
    RelayMessageAdded { group_id: Uuid, message: Message },

    /// Relay a message the client just edited over REST
    RelayMessageEdited { group_id: Uuid, message: Message },

    /// Relay a message the client just deleted over REST
    RelayMessageDeleted { group_id: Uuid, message_id: Uuid },

    /// Relay that the client just deleted the group over REST
    RelayGroupDeleted { group_id: Uuid },
}

impl ChannelCommand {
    pub fn group_id(&self) -> Uuid {
        match self {
            Self::JoinGroup { group_id }
            | Self::LeaveGroup { group_id }
            | Self::RelayMessageAdded { group_id, .. }
            | Self::RelayMessageEdited { group_id, .. }
            | Self::RelayMessageDeleted { group_id, .. }
            | Self::RelayGroupDeleted { group_id } => *group_id,
        }
    }

    /// Splits a relay command into its channel and payload. Returns `None` for
    /// subscription commands.
    pub fn into_relay(self) -> Option<(Uuid, RelayEvent)> {
        match self {
            Self::JoinGroup { .. } | Self::LeaveGroup { .. } => None,
            Self::RelayMessageAdded { group_id, message } => {
                Some((group_id, RelayEvent::MessageAdded(message)))
            }
            Self::RelayMessageEdited { group_id, message } => {
                Some((group_id, RelayEvent::MessageEdited(message)))
            }
            Self::RelayMessageDeleted {
                group_id,
                message_id,
            } => Some((group_id, RelayEvent::MessageDeleted { message_id })),
            Self::RelayGroupDeleted { group_id } => Some((group_id, RelayEvent::GroupDeleted)),
        }
    }
}

/// A confirmed mutation to be fanned out to a group's channel.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    MessageAdded(Message),
    MessageEdited(Message),
    MessageDeleted { message_id: Uuid },
    GroupDeleted,
}

impl RelayEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MessageAdded(_) => "MessageAdded",
            Self::MessageEdited(_) => "MessageEdited",
            Self::MessageDeleted { .. } => "MessageDeleted",
            Self::GroupDeleted => "GroupDeleted",
        }
    }

    /// The message carried by add/edit events.
    pub fn message(&self) -> Option<&Message> {
        match self {
            Self::MessageAdded(m) | Self::MessageEdited(m) => Some(m),
            _ => None,
        }
    }

    /// The client command that relays this event to `group_id`'s channel.
    pub fn into_command(self, group_id: Uuid) -> ChannelCommand {
        match self {
            Self::MessageAdded(message) => ChannelCommand::RelayMessageAdded { group_id, message },
            Self::MessageEdited(message) => ChannelCommand::RelayMessageEdited { group_id, message },
            Self::MessageDeleted { message_id } => ChannelCommand::RelayMessageDeleted {
                group_id,
                message_id,
            },
            Self::GroupDeleted => ChannelCommand::RelayGroupDeleted { group_id },
        }
    }

    pub fn into_event(self, group_id: Uuid) -> ChannelEvent {
        match self {
            Self::MessageAdded(message) => ChannelEvent::ReceiveMessageAdded { message },
            Self::MessageEdited(message) => ChannelEvent::ReceiveMessageEdited { message },
            Self::MessageDeleted { message_id } => ChannelEvent::ReceiveMessageDeleted {
                group_id,
                message_id,
            },
            Self::GroupDeleted => ChannelEvent::ReceiveGroupDeleted { group_id },
        }
    }
}

/// Events sent FROM server TO client over the channel connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all_fields = "camelCase")]
pub enum ChannelEvent {
    /// Connection accepted; identity verified at upgrade
    Ready { connection_id: Uuid, user_id: Uuid },

    /// Join acknowledged
    Joined { group_id: Uuid },

    /// Leave acknowledged
    Left { group_id: Uuid },

    ReceiveMessageAdded { message: Message },

    ReceiveMessageEdited { message: Message },

    ReceiveMessageDeleted { group_id: Uuid, message_id: Uuid },

    /// The group was deleted; viewers should navigate away
    ReceiveGroupDeleted { group_id: Uuid },

    /// A command from this connection was rejected
    Error { kind: ErrorKind, message: String },
}

impl ChannelEvent {
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Error {
            kind,
            message: message.into(),
        }
    }

    /// Returns the group this event is scoped to, if any.
    pub fn group_id(&self) -> Option<Uuid> {
        match self {
            Self::Joined { group_id }
            | Self::Left { group_id }
            | Self::ReceiveMessageDeleted { group_id, .. }
            | Self::ReceiveGroupDeleted { group_id } => Some(*group_id),
            Self::ReceiveMessageAdded { message } | Self::ReceiveMessageEdited { message } => {
                Some(message.group_id)
            }
            Self::Ready { .. } | Self::Error { .. } => None,
        }
    }
}
