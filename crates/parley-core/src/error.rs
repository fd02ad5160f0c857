use thiserror::Error;
use uuid::Uuid;

use parley_types::{ErrorKind, Visibility};

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("Forbidden: {reason}")]
    Forbidden { reason: String },

    #[error("A {visibility} group named '{name}' already exists")]
    NameTaken { name: String, visibility: Visibility },

    #[error("No modification: {reason}")]
    NoModification { reason: String },

    #[error("User {user_id} is already a member of group {group_id}")]
    AlreadyMember { group_id: Uuid, user_id: Uuid },

    #[error("Cascade delete failed: {message}")]
    CascadeFailed { message: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl EngineError {
    pub fn group_not_found(id: Uuid) -> Self {
        Self::NotFound { entity: "Group", id }
    }

    pub fn message_not_found(id: Uuid) -> Self {
        Self::NotFound {
            entity: "Message",
            id,
        }
    }

    pub fn membership_not_found(group_id: Uuid) -> Self {
        Self::NotFound {
            entity: "Membership in group",
            id: group_id,
        }
    }

    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::Forbidden {
            reason: reason.into(),
        }
    }

    pub fn no_modification(reason: impl Into<String>) -> Self {
        Self::NoModification {
            reason: reason.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn cascade_failed(err: &anyhow::Error) -> Self {
        Self::CascadeFailed {
            message: format!("{:#}", err),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::RecordNotFound,
            Self::Forbidden { .. } => ErrorKind::Forbidden,
            Self::NameTaken { .. } => ErrorKind::NameTaken,
            Self::NoModification { .. } => ErrorKind::NoModification,
            Self::AlreadyMember { .. } => ErrorKind::AlreadyMember,
            Self::CascadeFailed { .. } => ErrorKind::CascadeFailed,
            Self::Validation { .. } => ErrorKind::ValidationFailed,
            Self::Storage(_) => ErrorKind::StorageFailed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_variant_has_a_message_and_kind() {
        let id = Uuid::nil();
        let cases = [
            (EngineError::group_not_found(id), ErrorKind::RecordNotFound),
            (EngineError::forbidden("not the author"), ErrorKind::Forbidden),
            (
                EngineError::NameTaken {
                    name: "x".into(),
                    visibility: Visibility::Public,
                },
                ErrorKind::NameTaken,
            ),
            (EngineError::no_modification("same text"), ErrorKind::NoModification),
            (
                EngineError::AlreadyMember {
                    group_id: id,
                    user_id: id,
                },
                ErrorKind::AlreadyMember,
            ),
            (
                EngineError::cascade_failed(&anyhow::anyhow!("disk full")),
                ErrorKind::CascadeFailed,
            ),
            (EngineError::validation("empty"), ErrorKind::ValidationFailed),
            (
                EngineError::from(anyhow::anyhow!("lock poisoned")),
                ErrorKind::StorageFailed,
            ),
        ];

        for (err, kind) in cases {
            assert_eq!(err.kind(), kind);
            assert!(!err.to_string().is_empty());
        }
    }

    #[test]
    fn name_taken_message_names_visibility() {
        let err = EngineError::NameTaken {
            name: "general".into(),
            visibility: Visibility::Private,
        };
        assert_eq!(
            err.to_string(),
            "A private group named 'general' already exists"
        );
    }
}
