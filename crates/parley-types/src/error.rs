use std::fmt;

use serde::{Deserialize, Serialize};

/// Closed set of failure kinds shared by the engine, the REST surface and the
/// channel protocol. Each kind maps to exactly one HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    RecordNotFound,
    Forbidden,
    NameTaken,
    NoModification,
    AlreadyMember,
    CascadeFailed,
    ConnectionFailed,
    ValidationFailed,
    StorageFailed,
    Unauthorized,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 10] = [
        Self::RecordNotFound,
        Self::Forbidden,
        Self::NameTaken,
        Self::NoModification,
        Self::AlreadyMember,
        Self::CascadeFailed,
        Self::ConnectionFailed,
        Self::ValidationFailed,
        Self::StorageFailed,
        Self::Unauthorized,
    ];

    pub fn status_code(&self) -> u16 {
        match self {
            Self::RecordNotFound => 404,
            Self::Forbidden => 403,
            Self::NameTaken | Self::NoModification | Self::AlreadyMember | Self::ValidationFailed => 400,
            Self::CascadeFailed | Self::StorageFailed => 500,
            Self::ConnectionFailed => 503,
            Self::Unauthorized => 401,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RecordNotFound => "RecordNotFound",
            Self::Forbidden => "Forbidden",
            Self::NameTaken => "NameTaken",
            Self::NoModification => "NoModification",
            Self::AlreadyMember => "AlreadyMember",
            Self::CascadeFailed => "CascadeFailed",
            Self::ConnectionFailed => "ConnectionFailed",
            Self::ValidationFailed => "ValidationFailed",
            Self::StorageFailed => "StorageFailed",
            Self::Unauthorized => "Unauthorized",
        }
    }

    /// Lenient lookup by name. Unknown names fail closed to `RecordNotFound`.
    pub fn from_name(name: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == name)
            .unwrap_or(Self::RecordNotFound)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_table_matches_rest_surface() {
        assert_eq!(ErrorKind::RecordNotFound.status_code(), 404);
        assert_eq!(ErrorKind::Forbidden.status_code(), 403);
        assert_eq!(ErrorKind::NameTaken.status_code(), 400);
        assert_eq!(ErrorKind::NoModification.status_code(), 400);
        assert_eq!(ErrorKind::AlreadyMember.status_code(), 400);
        assert_eq!(ErrorKind::ValidationFailed.status_code(), 400);
        assert_eq!(ErrorKind::CascadeFailed.status_code(), 500);
        assert_eq!(ErrorKind::Unauthorized.status_code(), 401);
    }

    #[test]
    fn unknown_names_fail_closed() {
        for kind in ErrorKind::ALL {
            assert_eq!(ErrorKind::from_name(kind.as_str()), kind);
        }
        assert_eq!(ErrorKind::from_name("Teapot"), ErrorKind::RecordNotFound);
        assert_eq!(ErrorKind::from_name("Teapot").status_code(), 404);
    }
}
