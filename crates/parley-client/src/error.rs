use thiserror::Error;

use parley_types::ErrorKind;

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport could not be opened or was lost. Retryable.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Cannot {action} while {state}")]
    InvalidState { action: &'static str, state: String },

    /// The server answered a REST call with a failure envelope.
    #[error("{kind} ({status}): {message}")]
    Api {
        status: u16,
        kind: ErrorKind,
        message: String,
    },

    /// The server rejected a channel command with an `Error` event.
    #[error("{kind}: {message}")]
    Rejected { kind: ErrorKind, message: String },

    #[error("Malformed server response: {0}")]
    Protocol(String),
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConnectionFailed(_) | Self::Protocol(_) => ErrorKind::ConnectionFailed,
            Self::InvalidState { .. } => ErrorKind::ValidationFailed,
            Self::Api { kind, .. } | Self::Rejected { kind, .. } => *kind,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Protocol(err.to_string())
        } else {
            Self::ConnectionFailed(err.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::ConnectionFailed(err.to_string())
    }
}
