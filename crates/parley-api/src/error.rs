use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::error;

use parley_core::{Engine, EngineError};
use parley_types::ErrorKind;
use parley_types::api::Envelope;

/// Response header naming the [`ErrorKind`] of a failure envelope.
pub const ERROR_KIND_HEADER: &str = "x-parley-error-kind";

pub type ApiResult<T> = Result<Json<Envelope<T>>, ApiError>;

/// A failed request. Renders as a failure envelope with the status of its kind.
#[derive(Debug)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RecordNotFound, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.kind.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = (status, Json(Envelope::<()>::failure(self.message))).into_response();
        response
            .headers_mut()
            .insert(ERROR_KIND_HEADER, HeaderValue::from_static(self.kind.as_str()));
        response
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            // Storage details stay in the log
            EngineError::Storage(e) => {
                error!("Storage failure: {:#}", e);
                Self::new(ErrorKind::StorageFailed, "Internal storage error")
            }
            other => Self::new(other.kind(), other.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(ErrorKind::ValidationFailed, rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::new(ErrorKind::ValidationFailed, rejection.body_text())
    }
}

/// Run an engine call off the async runtime.
pub async fn blocking<T, F>(engine: &Engine, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&Engine) -> Result<T, EngineError> + Send + 'static,
{
    let engine = engine.clone();
    tokio::task::spawn_blocking(move || f(&engine))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::new(ErrorKind::StorageFailed, "Internal error")
        })?
        .map_err(ApiError::from)
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    #[test]
    fn status_follows_kind() {
        let cases = [
            (EngineError::group_not_found(Uuid::nil()), StatusCode::NOT_FOUND),
            (EngineError::forbidden("no"), StatusCode::FORBIDDEN),
            (EngineError::no_modification("same"), StatusCode::BAD_REQUEST),
            (
                EngineError::cascade_failed(&anyhow::anyhow!("boom")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            let kind = err.kind();
            let response = ApiError::from(err).into_response();
            assert_eq!(response.status(), status);
            assert_eq!(
                response.headers()[ERROR_KIND_HEADER].to_str().unwrap(),
                kind.as_str()
            );
        }
    }

    #[test]
    fn storage_errors_hide_details() {
        let err = ApiError::from(EngineError::from(anyhow::anyhow!("disk I/O error at page 7")));
        assert_eq!(err.kind, ErrorKind::StorageFailed);
        assert!(!err.message.contains("page 7"));
    }
}
