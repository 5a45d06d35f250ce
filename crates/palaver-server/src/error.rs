use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use palaver_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Missing or invalid API token")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("File too large: {size} bytes (max {max})")]
    BlobTooLarge { size: usize, max: usize },

    #[error("Blob storage error: {0}")]
    BlobStorage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ServerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ServerError::NotFound("Record"),
            StoreError::InvalidTransition { .. }
            | StoreError::InvalidParticipantTransition { .. }
            | StoreError::Busy(_)
            | StoreError::CallInProgress(_) => ServerError::Conflict(e.to_string()),
            other => ServerError::Internal(other.to_string()),
        }
    }
}

impl ServerError {
    /// Like `From<StoreError>`, but names the record when it is missing.
    pub fn lookup(what: &'static str) -> impl FnOnce(StoreError) -> ServerError {
        move |e| match e {
            StoreError::NotFound => ServerError::NotFound(what),
            other => other.into(),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            ServerError::Forbidden(_) => (StatusCode::FORBIDDEN, self.to_string()),
            ServerError::Conflict(_) => (StatusCode::CONFLICT, self.to_string()),
            ServerError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, self.to_string()),
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::BlobTooLarge { .. } => {
                (StatusCode::PAYLOAD_TOO_LARGE, self.to_string())
            }
            ServerError::BlobStorage(detail) => {
                tracing::error!(error = %detail, "Blob storage failure");
                (StatusCode::INTERNAL_SERVER_ERROR, "Blob storage error".to_string())
            }
            ServerError::Internal(detail) => {
                tracing::error!(error = %detail, "Internal failure");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palaver_shared::{CallStatus, UserId};

    #[test]
    fn test_store_error_mapping() {
        assert!(matches!(
            ServerError::from(StoreError::NotFound),
            ServerError::NotFound(_)
        ));
        assert!(matches!(
            ServerError::from(StoreError::Busy(UserId::new())),
            ServerError::Conflict(_)
        ));
        assert!(matches!(
            ServerError::from(StoreError::InvalidTransition {
                from: CallStatus::Ended,
                to: CallStatus::Ongoing,
            }),
            ServerError::Conflict(_)
        ));
        assert!(matches!(
            ServerError::from(StoreError::Migration("boom".into())),
            ServerError::Internal(_)
        ));
    }

    #[test]
    fn test_status_codes() {
        let cases = [
            (ServerError::NotFound("Call"), StatusCode::NOT_FOUND),
            (ServerError::Unauthorized, StatusCode::UNAUTHORIZED),
            (ServerError::Forbidden("x".into()), StatusCode::FORBIDDEN),
            (ServerError::Conflict("x".into()), StatusCode::CONFLICT),
            (ServerError::Validation("x".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (ServerError::Internal("secret".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }
}
