use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::io;

/// Per-request failure. Converted to an HTTP status and never fatal to the server.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("File not found")]
    NotFound,

    #[error("Permission denied")]
    Forbidden,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("IO error: {0}")]
    Internal(io::Error),
}

impl From<io::Error> for RequestError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::NotADirectory => RequestError::NotFound,
            io::ErrorKind::PermissionDenied => RequestError::Forbidden,
            _ => RequestError::Internal(err),
        }
    }
}

impl RequestError {
    pub fn status(&self) -> StatusCode {
        match self {
            RequestError::NotFound => StatusCode::NOT_FOUND,
            RequestError::Forbidden => StatusCode::FORBIDDEN,
            RequestError::BadRequest(_) => StatusCode::BAD_REQUEST,
            RequestError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RequestError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            RequestError::Internal(_) => {
                tracing::error!("Internal error: {:?}", self);
                "Internal server error".to_string()
            }
            RequestError::BadRequest(_) => {
                tracing::debug!(error = %self, "Rejected malformed request");
                self.to_string()
            }
            _ => self.to_string(),
        };

        (status, format!("{} {}\n", status.as_u16(), message)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_classification() {
        let not_found = io::Error::from(io::ErrorKind::NotFound);
        assert!(matches!(RequestError::from(not_found), RequestError::NotFound));

        let denied = io::Error::from(io::ErrorKind::PermissionDenied);
        assert!(matches!(RequestError::from(denied), RequestError::Forbidden));

        let other = io::Error::other("disk on fire");
        assert!(matches!(RequestError::from(other), RequestError::Internal(_)));
    }

    #[test]
    fn test_permission_denied_answers_forbidden() {
        let denied = io::Error::from(io::ErrorKind::PermissionDenied);
        let response = RequestError::from(denied).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(RequestError::NotFound.into_response().status(), StatusCode::NOT_FOUND);
        assert_eq!(RequestError::Forbidden.into_response().status(), StatusCode::FORBIDDEN);
        assert_eq!(
            RequestError::BadRequest("nul byte".into())
                .into_response()
                .status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RequestError::Internal(io::Error::other("boom"))
                .into_response()
                .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
