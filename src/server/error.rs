//! Maps the crate-wide [`crate::error::Error`] taxonomy onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::error::Error as CoreError;

/// Newtype so handlers can `?`-propagate [`CoreError`] while this module
/// owns the `IntoResponse` impl (the core error type stays HTTP-agnostic).
pub struct Error(CoreError);

impl From<CoreError> for Error {
    fn from(err: CoreError) -> Self {
        Self(err)
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CoreError::NotFound => StatusCode::NOT_FOUND,
            CoreError::Malformed(_) => StatusCode::BAD_REQUEST,
            CoreError::Overloaded => StatusCode::TOO_MANY_REQUESTS,
            CoreError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            CoreError::SignatureInvalid(_)
            | CoreError::ForkDetected(_)
            | CoreError::Conflict
            | CoreError::Fatal(_)
            | CoreError::Cancelled
            | CoreError::IntegratorFailed(_)
            | CoreError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "request failed");
        }
        (status, self.0.to_string()).into_response()
    }
}
