//! Mapping from [`PairingError`] to HTTP responses.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};

use crate::api::ErrorResponse;
use crate::error::{ErrorCode, PairingError};

/// A pairing error on its way out of a handler.
#[derive(Debug)]
pub struct ApiError(pub PairingError);

impl From<PairingError> for ApiError {
    fn from(e: PairingError) -> Self {
        ApiError(e)
    }
}

pub fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Unauthenticated => StatusCode::UNAUTHORIZED,
        ErrorCode::InvalidArgument => StatusCode::BAD_REQUEST,
        ErrorCode::Forbidden => StatusCode::FORBIDDEN,
        ErrorCode::FailedPrecondition | ErrorCode::IntegrityRace => StatusCode::CONFLICT,
        ErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorCode::ResourceExhausted => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.0.code();
        let body = ErrorResponse::new(code, self.0.to_string());
        let mut response = (status_for(code), Json(body)).into_response();

        if let PairingError::RateLimited {
            retry_after: Some(wait),
        } = self.0
        {
            // Whole seconds, rounded up so clients never come back early.
            let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
            if let Ok(value) = HeaderValue::from_str(&secs.max(1).to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
        }

        response
    }
}
