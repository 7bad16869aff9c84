//! Bearer token middleware for the pairing routes.

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::AppState;
use super::error::ApiError;
use crate::auth::bearer_token;
use crate::error::PairingError;

/// Resolve the caller and stash its [`Identity`](crate::auth::Identity) in
/// request extensions. Requests without a usable token never reach a handler.
pub async fn require_identity(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let Some(token) = bearer_token(header) else {
        return ApiError(PairingError::Unauthenticated).into_response();
    };

    match state.resolver.resolve(&token).await {
        Ok(identity) => {
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(e) => {
            tracing::debug!(path = %request.uri().path(), code = %e.code(), "Caller not authenticated");
            ApiError(e).into_response()
        }
    }
}
