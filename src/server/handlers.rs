//! Route handlers. Bodies are read as raw bytes and decoded here so that
//! malformed JSON comes back in the standard error envelope.

use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, State},
    response::IntoResponse,
};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use super::AppState;
use super::error::ApiError;
use crate::api::{AcceptRequest, PairingResponse, RejectRequest, ValidateRequest};
use crate::auth::Identity;
use crate::error::PairingError;

fn decode<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| {
        // serde messages can quote the submitted value; keep them out of the response.
        tracing::debug!(error = %e, "Rejected request body");
        ApiError(PairingError::InvalidArgument(
            "invalid request body".to_string(),
        ))
    })
}

fn pairing_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw)
        .map_err(|_| ApiError(PairingError::InvalidArgument("invalid pairing id".to_string())))
}

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

pub async fn generate_pairing_code(
    State(state): State<AppState>,
    Extension(caller): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    let generated = state.service.generate_pairing_code(&caller).await?;
    Ok(Json(generated))
}

pub async fn validate_pairing_code(
    State(state): State<AppState>,
    Extension(caller): Extension<Identity>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let request: ValidateRequest = decode(&body)?;
    let pairing = state
        .service
        .validate_pairing_code(&caller, &request.pairing_code)
        .await?;
    Ok(Json(PairingResponse {
        success: true,
        pairing,
    }))
}

pub async fn accept_pairing(
    State(state): State<AppState>,
    Extension(caller): Extension<Identity>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let request: AcceptRequest = decode(&body)?;
    let pairing = state
        .service
        .accept_pairing(&caller, request.pairing_id, request.permissions)
        .await?;
    Ok(Json(PairingResponse {
        success: true,
        pairing,
    }))
}

pub async fn reject_pairing(
    State(state): State<AppState>,
    Extension(caller): Extension<Identity>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let request: RejectRequest = decode(&body)?;
    let pairing = state
        .service
        .reject_pairing(&caller, request.pairing_id)
        .await?;
    Ok(Json(PairingResponse {
        success: true,
        pairing,
    }))
}

pub async fn pairing_status(
    State(state): State<AppState>,
    Extension(caller): Extension<Identity>,
    Path(raw_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = pairing_id(&raw_id)?;
    let status = state.service.get_pairing_status(&caller, id).await?;
    Ok(Json(status))
}
