//! Wire types shared by the HTTP gateway and the client.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorCode;
use crate::pairing::{PairingView, RequestedPermissions};

/// Path prefix for every pairing endpoint.
pub const API_PREFIX: &str = "/functions/v1";

pub const GENERATE_PATH: &str = "/functions/v1/generate-pairing-code";
pub const VALIDATE_PATH: &str = "/functions/v1/validate-pairing-code";
pub const ACCEPT_PATH: &str = "/functions/v1/accept-pairing";
pub const REJECT_PATH: &str = "/functions/v1/reject-pairing";

/// Status path for one pairing.
pub fn status_path(pairing_id: Uuid) -> String {
    format!("{}/pairings/{}/status", API_PREFIX, pairing_id)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateRequest {
    pub pairing_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptRequest {
    pub pairing_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<RequestedPermissions>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectRequest {
    pub pairing_id: Uuid,
}

/// Body of a successful validate/accept/reject call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingResponse {
    pub success: bool,
    pub pairing: PairingView,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: ErrorCode,
    pub message: String,
}

/// Body of every failed call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorDetail,
}

impl ErrorResponse {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: ErrorDetail {
                code,
                message: message.into(),
            },
        }
    }
}
