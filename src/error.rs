//! Error types for pairlink.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level error type for the service and its binaries.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Pairing error: {0}")]
    Pairing(#[from] PairingError),

    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    #[error("Server error: {0}")]
    Server(String),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Storage-backend errors. Never shown to callers verbatim.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    /// A unique index rejected the write (pairing code already pending).
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// A referenced row was missing or changed while the write was in flight.
    #[error("Referential integrity race: {0}")]
    IntegrityRace(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Store call timed out after {0:?}")]
    Timeout(Duration),

    #[cfg(feature = "postgres")]
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[cfg(feature = "postgres")]
    #[error("Pool build error: {0}")]
    PoolBuild(#[from] deadpool_postgres::CreatePoolError),

    #[cfg(feature = "postgres")]
    #[error("Pool runtime error: {0}")]
    PoolRuntime(#[from] deadpool_postgres::PoolError),
}

/// Wire-level error code shared by the HTTP gateway and the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthenticated,
    InvalidArgument,
    Forbidden,
    FailedPrecondition,
    RateLimited,
    ResourceExhausted,
    IntegrityRace,
    Internal,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCode::Unauthenticated => "unauthenticated",
            ErrorCode::InvalidArgument => "invalid_argument",
            ErrorCode::Forbidden => "forbidden",
            ErrorCode::FailedPrecondition => "failed_precondition",
            ErrorCode::RateLimited => "rate_limited",
            ErrorCode::ResourceExhausted => "resource_exhausted",
            ErrorCode::IntegrityRace => "integrity_race",
            ErrorCode::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Message returned for every failed code lookup, whatever the cause.
pub const INVALID_CODE_MESSAGE: &str = "unable to validate code";

/// Caller-facing pairing errors.
///
/// Display strings cross the trust boundary, so none of them carries
/// storage text, record ids owned by someone else, or the submitted code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PairingError {
    #[error("authentication required")]
    Unauthenticated,

    #[error("{0}")]
    InvalidArgument(String),

    #[error("not permitted")]
    Forbidden,

    #[error("{0}")]
    FailedPrecondition(String),

    #[error("too many attempts, try again later")]
    RateLimited { retry_after: Option<Duration> },

    #[error("could not allocate a pairing code, try again later")]
    ResourceExhausted,

    #[error("pairing state changed concurrently, retry")]
    IntegrityRace,

    #[error("internal error")]
    Internal,
}

impl PairingError {
    /// The generic lookup failure used by the code validator.
    pub fn invalid_code() -> Self {
        PairingError::InvalidArgument(INVALID_CODE_MESSAGE.to_string())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            PairingError::Unauthenticated => ErrorCode::Unauthenticated,
            PairingError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            PairingError::Forbidden => ErrorCode::Forbidden,
            PairingError::FailedPrecondition(_) => ErrorCode::FailedPrecondition,
            PairingError::RateLimited { .. } => ErrorCode::RateLimited,
            PairingError::ResourceExhausted => ErrorCode::ResourceExhausted,
            PairingError::IntegrityRace => ErrorCode::IntegrityRace,
            PairingError::Internal => ErrorCode::Internal,
        }
    }
}

/// Errors surfaced by the retrying client gateway.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// No bearer credential configured; raised before any network I/O.
    #[error("no credential configured")]
    Unauthenticated,

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Server rejected {operation} ({status}, {code}): {message}")]
    Api {
        operation: String,
        status: u16,
        code: ErrorCode,
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response for {operation}: {reason}")]
    InvalidResponse { operation: String, reason: String },
}

impl ClientError {
    /// Server-assigned error code, if the failure came from the server.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            ClientError::Api { code, .. } => Some(*code),
            ClientError::Unauthenticated => Some(ErrorCode::Unauthenticated),
            _ => None,
        }
    }

    /// Whether another attempt could succeed without the caller changing anything.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            ClientError::Api { status, code, .. } => {
                *status >= 500 || *status == 429 || *code == ErrorCode::IntegrityRace
            }
            ClientError::Unauthenticated
            | ClientError::InvalidUrl(_)
            | ClientError::InvalidResponse { .. } => false,
        }
    }
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
