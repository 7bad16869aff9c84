//! Caller identity resolution.
//!
//! Identity is owned by an external auth service. Every request carries a
//! bearer token that an [`IdentityResolver`] turns into an [`Identity`]
//! (user id plus role). Tokens are held as `SecretString` and never logged.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::error::{ConfigError, PairingError};

/// Account role as known to the auth service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Parent,
    Child,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Parent => write!(f, "parent"),
            Role::Child => write!(f, "child"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "parent" => Ok(Role::Parent),
            "child" => Ok(Role::Child),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// An authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    #[serde(rename = "id")]
    pub user_id: Uuid,
    pub role: Role,
}

impl Identity {
    pub fn parent(user_id: Uuid) -> Self {
        Self {
            user_id,
            role: Role::Parent,
        }
    }

    pub fn child(user_id: Uuid) -> Self {
        Self {
            user_id,
            role: Role::Child,
        }
    }

    /// Fail with `Forbidden` unless the caller has `role`.
    pub fn require_role(&self, role: Role) -> Result<(), PairingError> {
        if self.role == role {
            Ok(())
        } else {
            Err(PairingError::Forbidden)
        }
    }
}

/// Pull the token out of an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header_value: Option<&str>) -> Option<SecretString> {
    header_value
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| SecretString::from(t.to_string()))
}

/// Turns bearer tokens into identities.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// `Unauthenticated` for unknown or invalid tokens, `Internal` when the
    /// auth service itself fails.
    async fn resolve(&self, token: &SecretString) -> Result<Identity, PairingError>;
}

/// Fixed token table, for development and tests.
#[derive(Default)]
pub struct StaticIdentityResolver {
    entries: Vec<(SecretString, Identity)>,
}

impl StaticIdentityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, identity: Identity) -> Self {
        self.entries.push((SecretString::from(token.into()), identity));
        self
    }

    /// Parse `token=uuid:role` pairs separated by commas.
    pub fn parse(spec: &str) -> Result<Self, ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            key: "PAIRLINK_STATIC_TOKENS".to_string(),
            message,
        };

        let mut resolver = Self::new();
        for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (token, rest) = entry
                .split_once('=')
                .ok_or_else(|| invalid("expected token=uuid:role".to_string()))?;
            let (id, role) = rest
                .split_once(':')
                .ok_or_else(|| invalid("expected token=uuid:role".to_string()))?;
            let user_id = Uuid::parse_str(id.trim()).map_err(|e| invalid(e.to_string()))?;
            let role = role.parse::<Role>().map_err(invalid)?;
            resolver = resolver.with_token(token.trim(), Identity { user_id, role });
        }
        Ok(resolver)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl IdentityResolver for StaticIdentityResolver {
    async fn resolve(&self, token: &SecretString) -> Result<Identity, PairingError> {
        let presented = token.expose_secret().as_bytes();
        // Compare against every entry so timing does not depend on position.
        let mut found = None;
        for (candidate, identity) in &self.entries {
            if bool::from(candidate.expose_secret().as_bytes().ct_eq(presented)) {
                found = Some(*identity);
            }
        }
        found.ok_or(PairingError::Unauthenticated)
    }
}

/// Resolves tokens against the auth service's `GET {base}/user` endpoint,
/// which answers `{ "id": uuid, "role": "parent" | "child" }`.
pub struct RemoteIdentityResolver {
    http: reqwest::Client,
    user_url: url::Url,
}

impl RemoteIdentityResolver {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            key: "AUTH_SERVICE_URL".to_string(),
            message,
        };

        let mut base = url::Url::parse(base_url).map_err(|e| invalid(e.to_string()))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let user_url = base.join("user").map_err(|e| invalid(e.to_string()))?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| invalid(e.to_string()))?;

        Ok(Self { http, user_url })
    }
}

#[async_trait]
impl IdentityResolver for RemoteIdentityResolver {
    async fn resolve(&self, token: &SecretString) -> Result<Identity, PairingError> {
        let response = self
            .http
            .get(self.user_url.clone())
            .bearer_auth(token.expose_secret())
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Auth service request failed");
                PairingError::Internal
            })?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(PairingError::Unauthenticated);
            }
            status if !status.is_success() => {
                tracing::error!(%status, "Auth service returned an error");
                return Err(PairingError::Internal);
            }
            _ => {}
        }

        response.json::<Identity>().await.map_err(|e| {
            tracing::error!(error = %e, "Auth service returned an unreadable identity");
            PairingError::Internal
        })
    }
}

/// Lookup table used by [`StaticIdentityResolver::parse`] callers that want
/// to print which users are configured without exposing tokens.
pub fn describe_identities(resolver: &StaticIdentityResolver) -> HashMap<Uuid, Role> {
    resolver
        .entries
        .iter()
        .map(|(_, identity)| (identity.user_id, identity.role))
        .collect()
}
