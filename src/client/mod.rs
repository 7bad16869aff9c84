//! HTTP client for the pairing API.
//!
//! Every call carries the configured bearer token and goes through
//! [`with_retry`], so transient failures are retried with backoff while
//! permanent ones come back to the caller on the first attempt.

mod retry;

pub use retry::{RetryPolicy, with_retry};

use std::time::Duration;

use reqwest::header::RETRY_AFTER;
use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;
use uuid::Uuid;

use crate::api::{
    ACCEPT_PATH, AcceptRequest, ErrorResponse, GENERATE_PATH, PairingResponse, REJECT_PATH,
    RejectRequest, VALIDATE_PATH, ValidateRequest, status_path,
};
use crate::config::ClientConfig;
use crate::error::{ClientError, ErrorCode};
use crate::pairing::{
    CapabilityProbe, GeneratedCode, PairingStatusView, PairingView, Permissions,
    RequestedPermissions, negotiate_permissions,
};

/// Longest server error text kept when the body is not the JSON envelope.
const MAX_RAW_ERROR_LEN: usize = 200;

pub struct PairingClient {
    http: reqwest::Client,
    base_url: Url,
    token: Option<SecretString>,
    policy: RetryPolicy,
}

impl PairingClient {
    pub fn new(
        base_url: Url,
        token: Option<SecretString>,
        policy: RetryPolicy,
        request_timeout: Duration,
    ) -> Result<Self, ClientError> {
        if base_url.cannot_be_a_base() {
            return Err(ClientError::InvalidUrl(base_url.to_string()));
        }
        let http = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            http,
            base_url,
            token,
            policy,
        })
    }

    pub fn from_config(config: ClientConfig) -> Result<Self, ClientError> {
        Self::new(
            config.api_url,
            config.token,
            config.retry,
            config.request_timeout,
        )
    }

    /// Ask the server for a fresh code for the calling child.
    pub async fn generate_pairing_code(&self) -> Result<GeneratedCode, ClientError> {
        self.call(
            "generate_pairing_code",
            Method::POST,
            GENERATE_PATH,
            Some(&serde_json::json!({})),
        )
        .await
    }

    pub async fn validate_pairing_code(&self, code: &str) -> Result<PairingView, ClientError> {
        let body = ValidateRequest {
            pairing_code: code.to_string(),
        };
        let response: PairingResponse = self
            .call("validate_pairing_code", Method::POST, VALIDATE_PATH, Some(&body))
            .await?;
        Ok(response.pairing)
    }

    pub async fn accept_pairing(
        &self,
        pairing_id: Uuid,
        permissions: Option<RequestedPermissions>,
    ) -> Result<PairingView, ClientError> {
        let body = AcceptRequest {
            pairing_id,
            permissions,
        };
        let response: PairingResponse = self
            .call("accept_pairing", Method::POST, ACCEPT_PATH, Some(&body))
            .await?;
        Ok(response.pairing)
    }

    /// Probe the requested capabilities on this device, then accept with
    /// only the ones that verified.
    pub async fn accept_with_probe(
        &self,
        pairing_id: Uuid,
        requested: Permissions,
        probe: &dyn CapabilityProbe,
        probe_timeout: Duration,
    ) -> Result<PairingView, ClientError> {
        let verified = negotiate_permissions(&requested, probe, probe_timeout).await;
        self.accept_pairing(pairing_id, Some(verified.into())).await
    }

    pub async fn reject_pairing(&self, pairing_id: Uuid) -> Result<PairingView, ClientError> {
        let body = RejectRequest { pairing_id };
        let response: PairingResponse = self
            .call("reject_pairing", Method::POST, REJECT_PATH, Some(&body))
            .await?;
        Ok(response.pairing)
    }

    pub async fn get_pairing_status(
        &self,
        pairing_id: Uuid,
    ) -> Result<PairingStatusView, ClientError> {
        self.call::<_, ()>(
            "get_pairing_status",
            Method::GET,
            &status_path(pairing_id),
            None,
        )
        .await
    }

    async fn call<T, B>(
        &self,
        operation: &'static str,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, ClientError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let token = self.token.as_ref().ok_or(ClientError::Unauthenticated)?;
        let url = self
            .base_url
            .join(path)
            .map_err(|e| ClientError::InvalidUrl(e.to_string()))?;

        with_retry(&self.policy, operation, move || {
            self.send_once(operation, method.clone(), url.clone(), token, body)
        })
        .await
    }

    async fn send_once<T, B>(
        &self,
        operation: &'static str,
        method: Method,
        url: Url,
        token: &SecretString,
        body: Option<&B>,
    ) -> Result<T, ClientError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let mut request = self
            .http
            .request(method, url)
            .bearer_auth(token.expose_secret());
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();

        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| ClientError::InvalidResponse {
                    operation: operation.to_string(),
                    reason: e.to_string(),
                });
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);

        let raw = response.text().await.unwrap_or_default();
        let (code, message) = match serde_json::from_str::<ErrorResponse>(&raw) {
            Ok(envelope) => (envelope.error.code, envelope.error.message),
            Err(_) => (
                code_for_status(status),
                raw.chars().take(MAX_RAW_ERROR_LEN).collect(),
            ),
        };

        tracing::debug!(operation, status = status.as_u16(), %code, "Server returned an error");
        Err(ClientError::Api {
            operation: operation.to_string(),
            status: status.as_u16(),
            code,
            message,
            retry_after,
        })
    }
}

/// Best guess at a code when the body is not the JSON error envelope
/// (proxies, load balancers).
fn code_for_status(status: StatusCode) -> ErrorCode {
    match status {
        StatusCode::UNAUTHORIZED => ErrorCode::Unauthenticated,
        StatusCode::BAD_REQUEST => ErrorCode::InvalidArgument,
        StatusCode::FORBIDDEN => ErrorCode::Forbidden,
        StatusCode::CONFLICT => ErrorCode::FailedPrecondition,
        StatusCode::TOO_MANY_REQUESTS => ErrorCode::RateLimited,
        StatusCode::SERVICE_UNAVAILABLE => ErrorCode::ResourceExhausted,
        _ => ErrorCode::Internal,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use axum::Router;
    use axum::http::HeaderMap;
    use axum::response::IntoResponse;
    use axum::routing::{get, post};

    use super::*;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 5,
            jitter_factor: 0.0,
        }
    }

    async fn serve(app: Router) -> Url {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Url::parse(&format!("http://{}", addr)).unwrap()
    }

    fn client(base: Url, token: Option<&str>) -> PairingClient {
        PairingClient::new(
            base,
            token.map(|t| SecretString::from(t.to_string())),
            fast_policy(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn error_body(status: StatusCode, code: ErrorCode) -> axum::response::Response {
        (
            status,
            axum::Json(ErrorResponse::new(code, "nope")),
        )
            .into_response()
    }

    #[test]
    fn test_code_for_status() {
        assert_eq!(code_for_status(StatusCode::UNAUTHORIZED), ErrorCode::Unauthenticated);
        assert_eq!(code_for_status(StatusCode::TOO_MANY_REQUESTS), ErrorCode::RateLimited);
        assert_eq!(code_for_status(StatusCode::BAD_GATEWAY), ErrorCode::Internal);
    }

    #[test]
    fn test_rejects_non_base_url() {
        let url = Url::parse("mailto:someone@example.com").unwrap();
        let result = PairingClient::new(url, None, fast_policy(), Duration::from_secs(1));
        assert!(matches!(result, Err(ClientError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_missing_token_fails_before_io() {
        let hits = Arc::new(AtomicU32::new(0));
        let h = Arc::clone(&hits);
        let app = Router::new().route(
            GENERATE_PATH,
            post(move || {
                h.fetch_add(1, Ordering::SeqCst);
                async { StatusCode::OK }
            }),
        );
        let base = serve(app).await;

        let result = client(base, None).generate_pairing_code().await;
        assert!(matches!(result, Err(ClientError::Unauthenticated)));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_sends_bearer_and_decodes_status() {
        let pairing_id = Uuid::new_v4();
        let app = Router::new().route(
            "/functions/v1/pairings/{id}/status",
            get(move |headers: HeaderMap| async move {
                let auth = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                if auth != "Bearer secret-token" {
                    return error_body(StatusCode::UNAUTHORIZED, ErrorCode::Unauthenticated);
                }
                axum::Json(serde_json::json!({
                    "id": pairing_id,
                    "status": "pending",
                    "is_used": false,
                    "is_active": false,
                    "expires_at": "2030-01-01T00:00:00Z",
                    "created_at": "2030-01-01T00:00:00Z",
                    "is_expired": false
                }))
                .into_response()
            }),
        );
        let base = serve(app).await;

        let status = client(base, Some("secret-token"))
            .get_pairing_status(pairing_id)
            .await
            .unwrap();
        assert_eq!(status.id, pairing_id);
        assert!(!status.is_used);
    }

    #[tokio::test]
    async fn test_retries_server_errors() {
        let hits = Arc::new(AtomicU32::new(0));
        let h = Arc::clone(&hits);
        let app = Router::new().route(
            VALIDATE_PATH,
            post(move || {
                let n = h.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        error_body(StatusCode::SERVICE_UNAVAILABLE, ErrorCode::Internal)
                    } else {
                        error_body(StatusCode::BAD_REQUEST, ErrorCode::InvalidArgument)
                    }
                }
            }),
        );
        let base = serve(app).await;

        let err = client(base, Some("t"))
            .validate_pairing_code("123456789012345")
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::InvalidArgument));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failed_precondition_not_retried_but_integrity_race_is() {
        let hits = Arc::new(AtomicU32::new(0));
        let h = Arc::clone(&hits);
        let app = Router::new()
            .route(
                ACCEPT_PATH,
                post(|| async {
                    error_body(StatusCode::CONFLICT, ErrorCode::FailedPrecondition)
                }),
            )
            .route(
                REJECT_PATH,
                post(move || {
                    h.fetch_add(1, Ordering::SeqCst);
                    async { error_body(StatusCode::CONFLICT, ErrorCode::IntegrityRace) }
                }),
            );
        let base = serve(app).await;
        let client = client(base, Some("t"));

        let err = client.accept_pairing(Uuid::new_v4(), None).await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::FailedPrecondition));

        let err = client.reject_pairing(Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::IntegrityRace));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_rate_limit_reads_retry_after() {
        let app = Router::new().route(
            VALIDATE_PATH,
            post(|| async {
                let mut response =
                    error_body(StatusCode::TOO_MANY_REQUESTS, ErrorCode::RateLimited);
                response
                    .headers_mut()
                    .insert(RETRY_AFTER, axum::http::HeaderValue::from_static("0"));
                response
            }),
        );
        let base = serve(app).await;

        let err = client(base, Some("t"))
            .validate_pairing_code("123456789012345")
            .await
            .unwrap_err();
        match err {
            ClientError::Api {
                status,
                code,
                retry_after,
                ..
            } => {
                assert_eq!(status, 429);
                assert_eq!(code, ErrorCode::RateLimited);
                assert_eq!(retry_after, Some(Duration::ZERO));
            }
            other => panic!("expected Api error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_non_envelope_error_body() {
        let app = Router::new().route(
            GENERATE_PATH,
            post(|| async { (StatusCode::FORBIDDEN, "blocked by proxy") }),
        );
        let base = serve(app).await;

        let err = client(base, Some("t")).generate_pairing_code().await.unwrap_err();
        match err {
            ClientError::Api { code, message, .. } => {
                assert_eq!(code, ErrorCode::Forbidden);
                assert_eq!(message, "blocked by proxy");
            }
            other => panic!("expected Api error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connection_refused_is_retried_then_surfaced() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let base = Url::parse(&format!("http://{}", addr)).unwrap();
        let err = client(base, Some("t")).generate_pairing_code().await.unwrap_err();
        assert!(matches!(err, ClientError::Transport(_)));
        assert!(err.is_transient());
    }
}
