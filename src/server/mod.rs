//! HTTP gateway for the pairing operations.
//!
//! All pairing routes sit under `/functions/v1` behind the bearer token
//! middleware. CORS is the outermost layer so pre-flight `OPTIONS` requests
//! are answered without credentials. `/health` is unauthenticated.

mod auth;
mod error;
mod handlers;

pub use error::{ApiError, status_for};

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    http::{Method, header},
    middleware,
    routing::{get, post},
};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::{ACCEPT_PATH, GENERATE_PATH, REJECT_PATH, VALIDATE_PATH};
use crate::auth::IdentityResolver;
use crate::error::Error;
use crate::pairing::PairingService;

/// Shared state for every route.
#[derive(Clone)]
pub struct AppState {
    pub service: PairingService,
    pub resolver: Arc<dyn IdentityResolver>,
}

/// Build the full application router.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    Router::new()
        .route(GENERATE_PATH, post(handlers::generate_pairing_code))
        .route(VALIDATE_PATH, post(handlers::validate_pairing_code))
        .route(ACCEPT_PATH, post(handlers::accept_pairing))
        .route(REJECT_PATH, post(handlers::reject_pairing))
        .route(
            "/functions/v1/pairings/{pairing_id}/status",
            get(handlers::pairing_status),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_identity,
        ))
        .route("/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Owns the listening socket and the serve task.
pub struct GatewayServer {
    addr: SocketAddr,
    app: Option<Router>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl GatewayServer {
    pub fn new(addr: SocketAddr, state: AppState) -> Self {
        Self {
            addr,
            app: Some(router(state)),
            shutdown_tx: None,
            handle: None,
        }
    }

    /// Bind the listener and spawn the server. Returns the bound address,
    /// which differs from the configured one when port 0 was requested.
    pub async fn start(&mut self) -> Result<SocketAddr, Error> {
        let app = self
            .app
            .take()
            .ok_or_else(|| Error::Server("gateway already started".to_string()))?;

        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .map_err(|e| Error::Server(format!("Failed to bind to {}: {}", self.addr, e)))?;
        let local = listener
            .local_addr()
            .map_err(|e| Error::Server(format!("Failed to read bound address: {}", e)))?;

        tracing::info!("Pairing gateway listening on {}", local);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                    tracing::info!("Pairing gateway shutting down");
                })
                .await
            {
                tracing::error!("Pairing gateway error: {}", e);
            }
        });

        self.addr = local;
        self.handle = Some(handle);
        Ok(local)
    }

    /// Resolves when the serve task exits. Cancel-safe: dropping this
    /// future leaves the task handle in place for [`shutdown`](Self::shutdown).
    pub async fn wait(&mut self) {
        if let Some(handle) = self.handle.as_mut() {
            let _ = handle.await;
            self.handle = None;
        }
    }

    /// Signal graceful shutdown and wait for the server task to finish.
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.wait().await;
    }
}
