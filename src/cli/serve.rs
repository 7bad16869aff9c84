//! `serve` and `migrate`.

use std::sync::Arc;

use secrecy::ExposeSecret;

use crate::auth::{
    IdentityResolver, RemoteIdentityResolver, StaticIdentityResolver, describe_identities,
};
use crate::config::Config;
use crate::error::ConfigError;
use crate::pairing::{
    InMemoryAttemptLimiter, LogNotifier, PairingService, spawn_expiry_sweeper,
};
use crate::server::{AppState, GatewayServer};
use crate::store::{InMemoryPairingStore, PairingStore};

/// Run the gateway until Ctrl-C.
pub async fn run_serve(config: Config) -> anyhow::Result<()> {
    let store = build_store(&config).await?;
    let resolver = build_resolver(&config)?;
    let limiter = Arc::new(InMemoryAttemptLimiter::new(
        config.validate_max_attempts,
        config.validate_window,
    ));

    let service = PairingService::new(
        store,
        limiter,
        Arc::new(LogNotifier),
        config.service_config(),
    );

    let sweeper = config
        .sweep_interval
        .map(|interval| spawn_expiry_sweeper(service.clone(), interval));

    let mut server = GatewayServer::new(config.bind_addr, AppState { service, resolver });
    server.start().await?;

    let interrupted = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            true
        }
        _ = server.wait() => false,
    };

    if interrupted {
        server.shutdown().await;
    } else {
        tracing::warn!("Gateway exited on its own");
    }

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    Ok(())
}

/// Apply migrations against `DATABASE_URL`.
#[cfg(feature = "postgres")]
pub async fn run_migrate(config: Config) -> anyhow::Result<()> {
    let url = config
        .database_url
        .as_ref()
        .ok_or_else(|| ConfigError::MissingEnvVar("DATABASE_URL".to_string()))?;
    let store =
        crate::store::PostgresPairingStore::connect(url.expose_secret(), config.database_pool_size)?;
    store.migrate().await?;
    println!("Migrations applied.");
    Ok(())
}

#[cfg(feature = "postgres")]
async fn build_store(config: &Config) -> anyhow::Result<Arc<dyn PairingStore>> {
    match &config.database_url {
        Some(url) => {
            let store = crate::store::PostgresPairingStore::connect(
                url.expose_secret(),
                config.database_pool_size,
            )?;
            store.migrate().await?;
            tracing::info!("Using PostgreSQL pairing store");
            Ok(Arc::new(store))
        }
        None => Ok(in_memory_store()),
    }
}

#[cfg(not(feature = "postgres"))]
async fn build_store(config: &Config) -> anyhow::Result<Arc<dyn PairingStore>> {
    if config.database_url.is_some() {
        anyhow::bail!("DATABASE_URL is set but this build has no postgres support");
    }
    Ok(in_memory_store())
}

fn in_memory_store() -> Arc<dyn PairingStore> {
    tracing::warn!("DATABASE_URL not set, pairings are kept in memory and lost on restart");
    Arc::new(InMemoryPairingStore::new())
}

fn build_resolver(config: &Config) -> Result<Arc<dyn IdentityResolver>, ConfigError> {
    if let Some(url) = &config.auth_service_url {
        tracing::info!(auth_service = %url, "Resolving callers through the auth service");
        return Ok(Arc::new(RemoteIdentityResolver::new(url, config.store_timeout)?));
    }

    if let Some(tokens) = &config.static_tokens {
        let resolver = StaticIdentityResolver::parse(tokens.expose_secret())?;
        for (user_id, role) in describe_identities(&resolver) {
            tracing::info!(%user_id, %role, "Static identity configured");
        }
        return Ok(Arc::new(resolver));
    }

    Err(ConfigError::MissingEnvVar(
        "AUTH_SERVICE_URL or PAIRLINK_STATIC_TOKENS".to_string(),
    ))
}
