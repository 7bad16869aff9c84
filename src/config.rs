//! Configuration from environment variables.
//!
//! `.env` is loaded first if present (via dotenvy); real environment
//! variables win over it.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use crate::client::RetryPolicy;
use crate::error::ConfigError;
use crate::pairing::rate_limit::{DEFAULT_MAX_ATTEMPTS, DEFAULT_WINDOW};
use crate::pairing::service::{DEFAULT_CALL_TIMEOUT, DEFAULT_CODE_TTL, ServiceConfig};

const DEFAULT_BIND_ADDR: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8787);
const DEFAULT_POOL_SIZE: usize = 10;
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Server-side configuration.
#[derive(Debug)]
pub struct Config {
    pub bind_addr: SocketAddr,
    /// Postgres URL; the in-memory store is used when absent.
    pub database_url: Option<SecretString>,
    pub database_pool_size: usize,
    pub code_ttl: Duration,
    pub validate_max_attempts: u32,
    pub validate_window: Duration,
    pub store_timeout: Duration,
    /// `None` disables the background expiry sweep.
    pub sweep_interval: Option<Duration>,
    pub auth_service_url: Option<String>,
    /// `token=uuid:role,...` for development setups without an auth service.
    pub static_tokens: Option<SecretString>,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let validate_max_attempts = parse_env("PAIRING_VALIDATE_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?;
        if validate_max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "PAIRING_VALIDATE_MAX_ATTEMPTS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        let sweep_secs = parse_env("PAIRING_SWEEP_INTERVAL_SECS", DEFAULT_SWEEP_INTERVAL.as_secs())?;

        Ok(Self {
            bind_addr: parse_env("PAIRLINK_BIND_ADDR", DEFAULT_BIND_ADDR)?,
            database_url: optional("DATABASE_URL").map(SecretString::from),
            database_pool_size: parse_env("DATABASE_POOL_SIZE", DEFAULT_POOL_SIZE)?,
            code_ttl: secs("PAIRING_CODE_TTL_SECS", DEFAULT_CODE_TTL)?,
            validate_max_attempts,
            validate_window: secs("PAIRING_VALIDATE_WINDOW_SECS", DEFAULT_WINDOW)?,
            store_timeout: secs("PAIRING_STORE_TIMEOUT_SECS", DEFAULT_CALL_TIMEOUT)?,
            sweep_interval: (sweep_secs > 0).then(|| Duration::from_secs(sweep_secs)),
            auth_service_url: optional("AUTH_SERVICE_URL"),
            static_tokens: optional("PAIRLINK_STATIC_TOKENS").map(SecretString::from),
            log_format: parse_env("PAIRLINK_LOG_FORMAT", LogFormat::Pretty)?,
        })
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            code_ttl: self.code_ttl,
            store_timeout: self.store_timeout,
            notify_timeout: self.store_timeout,
        }
    }
}

/// Client-side configuration for the retrying gateway.
#[derive(Debug)]
pub struct ClientConfig {
    pub api_url: Url,
    pub token: Option<SecretString>,
    pub retry: RetryPolicy,
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let raw_url = optional("PAIRLINK_API_URL").unwrap_or_else(|| format!("http://{}", DEFAULT_BIND_ADDR));
        let api_url = Url::parse(&raw_url).map_err(|e| ConfigError::InvalidValue {
            key: "PAIRLINK_API_URL".to_string(),
            message: e.to_string(),
        })?;

        let defaults = RetryPolicy::default();
        let max_attempts = parse_env("PAIRLINK_RETRY_MAX_ATTEMPTS", defaults.max_attempts)?;
        if max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "PAIRLINK_RETRY_MAX_ATTEMPTS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        let base_delay_ms = parse_env("PAIRLINK_RETRY_BASE_MS", defaults.base_delay_ms)?;

        Ok(Self {
            api_url,
            token: optional("PAIRLINK_API_TOKEN").map(SecretString::from),
            retry: RetryPolicy {
                max_attempts,
                base_delay_ms,
                ..defaults
            },
            request_timeout: DEFAULT_CALL_TIMEOUT,
        })
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {}", other)),
        }
    }
}

/// Install the global tracing subscriber. `RUST_LOG` overrides the default filter.
pub fn init_tracing(format: LogFormat) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("pairlink=info,tower_http=info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    // A subscriber may already be installed (tests, embedding binaries).
    let _ = match format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

fn optional(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional(key) {
        Some(raw) => raw.trim().parse::<T>().map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn secs(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    let value = parse_env(key, default.as_secs())?;
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be greater than zero".to_string(),
        });
    }
    Ok(Duration::from_secs(value))
}
