//! pairlink: parent/child device pairing.
//!
//! A child account generates a short-lived 15-digit code, a parent account
//! submits it to bind itself to the child's pending pairing, and the child
//! activates the pairing by granting capability permissions.
//!
//! - [`pairing`]: codes, records, the state machine and [`PairingService`](pairing::PairingService)
//! - [`store`]: persistence behind the [`PairingStore`](store::PairingStore) trait
//! - [`server`]: the axum gateway under `/functions/v1`
//! - [`client`]: the retrying HTTP client

pub mod api;
pub mod auth;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod pairing;
pub mod server;
pub mod store;

pub use error::{Error, Result};
