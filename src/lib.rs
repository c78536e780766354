//! Auth Bridge Library
//!
//! Verifies ID tokens from several external identity providers and exchanges
//! them for short-lived tokens signed by this service.
//!
//! # Features
//!
//! - **Multi-issuer verification**: per-issuer JWKS with caching and refresh on unknown `kid`
//! - **Token exchange**: authorization context re-derived from the user store
//! - **Key rotation**: primary-first JWKS published at `/.well-known/jwks.json`
//! - **Partner signatures**: HMAC-SHA256 over API keypairs
//! - **Salesforce**: OAuth 2.0 JWT-bearer flow per organization

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;
pub mod auth_info;
pub mod cli;
pub mod config;
pub mod constants;
pub mod error;
pub mod exchange;
pub mod features;
pub mod keyring;
pub mod salesforce;
pub mod server;
pub mod service;
pub mod signature;
pub mod store;
pub mod verifier;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Internal(e.to_string())),
        _ => subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| Error::Internal(e.to_string())),
    }
}
