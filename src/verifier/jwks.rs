//! JWKS fetching and caching.
//!
//! One cache is shared by all issuer verifiers and keyed by JWKS endpoint.
//! Entries live for the configured TTL (default 1 hour). A verifier that
//! sees an unknown `kid` forces a single refresh before failing.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use jsonwebtoken::{
    DecodingKey,
    jwk::{AlgorithmParameters, JwkSet},
};
use tracing::debug;

use super::VerifyError;
use crate::config::JwksConfig;
use crate::{Error, Result};

/// Cached JWKS entry.
struct CachedJwks {
    keys: JwkSet,
    fetched_at: Instant,
}

/// JWKS cache, one entry per endpoint.
pub struct JwksCache {
    inner: DashMap<String, CachedJwks>,
    http: reqwest::Client,
    ttl: Duration,
}

impl JwksCache {
    /// Build the cache and its HTTP client.
    pub fn new(config: &JwksConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .https_only(config.require_https)
            .timeout(config.fetch_timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build JWKS client: {e}")))?;

        Ok(Self {
            inner: DashMap::new(),
            http,
            ttl: config.cache_ttl,
        })
    }

    /// Return the cached JWKS for `jwks_uri`, or fetch it if missing or stale.
    ///
    /// If `force_refresh` is `true`, the cache is bypassed regardless of TTL.
    pub async fn get_or_fetch(
        &self,
        jwks_uri: &str,
        force_refresh: bool,
    ) -> std::result::Result<JwkSet, VerifyError> {
        if !force_refresh {
            if let Some(cached) = self.inner.get(jwks_uri) {
                if cached.fetched_at.elapsed() < self.ttl {
                    return Ok(cached.keys.clone());
                }
            }
        }

        debug!(jwks_uri = %jwks_uri, force_refresh, "Fetching JWKS");
        let jwks: JwkSet = self
            .http
            .get(jwks_uri)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        self.inner.insert(
            jwks_uri.to_string(),
            CachedJwks {
                keys: jwks.clone(),
                fetched_at: Instant::now(),
            },
        );

        Ok(jwks)
    }
}

/// Find a JWK by `kid` and convert it to a `DecodingKey`.
pub(crate) fn find_key_in_jwks(jwks: &JwkSet, kid: &str) -> Option<DecodingKey> {
    let jwk = jwks
        .keys
        .iter()
        .find(|jwk| jwk.common.key_id.as_deref() == Some(kid))?;

    match &jwk.algorithm {
        AlgorithmParameters::RSA(rsa) => DecodingKey::from_rsa_components(&rsa.n, &rsa.e).ok(),
        AlgorithmParameters::EllipticCurve(ec) => DecodingKey::from_ec_components(&ec.x, &ec.y).ok(),
        AlgorithmParameters::OctetKey(_) | AlgorithmParameters::OctetKeyPair(_) => None,
    }
}
