//! HMAC-SHA256 request signatures from partner systems.
//!
//! Partners hold an API keypair. They send the public key, the request body
//! and the hex HMAC-SHA256 of the body keyed by the private key.

use std::sync::Arc;

use hmac::{KeyInit, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::features::{Feature, FeatureToggles};
use crate::store::{ApiKeypairStore, Connection};
use crate::{Error, Result};

/// Owner of a verified keypair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedCaller {
    /// User owning the keypair
    pub user_id: String,
    /// Organization owning the keypair
    pub organization_id: String,
}

/// Hex HMAC-SHA256 of `body` keyed by `secret`.
pub fn sign(secret: &str, body: &[u8]) -> Result<String> {
    let mut mac = hmac::Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| Error::Internal(format!("Invalid HMAC key: {e}")))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verifies partner signatures against the keypair store.
pub struct SignatureAuthenticator {
    keypairs: Arc<dyn ApiKeypairStore>,
    toggles: Arc<dyn FeatureToggles>,
}

impl SignatureAuthenticator {
    /// Create an authenticator reading keypairs from `keypairs`.
    pub fn new(keypairs: Arc<dyn ApiKeypairStore>, toggles: Arc<dyn FeatureToggles>) -> Self {
        Self { keypairs, toggles }
    }

    /// Check `signature` over `body` for the keypair named by `public_key`.
    ///
    /// Fails with [`Error::UnknownKey`] or [`Error::InvalidSignature`]; both
    /// surface with the same status and message.
    pub async fn verify(&self, public_key: &str, body: &[u8], signature: &str) -> Result<SignedCaller> {
        let decoupled = self
            .toggles
            .is_enabled(Feature::DecoupledAuthDb, None)
            .await?;
        let conn = Connection::select(decoupled);

        let pair = self
            .keypairs
            .get_by_public_key(conn, public_key)
            .await?
            .ok_or(Error::UnknownKey)?;

        let expected = sign(&pair.private_key, body)?;
        if !bool::from(expected.as_bytes().ct_eq(signature.as_bytes())) {
            debug!(public_key, ?conn, "Signature mismatch");
            return Err(Error::InvalidSignature);
        }

        Ok(SignedCaller {
            user_id: pair.user_id,
            organization_id: pair.organization_id,
        })
    }
}
