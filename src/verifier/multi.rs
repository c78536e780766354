//! Verification across all configured issuers.

use std::sync::Arc;

use futures::future::try_join_all;
use tracing::debug;

use super::{CombinedVerifyError, ExternalClaims, IssuerVerifier, JwksCache};
use crate::config::IssuerConfig;
use crate::{Error, Result};

/// Anything that can turn an external ID token into verified claims.
#[async_trait::async_trait]
pub trait TokenVerifier: Send + Sync + 'static {
    /// Verify `token`, reporting every rejection if none accepts it.
    async fn verify(&self, token: &str) -> std::result::Result<ExternalClaims, CombinedVerifyError>;
}

/// Tries each issuer verifier in configured order; the first success wins.
pub struct MultiIssuerVerifier {
    verifiers: Vec<IssuerVerifier>,
}

impl MultiIssuerVerifier {
    /// Wrap already connected verifiers.
    #[must_use]
    pub fn new(verifiers: Vec<IssuerVerifier>) -> Self {
        Self { verifiers }
    }

    /// Connect one verifier per issuer. Fails if any initial JWKS fetch fails.
    pub async fn connect(issuers: &[IssuerConfig], jwks: Arc<JwksCache>) -> Result<Self> {
        let verifiers = try_join_all(issuers.iter().map(|cfg| {
            let jwks = Arc::clone(&jwks);
            async move {
                IssuerVerifier::connect(cfg.clone(), jwks)
                    .await
                    .map_err(|e| {
                        Error::Config(format!("Failed to initialize verifier for {}: {e}", cfg.issuer))
                    })
            }
        }))
        .await?;

        Ok(Self::new(verifiers))
    }

    /// Issuers in attempt order.
    pub fn issuers(&self) -> impl Iterator<Item = &str> {
        self.verifiers.iter().map(IssuerVerifier::issuer)
    }
}

#[async_trait::async_trait]
impl TokenVerifier for MultiIssuerVerifier {
    async fn verify(&self, token: &str) -> std::result::Result<ExternalClaims, CombinedVerifyError> {
        let mut failures = Vec::with_capacity(self.verifiers.len());

        for verifier in &self.verifiers {
            match verifier.verify(token).await {
                Ok(claims) => return Ok(claims),
                Err(e) => {
                    debug!(issuer = %verifier.issuer(), error = %e, "Issuer rejected token");
                    failures.push((verifier.issuer().to_string(), e));
                }
            }
        }

        Err(CombinedVerifyError::new(failures))
    }
}
