//! External ID token verification.
//!
//! Every configured issuer gets its own [`IssuerVerifier`]. The
//! [`MultiIssuerVerifier`] tries them in order and keeps every failure when
//! none accepts the token.

pub mod issuer;
pub mod jwks;
pub mod multi;

use std::fmt;

use jsonwebtoken::Algorithm;
use serde::Serialize;

pub use issuer::IssuerVerifier;
pub use jwks::JwksCache;
pub use multi::{MultiIssuerVerifier, TokenVerifier};

/// Error variants for a single issuer's verification.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// Not a decodable JWT.
    #[error("malformed token: {0}")]
    Malformed(String),

    /// Signature does not match the issuer's key.
    #[error("token signature is invalid")]
    SignatureInvalid,

    /// `exp` is in the past (beyond the clock leeway).
    #[error("token is expired")]
    Expired,

    /// `nbf` is in the future (beyond the clock leeway).
    #[error("token is not valid yet")]
    NotYetValid,

    /// `iss` is not this verifier's issuer.
    #[error("issuer mismatch: expected {expected}, got {actual}")]
    IssuerMismatch {
        /// Configured issuer.
        expected: String,
        /// Issuer found in the token.
        actual: String,
    },

    /// `aud` does not contain this verifier's audience.
    #[error("audience mismatch: expected {expected}")]
    AudienceMismatch {
        /// Configured audience.
        expected: String,
    },

    /// Header has no `kid`.
    #[error("JWT missing 'kid' field in header")]
    MissingKeyId,

    /// `kid` is not in the issuer's JWKS, even after a refresh.
    #[error("unknown key id: {0}")]
    UnknownKeyId(String),

    /// Header algorithm is not an accepted asymmetric algorithm.
    #[error("unsupported algorithm: {0:?}")]
    UnsupportedAlgorithm(Algorithm),

    /// Network or HTTP error while fetching JWKS.
    #[error("JWKS fetch error: {0}")]
    JwksFetch(#[from] reqwest::Error),
}

/// Every issuer's reason for rejecting one token.
#[derive(Debug)]
pub struct CombinedVerifyError {
    failures: Vec<(String, VerifyError)>,
}

impl CombinedVerifyError {
    /// Wrap `(issuer, error)` pairs in attempt order.
    #[must_use]
    pub fn new(failures: Vec<(String, VerifyError)>) -> Self {
        Self { failures }
    }

    /// `(issuer, error)` pairs in attempt order.
    #[must_use]
    pub fn failures(&self) -> &[(String, VerifyError)] {
        &self.failures
    }

    /// The error reported by `issuer`, if it was tried.
    #[must_use]
    pub fn for_issuer(&self, issuer: &str) -> Option<&VerifyError> {
        self.failures
            .iter()
            .find(|(iss, _)| iss == issuer)
            .map(|(_, err)| err)
    }
}

impl fmt::Display for CombinedVerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.failures.is_empty() {
            return f.write_str("no issuer configured");
        }
        for (i, (issuer, err)) in self.failures.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{err}, issuer: {issuer}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CombinedVerifyError {}

/// Claims specific to the identity provider that issued the token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderClaims {
    /// Firebase / Identity Platform. `tenant` is set for multi-tenant projects.
    Firebase {
        /// Identity Platform tenant id.
        tenant: Option<String>,
    },
    /// Keycloak fronting the JPREP SSO.
    Keycloak {
        /// Vendor student division.
        division: Option<String>,
    },
    /// Any other OIDC issuer.
    Generic,
}

/// Verified claims of an external ID token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExternalClaims {
    /// `sub`
    pub subject: String,
    /// `iss`
    pub issuer: String,
    /// `aud`, normalized to a list.
    pub audience: Vec<String>,
    /// `exp` (Unix seconds)
    pub expires_at: i64,
    /// `nbf` (Unix seconds)
    pub not_before: Option<i64>,
    /// `iat` (Unix seconds)
    pub issued_at: Option<i64>,
    /// JWKS endpoint of the verifier that accepted the token.
    pub jwks_url: String,
    /// Provider-specific claims.
    pub provider: ProviderClaims,
}

impl ExternalClaims {
    /// Identity Platform tenant, if any.
    #[must_use]
    pub fn tenant(&self) -> Option<&str> {
        match &self.provider {
            ProviderClaims::Firebase { tenant } => tenant.as_deref(),
            _ => None,
        }
    }

    /// Vendor division, if the token came from the Keycloak provider.
    #[must_use]
    pub fn division(&self) -> Option<&str> {
        match &self.provider {
            ProviderClaims::Keycloak { division } => division.as_deref(),
            _ => None,
        }
    }

    /// Project id. For Firebase tokens this is the first audience.
    #[must_use]
    pub fn project_id(&self) -> Option<&str> {
        self.audience.first().map(String::as_str)
    }

    /// Drop tenant information.
    pub fn strip_tenant(&mut self) {
        if let ProviderClaims::Firebase { tenant } = &mut self.provider {
            *tenant = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn firebase_claims(tenant: Option<&str>) -> ExternalClaims {
        ExternalClaims {
            subject: "user-1".into(),
            issuer: "https://securetoken.google.com/project-a".into(),
            audience: vec!["project-a".into()],
            expires_at: 1_700_000_000,
            not_before: None,
            issued_at: None,
            jwks_url: "https://example.test/jwks".into(),
            provider: ProviderClaims::Firebase {
                tenant: tenant.map(str::to_string),
            },
        }
    }

    #[test]
    fn combined_error_lists_every_issuer() {
        // GIVEN: two issuers failing for different reasons
        let err = CombinedVerifyError::new(vec![
            ("https://a.example".into(), VerifyError::Expired),
            (
                "https://b.example".into(),
                VerifyError::AudienceMismatch {
                    expected: "b".into(),
                },
            ),
        ]);

        // WHEN: rendered
        let text = err.to_string();

        // THEN: both reasons and issuers are present
        assert_eq!(
            text,
            "token is expired, issuer: https://a.example; audience mismatch: expected b, issuer: https://b.example"
        );
        assert!(matches!(
            err.for_issuer("https://b.example"),
            Some(VerifyError::AudienceMismatch { .. })
        ));
    }

    #[test]
    fn strip_tenant_clears_firebase_tenant() {
        let mut claims = firebase_claims(Some("tenant-1"));
        assert_eq!(claims.tenant(), Some("tenant-1"));

        claims.strip_tenant();

        assert_eq!(claims.tenant(), None);
        assert_eq!(claims.project_id(), Some("project-a"));
    }

    #[test]
    fn division_only_reported_for_keycloak() {
        let mut claims = firebase_claims(None);
        assert_eq!(claims.division(), None);

        claims.provider = ProviderClaims::Keycloak {
            division: Some("kids".into()),
        };
        assert_eq!(claims.division(), Some("kids"));
        assert_eq!(claims.tenant(), None);
    }
}
