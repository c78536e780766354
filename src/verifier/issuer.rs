//! Verification against a single issuer.
//!
//! # Verification flow
//!
//! 1. Decode the JWT header (no verification) to extract `kid` and `alg`.
//! 2. Read `iss` from the unverified payload; a foreign issuer fails here
//!    without touching the JWKS.
//! 3. Look the `kid` up in the cached JWKS, refreshing once if unknown.
//! 4. Verify signature, `exp`, `nbf`, `iss` and `aud` with a 60 second leeway.
//! 5. Decode provider-specific claims according to the issuer's provider kind.

use std::sync::Arc;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, errors::ErrorKind};
use serde::Deserialize;
use tracing::{debug, info};

use super::{
    ExternalClaims, ProviderClaims, VerifyError,
    jwks::{JwksCache, find_key_in_jwks},
};
use crate::config::{IssuerConfig, ProviderKind};

/// Clock skew tolerance in seconds.
const LEEWAY_SECS: u64 = 60;

/// Raw claims of an external ID token.
#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    iss: String,
    sub: String,
    /// Single string or array.
    #[serde(default)]
    aud: serde_json::Value,
    exp: i64,
    #[serde(default)]
    nbf: Option<i64>,
    #[serde(default)]
    iat: Option<i64>,
    #[serde(default)]
    firebase: Option<FirebaseSection>,
    #[serde(default)]
    student_division: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FirebaseSection {
    #[serde(default)]
    tenant: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UnverifiedIssuer {
    #[serde(default)]
    iss: Option<String>,
}

/// Verifier bound to one issuer / audience / JWKS endpoint.
pub struct IssuerVerifier {
    config: IssuerConfig,
    jwks: Arc<JwksCache>,
}

impl IssuerVerifier {
    /// Create the verifier and fetch its JWKS once.
    ///
    /// Fails if the initial fetch fails, so a misconfigured endpoint is caught
    /// at startup.
    pub async fn connect(config: IssuerConfig, jwks: Arc<JwksCache>) -> Result<Self, VerifyError> {
        let keys = jwks.get_or_fetch(&config.jwks_endpoint, true).await?;
        info!(
            issuer = %config.issuer,
            jwks_endpoint = %config.jwks_endpoint,
            keys = keys.keys.len(),
            "Issuer verifier ready"
        );
        Ok(Self { config, jwks })
    }

    /// Configured issuer.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.config.issuer
    }

    /// Verify `token` against this issuer.
    pub async fn verify(&self, token: &str) -> Result<ExternalClaims, VerifyError> {
        let header =
            jsonwebtoken::decode_header(token).map_err(|e| VerifyError::Malformed(e.to_string()))?;

        let actual_issuer = extract_unverified_issuer(token)?;
        if actual_issuer != self.config.issuer {
            return Err(self.issuer_mismatch(actual_issuer));
        }

        let validation = self.build_validation(header.alg)?;
        let kid = header.kid.as_deref().ok_or(VerifyError::MissingKeyId)?;
        let decoding_key = self.find_decoding_key(kid).await?;

        let token_data = jsonwebtoken::decode::<IdTokenClaims>(token, &decoding_key, &validation)
            .map_err(|e| self.classify(&e, &actual_issuer))?;

        Ok(self.to_external(token_data.claims))
    }

    /// Find a decoding key by `kid`, refreshing the JWKS once if not found.
    async fn find_decoding_key(&self, kid: &str) -> Result<DecodingKey, VerifyError> {
        let endpoint = &self.config.jwks_endpoint;

        let jwks = self.jwks.get_or_fetch(endpoint, false).await?;
        if let Some(key) = find_key_in_jwks(&jwks, kid) {
            return Ok(key);
        }

        debug!(kid = %kid, issuer = %self.config.issuer, "Key not found in cached JWKS, refreshing");
        let jwks = self.jwks.get_or_fetch(endpoint, true).await?;
        find_key_in_jwks(&jwks, kid).ok_or_else(|| VerifyError::UnknownKeyId(kid.to_string()))
    }

    fn build_validation(&self, alg: Algorithm) -> Result<Validation, VerifyError> {
        match alg {
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::ES256
            | Algorithm::ES384 => {}
            other => return Err(VerifyError::UnsupportedAlgorithm(other)),
        }

        let mut v = Validation::new(alg);
        v.leeway = LEEWAY_SECS;
        v.validate_nbf = true;
        v.set_issuer(&[&self.config.issuer]);
        v.set_audience(&[&self.config.audience]);
        v.set_required_spec_claims(&["exp", "iss", "sub", "aud"]);
        Ok(v)
    }

    fn classify(&self, err: &jsonwebtoken::errors::Error, actual_issuer: &str) -> VerifyError {
        match err.kind() {
            ErrorKind::InvalidSignature => VerifyError::SignatureInvalid,
            ErrorKind::ExpiredSignature => VerifyError::Expired,
            ErrorKind::ImmatureSignature => VerifyError::NotYetValid,
            ErrorKind::InvalidIssuer => self.issuer_mismatch(actual_issuer.to_string()),
            ErrorKind::InvalidAudience => self.audience_mismatch(),
            ErrorKind::MissingRequiredClaim(claim) if claim == "aud" => self.audience_mismatch(),
            ErrorKind::MissingRequiredClaim(claim) if claim == "iss" => {
                self.issuer_mismatch(String::new())
            }
            _ => VerifyError::Malformed(err.to_string()),
        }
    }

    fn issuer_mismatch(&self, actual: String) -> VerifyError {
        VerifyError::IssuerMismatch {
            expected: self.config.issuer.clone(),
            actual,
        }
    }

    fn audience_mismatch(&self) -> VerifyError {
        VerifyError::AudienceMismatch {
            expected: self.config.audience.clone(),
        }
    }

    fn to_external(&self, claims: IdTokenClaims) -> ExternalClaims {
        let provider = match self.config.provider {
            ProviderKind::Firebase => ProviderClaims::Firebase {
                tenant: claims
                    .firebase
                    .and_then(|f| f.tenant)
                    .filter(|t| !t.is_empty()),
            },
            ProviderKind::Keycloak => ProviderClaims::Keycloak {
                division: claims.student_division,
            },
            ProviderKind::Generic => ProviderClaims::Generic,
        };

        ExternalClaims {
            subject: claims.sub,
            issuer: claims.iss,
            audience: audience_list(&claims.aud),
            expires_at: claims.exp,
            not_before: claims.nbf,
            issued_at: claims.iat,
            jwks_url: self.config.jwks_endpoint.clone(),
            provider,
        }
    }
}

/// Read `iss` from a JWT without verifying it.
fn extract_unverified_issuer(token: &str) -> Result<String, VerifyError> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| VerifyError::Malformed("missing payload segment".into()))?;

    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| VerifyError::Malformed(e.to_string()))?;

    let claims: UnverifiedIssuer =
        serde_json::from_slice(&bytes).map_err(|e| VerifyError::Malformed(e.to_string()))?;
    Ok(claims.iss.unwrap_or_default())
}

/// Normalize an `aud` claim to a list.
fn audience_list(aud: &serde_json::Value) -> Vec<String> {
    match aud {
        serde_json::Value::String(s) => vec![s.clone()],
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}
