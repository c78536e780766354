//! Salesforce OAuth 2.0 JWT-bearer flow.
//!
//! Each organization has a connected app: a client id and an RSA key. An
//! access token is obtained by posting a short-lived RS256 assertion to the
//! token endpoint.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::SalesforceConfig;
use crate::error::Code;
use crate::{Error, Result};

/// OAuth grant type of the JWT-bearer flow.
pub const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Error variants of the JWT-bearer exchange.
#[derive(Debug, thiserror::Error)]
pub enum SalesforceError {
    /// No connected app for the organization.
    #[error("salesforce client not found for organization {0}")]
    UnknownOrganization(String),

    /// The assertion could not be signed.
    #[error("failed to sign salesforce assertion: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),

    /// Transport failure or unreadable response.
    #[error("salesforce request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The token endpoint refused the assertion.
    #[error("salesforce rejected the assertion: {error}: {description}")]
    Rejected {
        /// OAuth `error`
        error: String,
        /// OAuth `error_description`
        description: String,
    },

    /// A successful response without an access token.
    #[error("salesforce response has no access token")]
    MissingAccessToken,
}

impl SalesforceError {
    /// Map to the RPC status code
    #[must_use]
    pub fn code(&self) -> Code {
        match self {
            Self::UnknownOrganization(_) => Code::NotFound,
            Self::Http(_) => Code::Unavailable,
            Self::Rejected { .. } => Code::PermissionDenied,
            Self::Signing(_) | Self::MissingAccessToken => Code::Internal,
        }
    }
}

#[derive(Debug, Serialize)]
struct Assertion<'a> {
    iss: &'a str,
    sub: &'a str,
    aud: &'a str,
    exp: i64,
    jti: String,
}

#[derive(Debug, Default, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

struct ConnectedApp {
    client_id: String,
    key: EncodingKey,
}

/// Client for the Salesforce token endpoint.
pub struct SalesforceTokenClient {
    http: reqwest::Client,
    token_endpoint: String,
    audience: String,
    assertion_ttl: Duration,
    apps: HashMap<String, ConnectedApp>,
}

impl SalesforceTokenClient {
    /// Load every connected app key and build the HTTP client.
    ///
    /// Fails if a key cannot be read or parsed.
    pub fn new(config: &SalesforceConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build Salesforce client: {e}")))?;

        let mut apps = HashMap::with_capacity(config.organizations.len());
        for (org_id, client) in &config.organizations {
            let pem = client.private_key.load()?;
            let key = EncodingKey::from_rsa_pem(pem.as_bytes()).map_err(|e| {
                Error::Config(format!("Invalid Salesforce key for organization {org_id}: {e}"))
            })?;
            apps.insert(
                org_id.clone(),
                ConnectedApp {
                    client_id: client.client_id.clone(),
                    key,
                },
            );
        }

        Ok(Self {
            http,
            token_endpoint: config.token_endpoint.clone(),
            audience: config.audience.clone(),
            assertion_ttl: config.assertion_ttl,
            apps,
        })
    }

    /// Obtain an access token acting as `user_id`.
    pub async fn exchange(&self, organization_id: &str, user_id: &str) -> std::result::Result<String, SalesforceError> {
        let app = self
            .apps
            .get(organization_id)
            .ok_or_else(|| SalesforceError::UnknownOrganization(organization_id.to_string()))?;

        let assertion = self.assertion(app, user_id)?;

        debug!(organization_id, user_id, endpoint = %self.token_endpoint, "Requesting Salesforce token");
        let response: TokenResponse = self
            .http
            .post(&self.token_endpoint)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?
            .json()
            .await?;

        if let Some(error) = response.error.filter(|e| !e.is_empty()) {
            return Err(SalesforceError::Rejected {
                error,
                description: response.error_description.unwrap_or_default(),
            });
        }

        let token = response
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or(SalesforceError::MissingAccessToken)?;

        info!(organization_id, user_id, "Salesforce token obtained");
        Ok(token)
    }

    fn assertion(&self, app: &ConnectedApp, user_id: &str) -> std::result::Result<String, SalesforceError> {
        let ttl = i64::try_from(self.assertion_ttl.as_secs()).unwrap_or(i64::MAX);
        let claims = Assertion {
            iss: &app.client_id,
            sub: user_id,
            aud: &self.audience,
            exp: Utc::now().timestamp().saturating_add(ttl),
            jti: uuid::Uuid::new_v4().to_string(),
        };
        Ok(jsonwebtoken::encode(
            &Header::new(Algorithm::RS256),
            &claims,
            &app.key,
        )?)
    }
}
