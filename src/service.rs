//! The RPC operations of the auth service.
//!
//! [`AuthService`] wires the verifiers, stores, toggles, exchanger and key
//! ring together. Every operation takes a request struct and returns a
//! response struct; errors map to a [`Status`](crate::error::Status) at the
//! transport boundary.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::audit::{self, AuditEvent};
use crate::auth_info::{AuthInfo, AuthInfoResolver};
use crate::config::Config;
use crate::constants::user_group;
use crate::exchange::{AuthorizationContext, ExchangeSettings, TokenExchanger, fake};
use crate::features::{Feature, FeatureToggles, StaticFeatureToggles};
use crate::keyring::{KeyRing, SigningKey};
use crate::salesforce::SalesforceTokenClient;
use crate::signature::SignatureAuthenticator;
use crate::store::{Connection, InMemoryStore, OrganizationStore, UserStore};
use crate::verifier::{ExternalClaims, JwksCache, MultiIssuerVerifier, TokenVerifier};
use crate::{Error, Result};

/// `ExchangeToken` request
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeTokenRequest {
    /// External ID token
    pub original_token: String,
    /// Audience of the issued token
    pub applicant: String,
    /// User to act as; the token subject when empty
    #[serde(default)]
    pub requested_user_id: String,
}

/// `ExchangeToken` / `GenerateFakeToken` response
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenResponse {
    /// Issued token
    pub token: String,
}

/// `VerifyToken` / `VerifyTokenV2` request
#[derive(Debug, Clone, Deserialize)]
pub struct VerifyTokenRequest {
    /// External ID token
    pub original_token: String,
}

/// `VerifyToken` response
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifyTokenResponse {
    /// Token subject
    pub subject: String,
    /// Identity Platform tenant, empty when absent
    pub tenant_id: String,
}

/// `VerifyTokenV2` response
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifyTokenV2Response {
    /// Resolved user
    pub user_id: String,
    /// Identity Platform tenant, empty when absent
    pub tenant_id: String,
}

/// `GenerateFakeToken` request
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateFakeTokenRequest {
    /// User to issue for
    pub user_id: String,
    /// School deciding the production applicant
    #[serde(default)]
    pub school_id: i32,
    /// Identity Platform tenant
    #[serde(default)]
    pub tenant_id: String,
    /// Identity provider project
    pub project_id: String,
    /// Overrides the configured environment
    #[serde(default)]
    pub environment: Option<String>,
}

/// `VerifySignature` request
#[derive(Debug, Clone, Deserialize)]
pub struct VerifySignatureRequest {
    /// API public key
    pub public_key: String,
    /// Signed body
    pub body: String,
    /// Hex HMAC-SHA256 of `body`
    pub signature: String,
}

/// `VerifySignature` response
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifySignatureResponse {
    /// Keypair owner
    pub user_id: String,
    /// Keypair organization
    pub organization_id: String,
}

/// `GetAuthInfo` request
#[derive(Debug, Clone, Deserialize)]
pub struct GetAuthInfoRequest {
    /// Username, or email when username login is off
    pub username: String,
    /// Login domain
    pub domain_name: String,
}

/// `ExchangeSalesforceToken` request
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeSalesforceTokenRequest {
    /// Organization with a connected app
    pub organization_id: String,
    /// Salesforce user to act as
    pub user_id: String,
}

/// `ExchangeSalesforceToken` response
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExchangeSalesforceTokenResponse {
    /// Salesforce access token
    pub access_token: String,
}

/// Components the service is assembled from.
pub struct ServiceParts {
    /// Signing keys
    pub keys: Arc<KeyRing>,
    /// External token verification
    pub verifier: Arc<dyn TokenVerifier>,
    /// User lookups
    pub users: Arc<dyn UserStore>,
    /// Tenant to organization resolution
    pub organizations: Arc<dyn OrganizationStore>,
    /// Feature toggles
    pub toggles: Arc<dyn FeatureToggles>,
    /// Exchange pipeline
    pub exchanger: TokenExchanger,
    /// Partner signatures
    pub signatures: SignatureAuthenticator,
    /// Login lookups
    pub auth_info: AuthInfoResolver,
    /// Salesforce flow
    pub salesforce: SalesforceTokenClient,
    /// Deployment environment
    pub environment: String,
    /// Accepted applicants; empty accepts any
    pub applicants: Vec<String>,
}

/// The auth service.
pub struct AuthService {
    keys: Arc<KeyRing>,
    verifier: Arc<dyn TokenVerifier>,
    users: Arc<dyn UserStore>,
    organizations: Arc<dyn OrganizationStore>,
    toggles: Arc<dyn FeatureToggles>,
    exchanger: TokenExchanger,
    signatures: SignatureAuthenticator,
    auth_info: AuthInfoResolver,
    salesforce: SalesforceTokenClient,
    environment: String,
    applicants: Vec<String>,
}

impl AuthService {
    /// Assemble from already built components.
    #[must_use]
    pub fn new(parts: ServiceParts) -> Self {
        Self {
            keys: parts.keys,
            verifier: parts.verifier,
            users: parts.users,
            organizations: parts.organizations,
            toggles: parts.toggles,
            exchanger: parts.exchanger,
            signatures: parts.signatures,
            auth_info: parts.auth_info,
            salesforce: parts.salesforce,
            environment: parts.environment,
            applicants: parts.applicants,
        }
    }

    /// Build every component from configuration.
    ///
    /// Loads the signing keys, fetches every issuer's JWKS once and seeds the
    /// in-memory stores and toggles from the `fixtures` and `features`
    /// sections.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let keys = Arc::new(load_key_ring(config)?);

        let jwks = Arc::new(JwksCache::new(&config.jwks)?);
        let verifier = Arc::new(MultiIssuerVerifier::connect(&config.issuers, jwks).await?);

        let store = Arc::new(InMemoryStore::from_fixtures(&config.fixtures));
        let toggles: Arc<dyn FeatureToggles> =
            Arc::new(StaticFeatureToggles::from_config(&config.features));

        let exchanger = TokenExchanger::new(
            Arc::clone(&keys),
            Arc::clone(&toggles),
            ExchangeSettings {
                issuer: config.service.issuer.clone(),
                elevated_hasura_role: config.service.elevated_hasura_role.clone(),
                multi_tenant_issuer: config.multi_tenant_issuer.clone(),
            },
        );

        info!(
            primary_kid = %keys.primary().kid(),
            issuers = config.issuers.len(),
            environment = %config.environment,
            "Auth service initialized"
        );

        Ok(Self::new(ServiceParts {
            keys,
            verifier,
            users: store.clone(),
            organizations: store.clone(),
            toggles: Arc::clone(&toggles),
            exchanger,
            signatures: SignatureAuthenticator::new(store.clone(), Arc::clone(&toggles)),
            auth_info: AuthInfoResolver::new(store.clone(), store, toggles),
            salesforce: SalesforceTokenClient::new(&config.salesforce)?,
            environment: config.environment.clone(),
            applicants: config.service.applicants.clone(),
        }))
    }

    /// Signing keys, for the JWKS document.
    #[must_use]
    pub fn keys(&self) -> &KeyRing {
        &self.keys
    }

    /// `ExchangeToken`
    pub async fn exchange_token(&self, req: ExchangeTokenRequest) -> Result<TokenResponse> {
        require("original_token", &req.original_token)?;
        require("applicant", &req.applicant)?;
        if !self.applicants.is_empty() && !self.applicants.contains(&req.applicant) {
            return Err(Error::InvalidArgument(format!(
                "unknown applicant {}",
                req.applicant
            )));
        }

        let claims = self.verify(&req.original_token, Some(&req.applicant)).await?;
        let claims = self.exchanger.normalize(claims);

        let result = self
            .issue(claims.clone(), &req.requested_user_id, &req.applicant)
            .await;
        audit_exchange(&claims, &req.applicant, &result);
        let (token, _) = result?;
        Ok(TokenResponse { token })
    }

    /// `VerifyToken`
    pub async fn verify_token(&self, req: VerifyTokenRequest) -> Result<VerifyTokenResponse> {
        require("original_token", &req.original_token)?;
        let claims = self.verify(&req.original_token, None).await?;
        Ok(VerifyTokenResponse {
            tenant_id: claims.tenant().unwrap_or_default().to_string(),
            subject: claims.subject,
        })
    }

    /// `VerifyTokenV2`: like `VerifyToken`, limited to students and parents.
    pub async fn verify_token_v2(&self, req: VerifyTokenRequest) -> Result<VerifyTokenV2Response> {
        require("original_token", &req.original_token)?;
        let claims = self.verify(&req.original_token, None).await?;
        let tenant_id = claims.tenant().unwrap_or_default().to_string();

        let ctx = self
            .lookup_context(&self.exchanger.normalize(claims), "")
            .await?;
        if ctx.deactivated_at.is_some() {
            return Err(Error::DeactivatedAccount);
        }
        if ctx.user_group != user_group::STUDENT && ctx.user_group != user_group::PARENT {
            return Err(Error::RoleNotAllowed(ctx.user_group));
        }

        Ok(VerifyTokenV2Response {
            user_id: ctx.user_id,
            tenant_id,
        })
    }

    /// `GenerateFakeToken`: issue for a user without an upstream token.
    pub async fn generate_fake_token(&self, req: GenerateFakeTokenRequest) -> Result<TokenResponse> {
        require("user_id", &req.user_id)?;
        require("project_id", &req.project_id)?;

        let environment = req.environment.as_deref().unwrap_or(&self.environment);
        let applicant = fake::applicant_for(environment, req.school_id)?;
        let claims = fake::fake_claims(&req.user_id, &req.tenant_id, &req.project_id);

        let result = self.issue(claims.clone(), "", applicant).await;
        audit_exchange(&claims, applicant, &result);
        let (token, _) = result?;
        Ok(TokenResponse { token })
    }

    /// `VerifySignature`
    pub async fn verify_signature(&self, req: VerifySignatureRequest) -> Result<VerifySignatureResponse> {
        require("public_key", &req.public_key)?;
        require("signature", &req.signature)?;

        match self
            .signatures
            .verify(&req.public_key, req.body.as_bytes(), &req.signature)
            .await
        {
            Ok(caller) => {
                audit::emit(&AuditEvent::signature_verified(
                    &req.public_key,
                    &caller.user_id,
                    &caller.organization_id,
                ));
                Ok(VerifySignatureResponse {
                    user_id: caller.user_id,
                    organization_id: caller.organization_id,
                })
            }
            Err(e) => {
                audit::emit(&AuditEvent::signature_denied(&req.public_key, e.to_string()));
                Err(e)
            }
        }
    }

    /// `GetAuthInfo`
    pub async fn get_auth_info(&self, req: GetAuthInfoRequest) -> Result<AuthInfo> {
        require("username", &req.username)?;
        require("domain_name", &req.domain_name)?;
        self.auth_info.resolve(&req.username, &req.domain_name).await
    }

    /// `ExchangeSalesforceToken`
    pub async fn exchange_salesforce_token(
        &self,
        req: ExchangeSalesforceTokenRequest,
    ) -> Result<ExchangeSalesforceTokenResponse> {
        require("organization_id", &req.organization_id)?;
        require("user_id", &req.user_id)?;
        let access_token = self
            .salesforce
            .exchange(&req.organization_id, &req.user_id)
            .await?;
        Ok(ExchangeSalesforceTokenResponse { access_token })
    }

    async fn verify(&self, token: &str, applicant: Option<&str>) -> Result<ExternalClaims> {
        self.verifier.verify(token).await.map_err(|e| {
            warn!(reason = %e, "Token verification failed");
            audit::emit(&AuditEvent::denied(None, applicant, e.to_string()));
            Error::from(e)
        })
    }

    async fn issue(
        &self,
        claims: ExternalClaims,
        requested_user_id: &str,
        applicant: &str,
    ) -> Result<(String, String)> {
        let ctx = self.lookup_context(&claims, requested_user_id).await?;
        let token = self.exchanger.exchange(claims, &ctx, applicant).await?;
        Ok((token, ctx.user_id))
    }

    async fn lookup_context(
        &self,
        claims: &ExternalClaims,
        requested_user_id: &str,
    ) -> Result<AuthorizationContext> {
        let user_id = if requested_user_id.is_empty() {
            claims.subject.as_str()
        } else {
            requested_user_id
        };

        let organization_id = match claims.tenant() {
            Some(tenant) => self
                .organizations
                .get_by_tenant_id(tenant)
                .await?
                .map(|org| org.organization_id),
            None => None,
        };
        let decoupled = self
            .toggles
            .is_enabled(Feature::DecoupledAuthDb, organization_id.as_deref())
            .await?;
        let conn = Connection::select(decoupled);

        self.users
            .get_by_auth_info(conn, user_id, claims.project_id(), claims.tenant())
            .await?
            .map(AuthorizationContext::from)
            .ok_or_else(|| Error::UserNotFound(user_id.to_string()))
    }
}

/// Build the key ring from the `signing` section.
pub fn load_key_ring(config: &Config) -> Result<KeyRing> {
    let keys = config
        .signing
        .keys
        .iter()
        .map(|source| Ok(SigningKey::from_pem(&source.load()?)?))
        .collect::<Result<Vec<_>>>()?;
    Ok(KeyRing::load(keys, &config.signing.primary_key_id)?)
}

fn audit_exchange(claims: &ExternalClaims, applicant: &str, result: &Result<(String, String)>) {
    let event = match result {
        Ok((_, user_id)) => AuditEvent::exchanged(&claims.subject, &claims.issuer, user_id, applicant),
        Err(e) => AuditEvent::denied(Some(&claims.subject), Some(applicant), e.to_string()),
    };
    audit::emit(&event);
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InvalidArgument(format!("{field} is required")));
    }
    Ok(())
}
