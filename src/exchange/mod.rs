//! Exchange of verified external claims for an internally signed token.
//!
//! # Pipeline
//!
//! 1. Drop the tenant unless the token came from the multi-tenant issuer.
//! 2. Refuse deactivated accounts.
//! 3. Gate JPREP students on their division.
//! 4. Build both claim blocks from the same [`AuthorizationContext`].
//! 5. Optionally collapse the Hasura roles into the elevated role.
//! 6. Sign with the key ring's primary key.

mod claims;
pub mod fake;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

pub use claims::{HasuraClaims, InternalClaims, IssuedClaims};

use crate::constants::{division, user_group};
use crate::features::{Feature, FeatureToggles};
use crate::keyring::KeyRing;
use crate::store::AuthUser;
use crate::verifier::{ExternalClaims, ProviderClaims};
use crate::{Error, Result};

/// Added to the original expiry of every issued token.
pub const EXPIRY_EXTENSION: Duration = Duration::from_secs(5);

/// Authorization data re-derived from the user store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationContext {
    /// User id
    pub user_id: String,
    /// User group, used as role
    pub user_group: String,
    /// Organization id
    pub resource_path: String,
    /// Schools the user belongs to
    pub school_ids: Vec<i64>,
    /// Set when the account is deactivated
    pub deactivated_at: Option<DateTime<Utc>>,
}

impl From<AuthUser> for AuthorizationContext {
    fn from(user: AuthUser) -> Self {
        Self {
            user_id: user.user_id,
            user_group: user.user_group,
            resource_path: user.resource_path,
            school_ids: user.school_ids,
            deactivated_at: user.deactivated_at,
        }
    }
}

/// Exchanger settings.
#[derive(Debug, Clone)]
pub struct ExchangeSettings {
    /// `iss` of issued tokens
    pub issuer: String,
    /// Role used when the Hasura block is elevated
    pub elevated_hasura_role: String,
    /// Issuer whose tokens keep their tenant
    pub multi_tenant_issuer: Option<String>,
}

/// Turns verified claims plus an authorization context into a signed token.
pub struct TokenExchanger {
    keys: Arc<KeyRing>,
    toggles: Arc<dyn FeatureToggles>,
    settings: ExchangeSettings,
}

impl TokenExchanger {
    /// Create an exchanger signing with `keys`.
    pub fn new(keys: Arc<KeyRing>, toggles: Arc<dyn FeatureToggles>, settings: ExchangeSettings) -> Self {
        Self {
            keys,
            toggles,
            settings,
        }
    }

    /// Apply the tenant rule. Idempotent.
    #[must_use]
    pub fn normalize(&self, mut claims: ExternalClaims) -> ExternalClaims {
        let keeps_tenant = self
            .settings
            .multi_tenant_issuer
            .as_deref()
            .is_some_and(|iss| iss == claims.issuer);
        if !keeps_tenant {
            claims.strip_tenant();
        }
        claims
    }

    /// Build and sign the token for `applicant`.
    pub async fn exchange(
        &self,
        claims: ExternalClaims,
        ctx: &AuthorizationContext,
        applicant: &str,
    ) -> Result<String> {
        let issued = self.issue(claims, ctx, applicant).await?;
        Ok(self.keys.sign(&issued)?)
    }

    /// Build the claim set without signing it.
    pub async fn issue(
        &self,
        claims: ExternalClaims,
        ctx: &AuthorizationContext,
        applicant: &str,
    ) -> Result<IssuedClaims> {
        let claims = self.normalize(claims);

        if ctx.deactivated_at.is_some() {
            return Err(Error::DeactivatedAccount);
        }

        if ctx.user_group == user_group::STUDENT {
            if let ProviderClaims::Keycloak { division } = &claims.provider {
                self.check_division(division.as_deref(), &ctx.resource_path)
                    .await?;
            }
        }

        let extension = i64::try_from(EXPIRY_EXTENSION.as_secs())
            .map_err(|e| Error::Internal(e.to_string()))?;
        let exp = claims.expires_at.checked_add(extension).ok_or_else(|| {
            Error::InvalidArgument(format!("token expiry {} out of range", claims.expires_at))
        })?;

        let mut hasura = HasuraClaims::from_context(ctx);
        if self
            .toggles
            .is_enabled(Feature::HasuraElevatedRole, Some(&ctx.resource_path))
            .await?
        {
            hasura.elevate(&self.settings.elevated_hasura_role);
        }

        debug!(
            subject = %claims.subject,
            user_id = %ctx.user_id,
            applicant,
            "Issuing token"
        );

        Ok(IssuedClaims {
            sub: claims.subject,
            aud: vec![applicant.to_string()],
            iss: self.settings.issuer.clone(),
            iat: Utc::now().timestamp(),
            exp,
            nbf: claims.not_before,
            manabie: InternalClaims::from_context(ctx),
            hasura,
        })
    }

    async fn check_division(&self, value: Option<&str>, organization_id: &str) -> Result<()> {
        let accepted = match value {
            Some(division::KIDS) => true,
            Some(division::A_PLUS) => {
                self.toggles
                    .is_enabled(Feature::APlusDivision, Some(organization_id))
                    .await?
            }
            _ => false,
        };

        if accepted {
            Ok(())
        } else {
            Err(Error::UnexpectedDivision(value.map(str::to_string)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::StaticFeatureToggles;
    use pretty_assertions::assert_eq;

    const KEY_A: &str = include_str!("../../tests/fixtures/signing_key_a.pem");
    const KEY_B: &str = include_str!("../../tests/fixtures/signing_key_b.pem");
    const KID_A: &str = "d98393271d177e76af0532b1cb28b6228ee03cda";

    const MULTI_TENANT: &str = "https://securetoken.google.com/multi";

    fn exchanger(toggles: Arc<StaticFeatureToggles>) -> TokenExchanger {
        let keys = Arc::new(KeyRing::from_pems([KEY_A, KEY_B], KID_A).unwrap());
        TokenExchanger::new(
            keys,
            toggles,
            ExchangeSettings {
                issuer: "manabie".into(),
                elevated_hasura_role: "MANABIE".into(),
                multi_tenant_issuer: Some(MULTI_TENANT.into()),
            },
        )
    }

    fn firebase(issuer: &str, tenant: Option<&str>) -> ExternalClaims {
        ExternalClaims {
            subject: "subject-1".into(),
            issuer: issuer.into(),
            audience: vec!["project-a".into()],
            expires_at: 2_000_000_000,
            not_before: Some(1_999_990_000),
            issued_at: Some(1_999_990_000),
            jwks_url: "https://keys.example/jwks".into(),
            provider: ProviderClaims::Firebase {
                tenant: tenant.map(str::to_string),
            },
        }
    }

    fn keycloak(division: Option<&str>) -> ExternalClaims {
        ExternalClaims {
            provider: ProviderClaims::Keycloak {
                division: division.map(str::to_string),
            },
            ..firebase("https://sso.example/realms/jprep", None)
        }
    }

    fn ctx(group: &str) -> AuthorizationContext {
        AuthorizationContext {
            user_id: "user-1".into(),
            user_group: group.into(),
            resource_path: "48".into(),
            school_ids: vec![1, 2],
            deactivated_at: None,
        }
    }

    #[tokio::test]
    async fn issued_claims_follow_original_token() {
        // GIVEN: a verified firebase token and an active student
        let exchanger = exchanger(Arc::new(StaticFeatureToggles::new()));

        // WHEN: exchanged for an applicant
        let issued = exchanger
            .issue(firebase("https://securetoken.google.com/p", None), &ctx(user_group::STUDENT), "manabie-local")
            .await
            .unwrap();

        // THEN: subject, audience, issuer and times are derived as expected
        assert_eq!(issued.sub, "subject-1");
        assert_eq!(issued.aud, vec!["manabie-local"]);
        assert_eq!(issued.iss, "manabie");
        assert_eq!(issued.exp, 2_000_000_005);
        assert_eq!(issued.nbf, Some(1_999_990_000));
        assert_eq!(issued.manabie.user_id, "user-1");
        assert_eq!(issued.manabie.school_ids, vec!["1", "2"]);
        assert_eq!(issued.hasura.school_ids, "{1,2}");
        assert_eq!(issued.hasura.default_role, "USER_GROUP_STUDENT");
    }

    #[tokio::test]
    async fn expiry_at_the_edge_of_the_range_is_refused() {
        let exchanger = exchanger(Arc::new(StaticFeatureToggles::new()));
        let claims = ExternalClaims {
            expires_at: i64::MAX - 1,
            ..firebase("https://securetoken.google.com/p", None)
        };

        let err = exchanger
            .issue(claims, &ctx(user_group::STUDENT), "app")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidArgument(_)), "{err}");
    }

    #[tokio::test]
    async fn deactivated_account_is_refused() {
        let exchanger = exchanger(Arc::new(StaticFeatureToggles::new()));
        let mut ctx = ctx(user_group::STUDENT);
        ctx.deactivated_at = Some(Utc::now());

        let err = exchanger
            .exchange(firebase("iss", None), &ctx, "app")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DeactivatedAccount));
    }

    #[tokio::test]
    async fn kids_division_always_passes() {
        let exchanger = exchanger(Arc::new(StaticFeatureToggles::new()));
        exchanger
            .issue(keycloak(Some("kids")), &ctx(user_group::STUDENT), "app")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn a_plus_division_needs_toggle() {
        // GIVEN: the a_plus toggle off
        let toggles = Arc::new(StaticFeatureToggles::new());
        let exchanger = exchanger(Arc::clone(&toggles));

        // THEN: a_plus is refused
        let err = exchanger
            .issue(keycloak(Some("a_plus")), &ctx(user_group::STUDENT), "app")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnexpectedDivision(Some(ref d)) if d == "a_plus"));

        // WHEN: the toggle is on for the organization
        toggles.set_for_organization("48", Feature::APlusDivision, true);

        // THEN: a_plus passes
        exchanger
            .issue(keycloak(Some("a_plus")), &ctx(user_group::STUDENT), "app")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unknown_or_missing_division_fails() {
        let exchanger = exchanger(Arc::new(StaticFeatureToggles::new()));

        for division in [Some("adults"), None] {
            let err = exchanger
                .issue(keycloak(division), &ctx(user_group::STUDENT), "app")
                .await
                .unwrap_err();
            assert!(matches!(err, Error::UnexpectedDivision(_)));
        }
    }

    #[tokio::test]
    async fn division_gate_skips_non_students() {
        let exchanger = exchanger(Arc::new(StaticFeatureToggles::new()));
        exchanger
            .issue(keycloak(None), &ctx(user_group::PARENT), "app")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn elevated_role_only_touches_hasura_block() {
        let toggles = Arc::new(StaticFeatureToggles::new());
        toggles.set(Feature::HasuraElevatedRole, true);
        let exchanger = exchanger(toggles);

        let issued = exchanger
            .issue(firebase("iss", None), &ctx(user_group::TEACHER), "app")
            .await
            .unwrap();

        assert_eq!(issued.hasura.default_role, "MANABIE");
        assert_eq!(issued.hasura.allowed_roles, vec!["MANABIE"]);
        assert_eq!(issued.hasura.user_group, "USER_GROUP_TEACHER");
        assert_eq!(issued.manabie.default_role, "USER_GROUP_TEACHER");
    }

    #[test]
    fn tenant_kept_only_for_multi_tenant_issuer() {
        let exchanger = exchanger(Arc::new(StaticFeatureToggles::new()));

        let kept = exchanger.normalize(firebase(MULTI_TENANT, Some("tenant-1")));
        let stripped = exchanger.normalize(firebase("https://other", Some("tenant-1")));

        assert_eq!(kept.tenant(), Some("tenant-1"));
        assert_eq!(stripped.tenant(), None);
    }

    #[tokio::test]
    async fn signed_token_carries_primary_kid() {
        let exchanger = exchanger(Arc::new(StaticFeatureToggles::new()));

        let token = exchanger
            .exchange(firebase("iss", None), &ctx(user_group::STUDENT), "app")
            .await
            .unwrap();

        let header = jsonwebtoken::decode_header(&token).unwrap();
        assert_eq!(header.kid.as_deref(), Some(KID_A));
        assert_eq!(header.alg, jsonwebtoken::Algorithm::RS256);
    }
}
