//! Claims for fake tokens minted without an upstream identity provider.
//!
//! Used by end-to-end tooling. The applicant depends on the deployment
//! environment and, in production, on the school.

use chrono::Utc;

use crate::constants::school;
use crate::verifier::{ExternalClaims, ProviderClaims};
use crate::{Error, Result};

/// Lifetime of fake claims.
pub const FAKE_TOKEN_TTL_SECS: i64 = 3600;

/// Applicant for production schools without a dedicated one.
pub const DEFAULT_PROD_APPLICANT: &str = "manabie-prod";

/// Applicant a fake token is issued for.
///
/// Fails with [`Error::UnsupportedEnvironment`] outside `local`, `stag`,
/// `uat` and `prod`.
pub fn applicant_for(environment: &str, school_id: i32) -> Result<&'static str> {
    let applicant = match environment {
        "local" => "manabie-local",
        "stag" | "uat" => "manabie-stag",
        "prod" => match school_id {
            school::E2E_TOKYO => "prod-tokyo",
            school::AIC => "prod-aic",
            school::GA => "prod-ga",
            school::RENSEIKAI => "prod-renseikai",
            school::SYNERSIA => "prod-synersia",
            _ => DEFAULT_PROD_APPLICANT,
        },
        other => return Err(Error::UnsupportedEnvironment(other.to_string())),
    };
    Ok(applicant)
}

/// Claims shaped like a Firebase token for `project_id`.
#[must_use]
pub fn fake_claims(user_id: &str, tenant_id: &str, project_id: &str) -> ExternalClaims {
    let now = Utc::now().timestamp();
    ExternalClaims {
        subject: user_id.to_string(),
        issuer: format!("https://securetoken.google.com/{project_id}"),
        audience: vec![project_id.to_string()],
        expires_at: now + FAKE_TOKEN_TTL_SECS,
        not_before: None,
        issued_at: Some(now),
        jwks_url: String::new(),
        provider: ProviderClaims::Firebase {
            tenant: Some(tenant_id.to_string()).filter(|t| !t.is_empty()),
        },
    }
}
