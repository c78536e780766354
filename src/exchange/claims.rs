//! Claim set of tokens issued by this service.

use serde::{Deserialize, Serialize};

use super::AuthorizationContext;

/// Claims of an issued token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedClaims {
    /// Subject of the original token
    pub sub: String,
    /// First element is the applicant
    pub aud: Vec<String>,
    /// This service
    pub iss: String,
    /// Issued at
    pub iat: i64,
    /// Original expiry plus the extension
    pub exp: i64,
    /// Original not-before
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    /// Block read by platform services
    pub manabie: InternalClaims,
    /// Block read by Hasura
    #[serde(rename = "https://hasura.io/jwt/claims")]
    pub hasura: HasuraClaims,
}

/// Authorization block read by platform services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalClaims {
    /// User id
    pub user_id: String,
    /// User group
    pub user_group: String,
    /// Same as the user group
    pub default_role: String,
    /// First element is the user group
    pub allowed_roles: Vec<String>,
    /// School ids as strings
    pub school_ids: Vec<String>,
    /// Organization id
    pub resource_path: String,
}

/// Authorization block in Hasura's claim format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HasuraClaims {
    /// User id
    #[serde(rename = "x-hasura-user-id")]
    pub user_id: String,
    /// Default role
    #[serde(rename = "x-hasura-default-role")]
    pub default_role: String,
    /// Allowed roles
    #[serde(rename = "x-hasura-allowed-roles")]
    pub allowed_roles: Vec<String>,
    /// User group
    #[serde(rename = "x-hasura-user-group")]
    pub user_group: String,
    /// Postgres array literal, e.g. `{1,2}`
    #[serde(rename = "x-hasura-school-ids")]
    pub school_ids: String,
    /// Organization id
    #[serde(rename = "x-hasura-resource-path")]
    pub resource_path: String,
}

impl InternalClaims {
    pub(crate) fn from_context(ctx: &AuthorizationContext) -> Self {
        Self {
            user_id: ctx.user_id.clone(),
            user_group: ctx.user_group.clone(),
            default_role: ctx.user_group.clone(),
            allowed_roles: vec![ctx.user_group.clone()],
            school_ids: ctx.school_ids.iter().map(ToString::to_string).collect(),
            resource_path: ctx.resource_path.clone(),
        }
    }
}

impl HasuraClaims {
    pub(crate) fn from_context(ctx: &AuthorizationContext) -> Self {
        Self {
            user_id: ctx.user_id.clone(),
            default_role: ctx.user_group.clone(),
            allowed_roles: vec![ctx.user_group.clone()],
            user_group: ctx.user_group.clone(),
            school_ids: postgres_array(&ctx.school_ids),
            resource_path: ctx.resource_path.clone(),
        }
    }

    /// Replace both role fields with `role`.
    pub(crate) fn elevate(&mut self, role: &str) {
        self.default_role = role.to_string();
        self.allowed_roles = vec![role.to_string()];
    }
}

fn postgres_array(ids: &[i64]) -> String {
    let joined = ids
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",");
    format!("{{{joined}}}")
}
