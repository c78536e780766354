//! Lookups the token core needs from the platform's data stores.
//!
//! Each trait abstracts over a storage backend. The only implementation here
//! is [`InMemoryStore`], which keeps a separate data set per [`Connection`] so
//! callers can tell which connection a lookup went to.
//!
//! Lookups return `Ok(None)` for "not found"; `Err` is reserved for store
//! failures.

pub mod memory;

use std::fmt;

use chrono::{DateTime, Utc};
use rand::RngExt;
use serde::{Deserialize, Serialize};

use crate::Result;

pub use memory::InMemoryStore;

/// Which database a lookup runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connection {
    /// The main application database.
    #[default]
    Primary,
    /// The dedicated authentication database.
    Auth,
}

impl Connection {
    /// `Auth` when auth data is decoupled from user data.
    #[must_use]
    pub fn select(decoupled: bool) -> Self {
        if decoupled { Self::Auth } else { Self::Primary }
    }
}

/// An organization (tenant of the platform).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    /// Organization id; also the `resource_path` of its users.
    pub organization_id: String,
    /// Identity Platform tenant id.
    #[serde(default)]
    pub tenant_id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Login domain name.
    pub domain_name: String,
}

/// A user as seen by the authentication paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    /// User id.
    pub user_id: String,
    /// Contact email.
    #[serde(default)]
    pub email: String,
    /// Email used for username-based login.
    #[serde(default)]
    pub login_email: String,
    /// Username.
    #[serde(default)]
    pub username: String,
    /// User group, e.g. `USER_GROUP_STUDENT`.
    pub user_group: String,
    /// Organization id the user belongs to.
    pub resource_path: String,
    /// Schools the user belongs to.
    #[serde(default)]
    pub school_ids: Vec<i64>,
    /// Set once the account is deactivated.
    #[serde(default)]
    pub deactivated_at: Option<DateTime<Utc>>,
    /// Identity provider project the account lives in. `None` matches any.
    #[serde(default)]
    pub auth_project_id: Option<String>,
    /// Identity Platform tenant the account lives in. `None` matches any.
    #[serde(default)]
    pub auth_tenant_id: Option<String>,
}

/// A shared HMAC secret issued to a partner integration.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeyPair {
    /// Identifier sent by the caller.
    pub public_key: String,
    /// HMAC secret.
    pub private_key: String,
    /// Owning user.
    pub user_id: String,
    /// Owning organization.
    pub organization_id: String,
}

impl ApiKeyPair {
    /// Generate a keypair with random public and private parts.
    #[must_use]
    pub fn generate(user_id: impl Into<String>, organization_id: impl Into<String>) -> Self {
        let public: [u8; 16] = rand::rng().random();
        let private: [u8; 32] = rand::rng().random();
        Self {
            public_key: hex::encode(public),
            private_key: hex::encode(private),
            user_id: user_id.into(),
            organization_id: organization_id.into(),
        }
    }
}

impl fmt::Debug for ApiKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKeyPair")
            .field("public_key", &self.public_key)
            .field("private_key", &"<redacted>")
            .field("user_id", &self.user_id)
            .field("organization_id", &self.organization_id)
            .finish()
    }
}

/// User lookups.
#[async_trait::async_trait]
pub trait UserStore: Send + Sync + 'static {
    /// Find a user by id within an identity provider project and tenant.
    async fn get_by_auth_info(
        &self,
        conn: Connection,
        user_id: &str,
        project_id: Option<&str>,
        tenant_id: Option<&str>,
    ) -> Result<Option<AuthUser>>;

    /// Find a user by username within an organization.
    async fn get_by_username(
        &self,
        conn: Connection,
        username: &str,
        organization_id: &str,
    ) -> Result<Option<AuthUser>>;

    /// Find a user by email within an organization.
    async fn get_by_email(
        &self,
        conn: Connection,
        email: &str,
        organization_id: &str,
    ) -> Result<Option<AuthUser>>;
}

/// Organization lookups.
#[async_trait::async_trait]
pub trait OrganizationStore: Send + Sync + 'static {
    /// Find the organization owning a login domain.
    async fn get_by_domain_name(&self, domain_name: &str) -> Result<Option<Organization>>;

    /// Find the organization bound to an identity provider tenant.
    async fn get_by_tenant_id(&self, tenant_id: &str) -> Result<Option<Organization>>;
}

/// API keypair lookups.
#[async_trait::async_trait]
pub trait ApiKeypairStore: Send + Sync + 'static {
    /// Find a keypair by its public key.
    async fn get_by_public_key(&self, conn: Connection, public_key: &str) -> Result<Option<ApiKeyPair>>;
}
