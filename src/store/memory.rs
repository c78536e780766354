//! In-memory store backed by `DashMap`s, one data set per connection.

use dashmap::DashMap;

use super::{
    ApiKeyPair, ApiKeypairStore, AuthUser, Connection, Organization, OrganizationStore, UserStore,
};
use crate::Result;
use crate::config::FixturesConfig;

/// In-memory implementation of every store trait.
///
/// - `users`:         (connection, user id)     → [`AuthUser`]
/// - `organizations`: domain name              → [`Organization`]
/// - `keypairs`:      (connection, public key)  → [`ApiKeyPair`]
#[derive(Default)]
pub struct InMemoryStore {
    users: DashMap<(Connection, String), AuthUser>,
    organizations: DashMap<String, Organization>,
    keypairs: DashMap<(Connection, String), ApiKeyPair>,
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded from configuration fixtures.
    #[must_use]
    pub fn from_fixtures(fixtures: &FixturesConfig) -> Self {
        let store = Self::new();
        for org in &fixtures.organizations {
            store.insert_organization(org.clone());
        }
        for seeded in &fixtures.users {
            for conn in seeded.connections() {
                store.insert_user(conn, seeded.user.clone());
            }
        }
        for seeded in &fixtures.api_keypairs {
            for conn in seeded.connections() {
                store.insert_keypair(conn, seeded.keypair.clone());
            }
        }
        store
    }

    /// Insert or replace a user on one connection.
    pub fn insert_user(&self, conn: Connection, user: AuthUser) {
        self.users.insert((conn, user.user_id.clone()), user);
    }

    /// Insert or replace an organization.
    pub fn insert_organization(&self, org: Organization) {
        self.organizations.insert(org.domain_name.clone(), org);
    }

    /// Insert or replace a keypair on one connection.
    pub fn insert_keypair(&self, conn: Connection, pair: ApiKeyPair) {
        self.keypairs.insert((conn, pair.public_key.clone()), pair);
    }

    fn find_user(&self, conn: Connection, pred: impl Fn(&AuthUser) -> bool) -> Option<AuthUser> {
        self.users
            .iter()
            .find(|entry| entry.key().0 == conn && pred(entry.value()))
            .map(|entry| entry.value().clone())
    }
}

/// `None` on the record side matches anything.
fn matches_optional(record: Option<&str>, wanted: Option<&str>) -> bool {
    record.is_none_or(|r| Some(r) == wanted)
}

#[async_trait::async_trait]
impl UserStore for InMemoryStore {
    async fn get_by_auth_info(
        &self,
        conn: Connection,
        user_id: &str,
        project_id: Option<&str>,
        tenant_id: Option<&str>,
    ) -> Result<Option<AuthUser>> {
        let user = self
            .users
            .get(&(conn, user_id.to_string()))
            .map(|entry| entry.value().clone())
            .filter(|user| {
                matches_optional(user.auth_project_id.as_deref(), project_id)
                    && matches_optional(user.auth_tenant_id.as_deref(), tenant_id)
            });
        Ok(user)
    }

    async fn get_by_username(
        &self,
        conn: Connection,
        username: &str,
        organization_id: &str,
    ) -> Result<Option<AuthUser>> {
        Ok(self.find_user(conn, |u| {
            u.username == username && u.resource_path == organization_id
        }))
    }

    async fn get_by_email(
        &self,
        conn: Connection,
        email: &str,
        organization_id: &str,
    ) -> Result<Option<AuthUser>> {
        Ok(self.find_user(conn, |u| u.email == email && u.resource_path == organization_id))
    }
}

#[async_trait::async_trait]
impl OrganizationStore for InMemoryStore {
    async fn get_by_domain_name(&self, domain_name: &str) -> Result<Option<Organization>> {
        Ok(self
            .organizations
            .get(domain_name)
            .map(|entry| entry.value().clone()))
    }

    async fn get_by_tenant_id(&self, tenant_id: &str) -> Result<Option<Organization>> {
        Ok(self
            .organizations
            .iter()
            .find(|entry| entry.tenant_id == tenant_id)
            .map(|entry| entry.value().clone()))
    }
}

#[async_trait::async_trait]
impl ApiKeypairStore for InMemoryStore {
    async fn get_by_public_key(&self, conn: Connection, public_key: &str) -> Result<Option<ApiKeyPair>> {
        Ok(self
            .keypairs
            .get(&(conn, public_key.to_string()))
            .map(|entry| entry.value().clone()))
    }
}
