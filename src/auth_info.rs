//! Resolution of a login username and domain to the account behind it.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::features::{Feature, FeatureToggles};
use crate::store::{Connection, OrganizationStore, UserStore};
use crate::{Error, Result};

/// What a login page needs to authenticate a user against its tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthInfo {
    /// Identity Platform tenant
    pub tenant_id: String,
    /// Organization id
    pub organization_id: String,
    /// Empty unless username login is on
    pub login_email: String,
    /// Contact email
    pub email: String,
    /// User id
    pub user_id: String,
}

/// Looks up organizations by domain and users by username or email.
pub struct AuthInfoResolver {
    organizations: Arc<dyn OrganizationStore>,
    users: Arc<dyn UserStore>,
    toggles: Arc<dyn FeatureToggles>,
}

impl AuthInfoResolver {
    /// Create a resolver.
    pub fn new(
        organizations: Arc<dyn OrganizationStore>,
        users: Arc<dyn UserStore>,
        toggles: Arc<dyn FeatureToggles>,
    ) -> Self {
        Self {
            organizations,
            users,
            toggles,
        }
    }

    /// Resolve `username` within the organization owning `domain_name`.
    ///
    /// With username login off, `username` is treated as an email address.
    pub async fn resolve(&self, username: &str, domain_name: &str) -> Result<AuthInfo> {
        let org = self
            .organizations
            .get_by_domain_name(domain_name)
            .await?
            .ok_or(Error::OrganizationNotFound)?;

        let org_id = org.organization_id.as_str();
        let username_login = self
            .toggles
            .is_enabled(Feature::UsernameLogin, Some(org_id))
            .await?;
        let decoupled = self
            .toggles
            .is_enabled(Feature::DecoupledAuthDb, Some(org_id))
            .await?;
        let conn = Connection::select(decoupled);

        debug!(organization_id = %org_id, username_login, ?conn, "Resolving auth info");

        let user = if username_login {
            self.users.get_by_username(conn, username, org_id).await?
        } else {
            self.users.get_by_email(conn, username, org_id).await?
        }
        .ok_or(Error::UsernameNotFound)?;

        Ok(AuthInfo {
            tenant_id: org.tenant_id,
            organization_id: org.organization_id,
            login_email: if username_login {
                user.login_email
            } else {
                String::new()
            },
            email: user.email,
            user_id: user.user_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::StaticFeatureToggles;
    use crate::store::{AuthUser, InMemoryStore, Organization};
    use pretty_assertions::assert_eq;

    const DOMAIN: &str = "school.example";

    fn user() -> AuthUser {
        AuthUser {
            user_id: "user-1".into(),
            email: "student@example.com".into(),
            login_email: "user-1@school.example".into(),
            username: "student01".into(),
            user_group: "USER_GROUP_STUDENT".into(),
            resource_path: "48".into(),
            school_ids: vec![],
            deactivated_at: None,
            auth_project_id: None,
            auth_tenant_id: None,
        }
    }

    fn setup(conn: Connection) -> (Arc<StaticFeatureToggles>, AuthInfoResolver) {
        let store = Arc::new(InMemoryStore::new());
        store.insert_organization(Organization {
            organization_id: "48".into(),
            tenant_id: "TenantID".into(),
            name: "School".into(),
            domain_name: DOMAIN.into(),
        });
        store.insert_user(conn, user());
        let toggles = Arc::new(StaticFeatureToggles::new());
        let resolver = AuthInfoResolver::new(store.clone(), store, toggles.clone());
        (toggles, resolver)
    }

    #[tokio::test]
    async fn username_login_on_looks_up_by_username() {
        // GIVEN: username login enabled for the organization
        let (toggles, resolver) = setup(Connection::Primary);
        toggles.set_for_organization("48", Feature::UsernameLogin, true);

        // WHEN: resolving a username
        let info = resolver.resolve("student01", DOMAIN).await.unwrap();

        // THEN: login email is returned
        assert_eq!(
            info,
            AuthInfo {
                tenant_id: "TenantID".into(),
                organization_id: "48".into(),
                login_email: "user-1@school.example".into(),
                email: "student@example.com".into(),
                user_id: "user-1".into(),
            }
        );
    }

    #[tokio::test]
    async fn username_login_off_looks_up_by_email() {
        let (_, resolver) = setup(Connection::Primary);

        let info = resolver.resolve("student@example.com", DOMAIN).await.unwrap();

        assert_eq!(info.login_email, "");
        assert_eq!(info.email, "student@example.com");

        // The username is not an email, so it misses
        let err = resolver.resolve("student01", DOMAIN).await.unwrap_err();
        assert!(matches!(err, Error::UsernameNotFound));
    }

    #[tokio::test]
    async fn unknown_domain() {
        let (_, resolver) = setup(Connection::Primary);
        let err = resolver.resolve("student01", "other.example").await.unwrap_err();
        assert!(matches!(err, Error::OrganizationNotFound));
        assert_eq!(err.to_string(), "organization not found");
    }

    #[tokio::test]
    async fn decoupled_organization_reads_auth_connection() {
        // GIVEN: the user only on the auth connection
        let (toggles, resolver) = setup(Connection::Auth);

        // THEN: without the toggle the user is not found
        assert!(matches!(
            resolver.resolve("student@example.com", DOMAIN).await,
            Err(Error::UsernameNotFound)
        ));

        // WHEN: the organization is decoupled
        toggles.set_for_organization("48", Feature::DecoupledAuthDb, true);

        // THEN: the user is found
        let info = resolver.resolve("student@example.com", DOMAIN).await.unwrap();
        assert_eq!(info.user_id, "user-1");
    }
}
