//! Feature toggles consulted by the exchange and lookup paths.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::config::FeatureConfig;

/// Toggles the core understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    /// Read auth data from the dedicated auth database.
    DecoupledAuthDb,
    /// Look users up by username instead of email.
    UsernameLogin,
    /// Accept the `a_plus` student division.
    APlusDivision,
    /// Collapse Hasura roles into the elevated role.
    HasuraElevatedRole,
}

/// Source of toggle decisions.
///
/// `organization_id: None` asks for the global value.
#[async_trait::async_trait]
pub trait FeatureToggles: Send + Sync + 'static {
    /// Whether `feature` is on.
    async fn is_enabled(&self, feature: Feature, organization_id: Option<&str>) -> Result<bool>;
}

/// Toggles held in memory, seeded from configuration.
///
/// A per-organization override wins over the global value.
#[derive(Default)]
pub struct StaticFeatureToggles {
    global: RwLock<HashSet<Feature>>,
    organizations: RwLock<HashMap<String, HashMap<Feature, bool>>>,
}

impl StaticFeatureToggles {
    /// All toggles off.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from the `features` config section.
    #[must_use]
    pub fn from_config(config: &FeatureConfig) -> Self {
        Self {
            global: RwLock::new(config.enabled.iter().copied().collect()),
            organizations: RwLock::new(config.organizations.clone()),
        }
    }

    /// Set the global value.
    pub fn set(&self, feature: Feature, enabled: bool) {
        let mut global = self.global.write();
        if enabled {
            global.insert(feature);
        } else {
            global.remove(&feature);
        }
    }

    /// Override the value for one organization.
    pub fn set_for_organization(&self, organization_id: &str, feature: Feature, enabled: bool) {
        self.organizations
            .write()
            .entry(organization_id.to_string())
            .or_default()
            .insert(feature, enabled);
    }

    fn lookup(&self, feature: Feature, organization_id: Option<&str>) -> bool {
        let overridden = organization_id.and_then(|org| {
            self.organizations
                .read()
                .get(org)
                .and_then(|toggles| toggles.get(&feature).copied())
        });
        overridden.unwrap_or_else(|| self.global.read().contains(&feature))
    }
}

#[async_trait::async_trait]
impl FeatureToggles for StaticFeatureToggles {
    async fn is_enabled(&self, feature: Feature, organization_id: Option<&str>) -> Result<bool> {
        Ok(self.lookup(feature, organization_id))
    }
}
