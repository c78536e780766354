//! Configuration management

use std::{collections::HashMap, env, path::Path, path::PathBuf, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::features::Feature;
use crate::keyring::MIN_KEYS;
use crate::store::{ApiKeyPair, AuthUser, Connection, Organization};
use crate::{Error, Result};

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "AUTH_BRIDGE_";

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Deployment environment (`local`, `stag`, `uat`, `prod`)
    pub environment: String,
    /// Issued token settings
    pub service: ServiceConfig,
    /// Signing keys
    pub signing: SigningConfig,
    /// Accepted external issuers, in attempt order
    pub issuers: Vec<IssuerConfig>,
    /// Issuer whose tokens keep their tenant claim
    pub multi_tenant_issuer: Option<String>,
    /// JWKS fetching
    pub jwks: JwksConfig,
    /// Feature toggles
    pub features: FeatureConfig,
    /// Salesforce JWT-bearer flow
    pub salesforce: SalesforceConfig,
    /// Seed data for the in-memory stores
    pub fixtures: FixturesConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            env_files: Vec::new(),
            server: ServerConfig::default(),
            environment: "local".to_string(),
            service: ServiceConfig::default(),
            signing: SigningConfig::default(),
            issuers: Vec::new(),
            multi_tenant_issuer: None,
            jwks: JwksConfig::default(),
            features: FeatureConfig::default(),
            salesforce: SalesforceConfig::default(),
            fixtures: FixturesConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, cannot be parsed, or an
    /// environment override has the wrong shape.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();
        config.expand_env_vars()?;

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = expand_home(path_str);
            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                    Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand `${VAR}` and `${VAR:-default}` in key material and client ids
    fn expand_env_vars(&mut self) -> Result<()> {
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}")
            .map_err(|e| Error::Internal(e.to_string()))?;

        for key in &mut self.signing.keys {
            key.expand(&re);
        }
        for client in self.salesforce.organizations.values_mut() {
            client.client_id = expand_string(&re, &client.client_id);
            client.private_key.expand(&re);
        }
        Ok(())
    }

    /// Check the cross-field rules that serde cannot express
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first violated rule.
    pub fn validate(&self) -> Result<()> {
        if self.issuers.is_empty() {
            return Err(Error::Config("at least one issuer must be configured".into()));
        }
        for issuer in &self.issuers {
            if issuer.issuer.is_empty() {
                return Err(Error::Config("issuer name must not be empty".into()));
            }
            if issuer.audience.is_empty() {
                return Err(Error::Config(format!(
                    "issuer {} has an empty audience",
                    issuer.issuer
                )));
            }
            Url::parse(&issuer.jwks_endpoint).map_err(|e| {
                Error::Config(format!(
                    "issuer {} has an invalid jwks_endpoint {}: {e}",
                    issuer.issuer, issuer.jwks_endpoint
                ))
            })?;
        }

        if let Some(multi) = &self.multi_tenant_issuer {
            if !self.issuers.iter().any(|i| &i.issuer == multi) {
                return Err(Error::Config(format!(
                    "multi_tenant_issuer {multi} is not a configured issuer"
                )));
            }
        }

        if self.signing.keys.len() < MIN_KEYS {
            return Err(Error::Config(format!(
                "at least {MIN_KEYS} signing keys are required, got {}",
                self.signing.keys.len()
            )));
        }
        if self.signing.primary_key_id.is_empty() {
            return Err(Error::Config("signing.primary_key_id must be set".into()));
        }

        Url::parse(&self.salesforce.token_endpoint).map_err(|e| {
            Error::Config(format!("invalid salesforce.token_endpoint: {e}"))
        })?;

        Ok(())
    }
}

/// Expand environment variables in a string
fn expand_string(re: &Regex, value: &str) -> String {
    re.replace_all(value, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map_or("", |m| m.as_str());
        env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .into_owned()
}

fn expand_home(path: &str) -> String {
    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.display().to_string(), 1);
        }
    }
    path.to_string()
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Settings for tokens this service issues
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// `iss` of issued tokens
    pub issuer: String,
    /// Accepted applicants; empty accepts any non-empty applicant
    pub applicants: Vec<String>,
    /// Role substituted into the Hasura block when elevation is on
    pub elevated_hasura_role: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            issuer: "manabie".to_string(),
            applicants: Vec::new(),
            elevated_hasura_role: "MANABIE".to_string(),
        }
    }
}

/// Signing key configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    /// KeyID of the key that signs issued tokens
    pub primary_key_id: String,
    /// Every key published in the JWKS
    pub keys: Vec<KeySource>,
}

/// A PEM key given either as a file path or inline
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct KeySource {
    /// Path to a PEM file (~ is expanded)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Inline PEM text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pem: Option<String>,
}

impl KeySource {
    /// Inline PEM source
    #[must_use]
    pub fn inline(pem: impl Into<String>) -> Self {
        Self {
            path: None,
            pem: Some(pem.into()),
        }
    }

    /// Read the PEM text
    ///
    /// # Errors
    ///
    /// Returns an error if neither or both sources are set, or the file
    /// cannot be read.
    pub fn load(&self) -> Result<String> {
        match (&self.path, &self.pem) {
            (Some(path), None) => {
                let expanded = expand_home(&path.to_string_lossy());
                std::fs::read_to_string(&expanded).map_err(|e| {
                    Error::Config(format!("Failed to read key file {expanded}: {e}"))
                })
            }
            (None, Some(pem)) => Ok(pem.clone()),
            (Some(_), Some(_)) => Err(Error::Config(
                "key source must set either path or pem, not both".into(),
            )),
            (None, None) => Err(Error::Config("key source must set path or pem".into())),
        }
    }

    fn expand(&mut self, re: &Regex) {
        if let Some(path) = &self.path {
            self.path = Some(PathBuf::from(expand_string(re, &path.to_string_lossy())));
        }
        if let Some(pem) = &self.pem {
            self.pem = Some(expand_string(re, pem));
        }
    }
}

impl std::fmt::Debug for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeySource")
            .field("path", &self.path)
            .field("pem", &self.pem.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// How provider-specific claims of an issuer are decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Firebase / Identity Platform: `firebase.tenant`
    Firebase,
    /// Keycloak (JPREP): `student_division`
    Keycloak,
    /// No provider-specific claims
    #[default]
    Generic,
}

/// One accepted external issuer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuerConfig {
    /// Expected `iss`
    pub issuer: String,
    /// Expected `aud`
    pub audience: String,
    /// JWKS URL
    pub jwks_endpoint: String,
    /// Claim decoding
    #[serde(default)]
    pub provider: ProviderKind,
}

/// JWKS fetching configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwksConfig {
    /// How long a fetched JWKS is served from cache
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Duration,
    /// HTTP timeout for one fetch
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Duration,
    /// Refuse non-HTTPS endpoints
    pub require_https: bool,
}

impl Default for JwksConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(3600),
            fetch_timeout: Duration::from_secs(10),
            require_https: true,
        }
    }
}

/// Config-backed feature toggles
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Toggles on for every organization
    pub enabled: Vec<Feature>,
    /// Per-organization overrides: organization id → feature → on/off
    pub organizations: HashMap<String, HashMap<Feature, bool>>,
}

/// Salesforce JWT-bearer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SalesforceConfig {
    /// OAuth token endpoint
    pub token_endpoint: String,
    /// `aud` of the assertion
    pub audience: String,
    /// Assertion lifetime
    #[serde(with = "humantime_serde")]
    pub assertion_ttl: Duration,
    /// HTTP timeout for the token request
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Connected app per organization id
    pub organizations: HashMap<String, SalesforceClientConfig>,
}

impl Default for SalesforceConfig {
    fn default() -> Self {
        Self {
            token_endpoint: "https://login.salesforce.com/services/oauth2/token".to_string(),
            audience: "https://login.salesforce.com".to_string(),
            assertion_ttl: Duration::from_secs(180),
            request_timeout: Duration::from_secs(10),
            organizations: HashMap::new(),
        }
    }
}

/// Salesforce connected app credentials for one organization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SalesforceClientConfig {
    /// Consumer key
    pub client_id: String,
    /// RSA key the assertion is signed with
    pub private_key: KeySource,
}

/// Seed data for the in-memory stores
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FixturesConfig {
    /// Organizations
    pub organizations: Vec<Organization>,
    /// Users
    pub users: Vec<SeededUser>,
    /// API keypairs
    pub api_keypairs: Vec<SeededKeyPair>,
}

/// A user and the connections it is visible on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeededUser {
    /// Connections; empty means both
    #[serde(default)]
    pub connections: Vec<Connection>,
    /// The user record
    #[serde(flatten)]
    pub user: AuthUser,
}

impl SeededUser {
    /// Effective connections
    #[must_use]
    pub fn connections(&self) -> Vec<Connection> {
        effective_connections(&self.connections)
    }
}

/// A keypair and the connections it is visible on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeededKeyPair {
    /// Connections; empty means both
    #[serde(default)]
    pub connections: Vec<Connection>,
    /// The keypair
    #[serde(flatten)]
    pub keypair: ApiKeyPair,
}

impl SeededKeyPair {
    /// Effective connections
    #[must_use]
    pub fn connections(&self) -> Vec<Connection> {
        effective_connections(&self.connections)
    }
}

fn effective_connections(configured: &[Connection]) -> Vec<Connection> {
    if configured.is_empty() {
        vec![Connection::Primary, Connection::Auth]
    } else {
        configured.to_vec()
    }
}

/// Humantime serde support
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    pub(crate) fn parse(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        // "ms" must be tried before "m" and "s"
        let (digits, unit_secs) = if let Some(ms) = s.strip_suffix("ms") {
            return number(ms).map(Duration::from_millis);
        } else if let Some(secs) = s.strip_suffix('s') {
            (secs, 1)
        } else if let Some(mins) = s.strip_suffix('m') {
            (mins, 60)
        } else if let Some(hours) = s.strip_suffix('h') {
            (hours, 3600)
        } else {
            (s, 1)
        };

        number(digits)?
            .checked_mul(unit_secs)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration `{s}` is too large"))
    }

    fn number(digits: &str) -> Result<u64, String> {
        digits
            .parse::<u64>()
            .map_err(|e| format!("invalid duration `{digits}`: {e}"))
    }
}
