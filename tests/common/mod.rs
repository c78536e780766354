//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use auth_bridge::config::{
    Config, IssuerConfig, JwksConfig, KeySource, ProviderKind, SigningConfig,
};
use auth_bridge::keyring::SigningKey;
use axum::{Json, Router, extract::State, routing::get};
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header, jwk::JwkSet};
use serde_json::{Value, json};
use tokio::net::TcpListener;

pub const KEY_A: &str = include_str!("../fixtures/signing_key_a.pem");
pub const KEY_B: &str = include_str!("../fixtures/signing_key_b.pem");
pub const ISSUER_KEY: &str = include_str!("../fixtures/issuer_key.pem");

pub const KID_A: &str = "d98393271d177e76af0532b1cb28b6228ee03cda";
pub const KID_B: &str = "646b540277c144501e8cd2f84bff04637ccd534a";
pub const ISSUER_KID: &str = "2291b8fb73937e11c0d3162cccf838b05ef43810";

pub const PROJECT: &str = "project-a";
pub const FIREBASE_ISSUER: &str = "https://securetoken.google.com/project-a";

/// Bind an ephemeral port and serve `app` in the background.
pub async fn spawn(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Upstream identity provider publishing the issuer key.
pub struct MockIssuer {
    pub jwks_url: String,
    pub fetches: Arc<AtomicUsize>,
}

impl MockIssuer {
    pub async fn start() -> Self {
        let jwks = JwkSet {
            keys: vec![SigningKey::from_pem(ISSUER_KEY).unwrap().jwk()],
        };
        let fetches = Arc::new(AtomicUsize::new(0));

        let app = Router::new()
            .route("/jwks.json", get(serve_jwks))
            .with_state((Arc::new(jwks), Arc::clone(&fetches)));
        let addr = spawn(app).await;

        Self {
            jwks_url: format!("http://{addr}/jwks.json"),
            fetches,
        }
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

async fn serve_jwks(
    State((jwks, fetches)): State<(Arc<JwkSet>, Arc<AtomicUsize>)>,
) -> Json<JwkSet> {
    fetches.fetch_add(1, Ordering::SeqCst);
    Json((*jwks).clone())
}

/// Sign `claims` as the upstream issuer with the given `kid`.
pub fn sign_upstream_with_kid(claims: &Value, kid: &str) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(kid.to_string());
    let key = EncodingKey::from_rsa_pem(ISSUER_KEY.as_bytes()).unwrap();
    jsonwebtoken::encode(&header, claims, &key).unwrap()
}

/// Sign `claims` as the upstream issuer.
pub fn sign_upstream(claims: &Value) -> String {
    sign_upstream_with_kid(claims, ISSUER_KID)
}

/// Claims of a valid Firebase ID token for `subject`.
pub fn firebase_claims(subject: &str, tenant: Option<&str>) -> Value {
    let now = Utc::now().timestamp();
    let mut claims = json!({
        "iss": FIREBASE_ISSUER,
        "aud": PROJECT,
        "sub": subject,
        "iat": now,
        "exp": now + 3600,
    });
    if let Some(tenant) = tenant {
        claims["firebase"] = json!({"tenant": tenant});
    }
    claims
}

pub fn firebase_issuer(jwks_url: &str) -> IssuerConfig {
    IssuerConfig {
        issuer: FIREBASE_ISSUER.into(),
        audience: PROJECT.into(),
        jwks_endpoint: jwks_url.into(),
        provider: ProviderKind::Firebase,
    }
}

pub fn plain_http_jwks() -> JwksConfig {
    JwksConfig {
        require_https: false,
        ..JwksConfig::default()
    }
}

/// Config accepting the mock issuer and signing with keys A (primary) and B.
pub fn config(jwks_url: &str) -> Config {
    Config {
        issuers: vec![firebase_issuer(jwks_url)],
        jwks: plain_http_jwks(),
        signing: SigningConfig {
            primary_key_id: KID_A.into(),
            keys: vec![KeySource::inline(KEY_A), KeySource::inline(KEY_B)],
        },
        ..Config::default()
    }
}
