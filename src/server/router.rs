//! HTTP router and handlers

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::json;
use tower_http::{catch_panic::CatchPanicLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::error;

use crate::error::{Code, Status};
use crate::service::AuthService;
use crate::{Error, Result};

/// Path of the JWKS document
pub const JWKS_PATH: &str = "/.well-known/jwks.json";

/// Create the router
pub fn create_router(service: Arc<AuthService>, request_timeout: Duration) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route(JWKS_PATH, get(jwks_handler))
        .route("/rpc/ExchangeToken", post(exchange_token))
        .route("/rpc/VerifyToken", post(verify_token))
        .route("/rpc/VerifyTokenV2", post(verify_token_v2))
        .route("/rpc/GenerateFakeToken", post(generate_fake_token))
        .route("/rpc/VerifySignature", post(verify_signature))
        .route("/rpc/GetAuthInfo", post(get_auth_info))
        .route("/rpc/ExchangeSalesforceToken", post(exchange_salesforce_token))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// GET /.well-known/jwks.json
async fn jwks_handler(State(service): State<Arc<AuthService>>) -> impl IntoResponse {
    Json(service.keys().public_jwks().clone())
}

async fn exchange_token(
    State(service): State<Arc<AuthService>>,
    body: std::result::Result<Json<crate::service::ExchangeTokenRequest>, JsonRejection>,
) -> Response {
    match parse(body) {
        Ok(req) => respond(service.exchange_token(req).await),
        Err(e) => respond::<()>(Err(e)),
    }
}

async fn verify_token(
    State(service): State<Arc<AuthService>>,
    body: std::result::Result<Json<crate::service::VerifyTokenRequest>, JsonRejection>,
) -> Response {
    match parse(body) {
        Ok(req) => respond(service.verify_token(req).await),
        Err(e) => respond::<()>(Err(e)),
    }
}

async fn verify_token_v2(
    State(service): State<Arc<AuthService>>,
    body: std::result::Result<Json<crate::service::VerifyTokenRequest>, JsonRejection>,
) -> Response {
    match parse(body) {
        Ok(req) => respond(service.verify_token_v2(req).await),
        Err(e) => respond::<()>(Err(e)),
    }
}

async fn generate_fake_token(
    State(service): State<Arc<AuthService>>,
    body: std::result::Result<Json<crate::service::GenerateFakeTokenRequest>, JsonRejection>,
) -> Response {
    match parse(body) {
        Ok(req) => respond(service.generate_fake_token(req).await),
        Err(e) => respond::<()>(Err(e)),
    }
}

async fn verify_signature(
    State(service): State<Arc<AuthService>>,
    body: std::result::Result<Json<crate::service::VerifySignatureRequest>, JsonRejection>,
) -> Response {
    match parse(body) {
        Ok(req) => respond(service.verify_signature(req).await),
        Err(e) => respond::<()>(Err(e)),
    }
}

async fn get_auth_info(
    State(service): State<Arc<AuthService>>,
    body: std::result::Result<Json<crate::service::GetAuthInfoRequest>, JsonRejection>,
) -> Response {
    match parse(body) {
        Ok(req) => respond(service.get_auth_info(req).await),
        Err(e) => respond::<()>(Err(e)),
    }
}

async fn exchange_salesforce_token(
    State(service): State<Arc<AuthService>>,
    body: std::result::Result<Json<crate::service::ExchangeSalesforceTokenRequest>, JsonRejection>,
) -> Response {
    match parse(body) {
        Ok(req) => respond(service.exchange_salesforce_token(req).await),
        Err(e) => respond::<()>(Err(e)),
    }
}

fn parse<T: DeserializeOwned>(body: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    body.map(|Json(req)| req)
        .map_err(|e| Error::InvalidArgument(e.body_text()))
}

fn respond<T: Serialize>(result: Result<T>) -> Response {
    match result {
        Ok(body) => Json(body).into_response(),
        Err(e) => {
            if e.code() == Code::Internal || e.code() == Code::Unavailable {
                error!(error = %e, "Request failed");
            }
            error_response(&Status::from(e))
        }
    }
}

fn error_response(status: &Status) -> Response {
    let http = StatusCode::from_u16(status.code.http_status())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (http, Json(json!({"code": status.code, "message": status.message}))).into_response()
}
