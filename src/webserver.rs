//! HTTP transport
//!
//! - `POST /sign-cert`: PEM certificate template in, PEM chain bundle out.
//! - `GET /api/status`: materials health and ledger counters.
//!
//! Authentication happens in front of this server; the authenticated principal
//! arrives in the `X-Remote-User` header.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_server::tls_rustls::RustlsConfig;
use serde::Serialize;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::chain::PEM_CONTENT_TYPE;
use crate::configs::{AppConfig, PkiConfig};
use crate::error::PkiError;
use crate::health::MaterialsStatus;
use crate::ledger::{LedgerStats, Principal};
use crate::service::SigningService;

pub const PRINCIPAL_HEADER: &str = "x-remote-user";

pub struct AppState {
    pub service: Arc<SigningService>,
    pub pki: PkiConfig,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            ApiError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "PKI_UNAVAILABLE"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };
        let body = ErrorResponse {
            error: self.to_string(),
            code,
        };
        (status, Json(body)).into_response()
    }
}

impl From<PkiError> for ApiError {
    fn from(err: PkiError) -> Self {
        match err {
            PkiError::Misconfigured(reason) => {
                warn!(reason = %reason, "Refusing to sign: PKI misconfigured");
                ApiError::Unavailable("Certificate signing is currently unavailable".to_string())
            }
            PkiError::Uningestible(reason) => {
                ApiError::BadRequest(format!("The offered certificate is not ingestible: {}", reason))
            }
            other => {
                error!(error = %other, "Signing failed");
                ApiError::Internal("Certificate signing failed".to_string())
            }
        }
    }
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    version: &'static str,
    materials: MaterialsStatus,
    ledger: Option<LedgerStats>,
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/sign-cert", post(sign_cert))
        .route("/api/status", get(get_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn sign_cert(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    if !is_pem_content_type(&headers) {
        return Err(ApiError::BadRequest(
            "Please post a PEM-encoded certificate.".to_string(),
        ));
    }

    let principal = headers
        .get(PRINCIPAL_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ApiError::Unauthorized("User is not authenticated".to_string()))?;
    if !state.pki.may_sign(principal) {
        return Err(ApiError::Forbidden(
            "User doesn't have certificate signing permission".to_string(),
        ));
    }
    let principal = Principal::user(principal);

    let service = Arc::clone(&state.service);
    let bundle = tokio::task::spawn_blocking(move || service.sign_request_bundle(&body, &principal))
        .await
        .map_err(|e| ApiError::Internal(format!("Signing task failed: {}", e)))??;

    Ok(([(CONTENT_TYPE, PEM_CONTENT_TYPE)], bundle).into_response())
}

/// Media type must be exactly `application/x-pem-file`; parameters are ignored.
fn is_pem_content_type(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|media_type| media_type.trim().eq_ignore_ascii_case(PEM_CONTENT_TYPE))
}

async fn get_status(State(state): State<Arc<AppState>>) -> Result<Json<StatusResponse>, ApiError> {
    let service = Arc::clone(&state.service);
    let (materials, ledger) = tokio::task::spawn_blocking(move || {
        (service.check_materials(), service.ledger_stats().ok())
    })
    .await
    .map_err(|e| ApiError::Internal(format!("Status task failed: {}", e)))?;

    let status = if materials.is_ready() && ledger.is_some() {
        "ok"
    } else {
        "degraded"
    };
    Ok(Json(StatusResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        materials,
        ledger,
    }))
}

/// Serve the API until the process is stopped. HTTPS when TLS paths are configured.
pub async fn start_webserver(config: &AppConfig, service: Arc<SigningService>) -> Result<()> {
    let state = Arc::new(AppState {
        service,
        pki: config.pki.clone(),
    });
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server host/port")?;

    match (&config.server.tls_cert_path, &config.server.tls_key_path) {
        (Some(cert), Some(key)) => {
            let tls = RustlsConfig::from_pem_file(cert, key)
                .await
                .context("Failed to load TLS certificate and key")?;
            info!(%addr, "HTTPS server listening");
            axum_server::bind_rustls(addr, tls)
                .serve(app.into_make_service())
                .await
                .context("HTTPS server error")?;
        }
        _ => {
            info!(%addr, "HTTP server listening");
            axum_server::bind(addr)
                .serve(app.into_make_service())
                .await
                .context("HTTP server error")?;
        }
    }
    Ok(())
}
