//! Router configuration.
//!
//! This module creates the main Axum router that combines all endpoints.
//!
//! | Method   | Path                      | Handler        |
//! |----------|---------------------------|----------------|
//! | GET      | `/saml/login`             | `login`        |
//! | GET      | `/saml/login/status`      | `login_status` |
//! | POST     | `/saml/login/cancel`      | `cancel_login` |
//! | GET      | `/saml/logout`            | `logout`       |
//! | GET/POST | ACS path (configured)     | `acs`          |
//! | GET/POST | SLO path (configured)     | `slo`          |
//! | POST     | SLO path + `/soap`        | `slo_soap`     |
//! | GET      | metadata path (configured)| `metadata`     |

use std::collections::HashSet;

use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use fed_sp::SpConfig;
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Path of the login endpoint.
pub const LOGIN_PATH: &str = "/saml/login";
/// Path of the login status endpoint.
pub const LOGIN_STATUS_PATH: &str = "/saml/login/status";
/// Path of the login cancel endpoint.
pub const LOGIN_CANCEL_PATH: &str = "/saml/login/cancel";
/// Path of the SP-initiated logout endpoint.
pub const LOGOUT_PATH: &str = "/saml/logout";

const FIXED_PATHS: [&str; 7] = [
    LOGIN_PATH,
    LOGIN_STATUS_PATH,
    LOGIN_CANCEL_PATH,
    LOGOUT_PATH,
    "/health",
    "/health/live",
    "/health/ready",
];

/// Creates the main application router.
pub fn create_router(state: AppState) -> Router {
    let config = state.verificator.config();

    let mut saml = Router::new()
        .route(LOGIN_PATH, get(handlers::login))
        .route(LOGIN_STATUS_PATH, get(handlers::login_status))
        .route(LOGIN_CANCEL_PATH, post(handlers::cancel_login))
        .route(LOGOUT_PATH, get(handlers::logout))
        .route(
            &config.acs_path,
            get(handlers::acs_redirect).post(handlers::acs_post),
        );

    if let Some(publisher) = state.verificator.metadata() {
        saml = saml.route(publisher.path(), get(handlers::metadata));
    }

    if let (true, Some(path)) = (state.verificator.slo_enabled(), &config.slo.path) {
        saml = saml
            .route(path, get(handlers::slo_redirect).post(handlers::slo_post))
            .route(&soap_path(path), post(handlers::slo_soap));
    }

    let health = Router::new()
        .route("/health", get(health_check))
        .route("/health/live", get(liveness_check))
        .route("/health/ready", get(readiness_check));

    Router::new()
        .merge(saml)
        .merge(health)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Checks that the configured endpoint paths can be routed.
///
/// # Errors
///
/// Returns an error if a path does not start with `/` or two endpoints
/// share a path.
pub fn validate_paths(config: &SpConfig) -> anyhow::Result<()> {
    let mut seen: HashSet<String> = FIXED_PATHS.iter().map(|p| (*p).to_string()).collect();
    let mut configured = vec![("acs_path", config.acs_path.clone())];
    if config.metadata_publishing.publish {
        configured.push(("metadata_publishing.path", config.metadata_publishing.path.clone()));
    }
    if let (true, Some(path)) = (config.slo_enabled(), &config.slo.path) {
        configured.push(("slo.path", path.clone()));
        configured.push(("slo.path (SOAP)", soap_path(path)));
    }

    for (name, path) in configured {
        if !path.starts_with('/') {
            anyhow::bail!("{name} '{path}' must start with '/'");
        }
        if !seen.insert(path.clone()) {
            anyhow::bail!("{name} '{path}' is already used by another endpoint");
        }
    }
    Ok(())
}

fn soap_path(slo_path: &str) -> String {
    format!("{}/soap", slo_path.trim_end_matches('/'))
}

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<String>,
}

/// Basic health check.
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: Some(env!("CARGO_PKG_VERSION").to_string()),
    })
}

/// Liveness endpoint.
async fn liveness_check() -> StatusCode {
    StatusCode::OK
}

/// Readiness endpoint. Ready once some provider is trusted.
async fn readiness_check(State(state): State<AppState>) -> StatusCode {
    if state.verificator.providers().is_empty() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}
