//! Liveness, readiness, and pool diagnostics

use crate::auth;
use crate::service_method::error_response;
use crate::state::AppState;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use flouds_core::error::{GatewayError, Result};
use serde_json::json;

/// Probe the backend with the configured admin credentials
async fn backend_reachable(state: &AppState) -> bool {
    let Ok(password) = state.config.database.resolve_password() else {
        return false;
    };
    let client = state
        .pool
        .acquire(
            &state.backend_uri(),
            &state.config.database.user,
            &password,
            &state.config.database.db_name,
        )
        .await;
    match client {
        Ok(client) => client.ping().await.is_ok(),
        Err(_) => false,
    }
}

/// GET /health — full status report
pub async fn health(State(state): State<AppState>) -> Response {
    let connected = backend_reachable(&state).await;
    let config_errors: Vec<String> = match state.config.validate() {
        Ok(()) => Vec::new(),
        Err(err) => vec![err.to_string()],
    };
    let pool_stats = state.pool.stats();

    let body = json!({
        "status": if connected { "ok" } else { "degraded" },
        "milvus": {
            "connected": connected,
            "uri": state.backend_uri(),
            "pooled_connections": pool_stats.total,
        },
        "system": {
            "uptime_secs": state.started_at.elapsed().as_secs(),
            "version": env!("CARGO_PKG_VERSION"),
        },
        "configuration": {
            "valid": config_errors.is_empty(),
            "errors": config_errors,
        },
    });
    (StatusCode::OK, Json(body)).into_response()
}

/// GET /health/ready — 200 iff the backend is reachable
pub async fn ready(State(state): State<AppState>) -> Response {
    if backend_reachable(&state).await {
        (StatusCode::OK, Json(json!({"status": "ready"}))).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "not ready", "reason": "vector engine unreachable"})),
        )
            .into_response()
    }
}

/// GET /health/live — process liveness only
pub async fn live() -> Response {
    (StatusCode::OK, Json(json!({"status": "alive"}))).into_response()
}

/// Admin gate for unauthenticated-by-default health routes
fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<()> {
    if !state.config.security.enabled {
        return Ok(());
    }
    let (user, secret) = auth::parse_bearer(headers)?;
    let client = state.key_manager.validate(&user, &secret, None)?;
    if client.is_admin() {
        Ok(())
    } else {
        Err(GatewayError::authorization(format!(
            "client {user} lacks the admin action"
        )))
    }
}

/// GET /health/connections — pool statistics (admin only)
pub async fn connections(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(err) = require_admin(&state, &headers) {
        return error_response(&err);
    }
    (StatusCode::OK, Json(json!(state.pool.stats()))).into_response()
}
