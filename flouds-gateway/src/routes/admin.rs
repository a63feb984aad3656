//! Admin surfaces: metrics rendering and client fingerprints

use crate::auth::AuthContext;
use crate::service_method::{error_response, service_method};
use crate::state::AppState;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Extension;
use flouds_core::types::tenant::TenantCode;
use serde_json::json;

/// GET /api/v1/metrics — Prometheus exposition (admin only)
pub async fn metrics(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Response {
    if let Err(err) = ctx.require_admin() {
        return error_response(&err);
    }
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics_handle.render(),
    )
        .into_response()
}

/// GET /api/v1/admin/fingerprints — client audit listing (admin only)
pub async fn fingerprints(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Response {
    if let Err(err) = ctx.require_admin() {
        return error_response(&err);
    }
    service_method("admin.fingerprints", &TenantCode::global(), async move {
        let entries = state.key_manager.list_fingerprints()?;
        Ok(("client fingerprints".to_string(), json!(entries)))
    })
    .await
}
