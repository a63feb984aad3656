//! Tenant-scoped configuration endpoints (admin only)
//!
//! Writes invalidate the policy cache synchronously, so a CORS or trusted
//! host change is live for the very next request.

use crate::auth::AuthContext;
use crate::service_method::{error_response, service_method};
use crate::state::AppState;
use axum::extract::{Query, State};
use axum::response::Response;
use axum::{Extension, Json};
use flouds_core::error::GatewayError;
use flouds_security::AuditEvent;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
pub struct ConfigWriteBody {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub encrypted: Option<bool>,
    #[serde(default)]
    pub tenant_code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ConfigKeyQuery {
    pub key: String,
    #[serde(default)]
    pub tenant_code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ConfigListQuery {
    #[serde(default)]
    pub tenant_code: Option<String>,
}

/// POST /api/v1/config/add
pub async fn add(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(body): Json<ConfigWriteBody>,
) -> Response {
    let tenant = match ctx
        .require_admin()
        .and_then(|()| ctx.resolve_tenant(body.tenant_code.as_deref()))
    {
        Ok(tenant) => tenant,
        Err(err) => return error_response(&err),
    };

    let tenant_for_body = tenant.clone();
    service_method("config.add", &tenant, async move {
        state.config_store.add(
            &body.key,
            &tenant_for_body,
            &body.value,
            body.encrypted.unwrap_or(false),
        )?;
        let _ = state.audit.log(AuditEvent::ConfigurationChanged {
            key: body.key.clone(),
            tenant_code: tenant_for_body.as_str().to_string(),
            changed_by: ctx.client.username.clone(),
        });
        Ok(("config entry added".to_string(), json!({"ok": true})))
    })
    .await
}

/// GET /api/v1/config/get?key=…&tenant_code=…
pub async fn get(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Query(query): Query<ConfigKeyQuery>,
) -> Response {
    let tenant = match ctx
        .require_admin()
        .and_then(|()| ctx.resolve_tenant(query.tenant_code.as_deref()))
    {
        Ok(tenant) => tenant,
        Err(err) => return error_response(&err),
    };

    let tenant_for_body = tenant.clone();
    service_method("config.get", &tenant, async move {
        let entry = state
            .config_store
            .get(&query.key, &tenant_for_body)?
            .ok_or_else(|| {
                GatewayError::operation(format!("config entry '{}' not found", query.key))
            })?;
        Ok(("config entry".to_string(), json!(entry)))
    })
    .await
}

/// GET /api/v1/config/list?tenant_code=…
pub async fn list(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Query(query): Query<ConfigListQuery>,
) -> Response {
    let tenant = match ctx
        .require_admin()
        .and_then(|()| ctx.resolve_tenant(query.tenant_code.as_deref()))
    {
        Ok(tenant) => tenant,
        Err(err) => return error_response(&err),
    };

    let tenant_for_body = tenant.clone();
    service_method("config.list", &tenant, async move {
        let entries = state.config_store.list(&tenant_for_body)?;
        Ok(("config entries".to_string(), json!(entries)))
    })
    .await
}

/// PUT /api/v1/config/update
pub async fn update(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(body): Json<ConfigWriteBody>,
) -> Response {
    let tenant = match ctx
        .require_admin()
        .and_then(|()| ctx.resolve_tenant(body.tenant_code.as_deref()))
    {
        Ok(tenant) => tenant,
        Err(err) => return error_response(&err),
    };

    let tenant_for_body = tenant.clone();
    service_method("config.update", &tenant, async move {
        state
            .config_store
            .update(&body.key, &tenant_for_body, &body.value, body.encrypted)?;
        let _ = state.audit.log(AuditEvent::ConfigurationChanged {
            key: body.key.clone(),
            tenant_code: tenant_for_body.as_str().to_string(),
            changed_by: ctx.client.username.clone(),
        });
        Ok(("config entry updated".to_string(), json!({"ok": true})))
    })
    .await
}

/// DELETE /api/v1/config/delete?key=…&tenant_code=…
pub async fn delete(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Query(query): Query<ConfigKeyQuery>,
) -> Response {
    let tenant = match ctx
        .require_admin()
        .and_then(|()| ctx.resolve_tenant(query.tenant_code.as_deref()))
    {
        Ok(tenant) => tenant,
        Err(err) => return error_response(&err),
    };

    let tenant_for_body = tenant.clone();
    service_method("config.delete", &tenant, async move {
        state.config_store.delete(&query.key, &tenant_for_body)?;
        let _ = state.audit.log(AuditEvent::ConfigurationChanged {
            key: query.key.clone(),
            tenant_code: tenant_for_body.as_str().to_string(),
            changed_by: ctx.client.username.clone(),
        });
        Ok(("config entry deleted".to_string(), json!({"ok": true})))
    })
    .await
}
