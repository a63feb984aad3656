//! Tenant user lifecycle endpoints

use crate::auth::AuthContext;
use crate::service_method::{error_response, service_method};
use crate::state::AppState;
use axum::extract::State;
use axum::response::Response;
use axum::{Extension, Json};
use flouds_security::AuditEvent;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
pub struct TenantBody {
    #[serde(default)]
    pub tenant_code: Option<String>,
}

/// POST /api/v1/vector_store_users/set_user
///
/// Ensures the tenant user exists with its role grant; the generated
/// password is returned exactly once, on creation.
pub async fn set_user(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(body): Json<TenantBody>,
) -> Response {
    let tenant = match ctx
        .require_admin()
        .and_then(|()| ctx.require_tenant(body.tenant_code.as_deref()))
    {
        Ok(tenant) => tenant,
        Err(err) => return error_response(&err),
    };

    let tenant_for_body = tenant.clone();
    service_method("vector_store_users.set_user", &tenant, async move {
        let creds = ctx.require_db_token()?;
        let client = state
            .pool
            .acquire(
                &state.backend_uri(),
                &creds.user,
                &creds.secret,
                &state.config.database.db_name,
            )
            .await?;
        let summary = state
            .provisioner
            .set_vector_store(client.client(), &tenant_for_body)
            .await?;
        Ok((
            if summary.user_created {
                "tenant user created".to_string()
            } else {
                "tenant user already present".to_string()
            },
            json!({
                "username": summary.username,
                "password": summary.password,
                "role": tenant_for_body.role_name(),
            }),
        ))
    })
    .await
}

/// POST /api/v1/vector_store_users/reset_password
pub async fn reset_password(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(body): Json<TenantBody>,
) -> Response {
    let tenant = match ctx
        .require_admin()
        .and_then(|()| ctx.require_tenant(body.tenant_code.as_deref()))
    {
        Ok(tenant) => tenant,
        Err(err) => return error_response(&err),
    };

    let tenant_for_body = tenant.clone();
    service_method("vector_store_users.reset_password", &tenant, async move {
        let creds = ctx.require_db_token()?;
        let client = state
            .pool
            .acquire(
                &state.backend_uri(),
                &creds.user,
                &creds.secret,
                &state.config.database.db_name,
            )
            .await?;
        let new_password = state
            .provisioner
            .reset_password(client.client(), &tenant_for_body)
            .await?;
        let _ = state.audit.log(AuditEvent::PasswordReset {
            tenant_code: tenant_for_body.as_str().to_string(),
            reset_by: ctx.client.username.clone(),
        });
        Ok((
            "password reset".to_string(),
            json!({"new_password": new_password}),
        ))
    })
    .await
}
