//! Vector store data and control plane
//!
//! Provisioning and schema generation are admin operations; insert and
//! search require the matching data-plane action. All of them reach the
//! backend through a pooled client built from the per-request
//! `Flouds-VectorDB-Token` credentials, so tenant isolation holds end to
//! end: a request can only touch what its backend principal can see.

use crate::auth::AuthContext;
use crate::service_method::{error_response, service_method};
use crate::state::AppState;
use axum::extract::State;
use axum::response::Response;
use axum::{Extension, Json};
use flouds_core::error::Result;
use flouds_core::types::tenant::TenantCode;
use flouds_core::types::vector::{DistanceMetric, EmbeddedVector, IndexKind};
use flouds_security::AuditEvent;
use flouds_storage::PooledClient;
use flouds_vector::{SchemaRequest, SearchRequest};
use serde::Deserialize;
use serde_json::json;

/// Acquire a pooled backend client bound to the tenant database
async fn tenant_client(
    state: &AppState,
    ctx: &AuthContext,
    tenant: &TenantCode,
) -> Result<PooledClient> {
    let creds = ctx.require_db_token()?;
    state
        .pool
        .acquire(
            &state.backend_uri(),
            &creds.user,
            &creds.secret,
            &tenant.database_name(),
        )
        .await
}

/// Acquire a pooled backend client bound to the default (admin) database
async fn admin_client(state: &AppState, ctx: &AuthContext) -> Result<PooledClient> {
    let creds = ctx.require_db_token()?;
    state
        .pool
        .acquire(
            &state.backend_uri(),
            &creds.user,
            &creds.secret,
            &state.config.database.db_name,
        )
        .await
}

#[derive(Debug, Deserialize)]
pub struct SetVectorStoreRequest {
    #[serde(default)]
    pub tenant_code: Option<String>,
}

/// POST /api/v1/vector_store/set_vector_store
pub async fn set_vector_store(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(body): Json<SetVectorStoreRequest>,
) -> Response {
    let tenant = match ctx
        .require_admin()
        .and_then(|()| ctx.require_tenant(body.tenant_code.as_deref()))
    {
        Ok(tenant) => tenant,
        Err(err) => return error_response(&err),
    };

    let tenant_for_body = tenant.clone();
    service_method("vector_store.set_vector_store", &tenant, async move {
        let client = admin_client(&state, &ctx).await?;
        let summary = state
            .provisioner
            .set_vector_store(client.client(), &tenant_for_body)
            .await?;
        let _ = state.audit.log(AuditEvent::TenantProvisioned {
            tenant_code: tenant_for_body.as_str().to_string(),
            provisioned_by: ctx.client.username.clone(),
            database_created: summary.database_created,
            user_created: summary.user_created,
        });
        Ok(("vector store provisioned".to_string(), summary))
    })
    .await
}

#[derive(Debug, Deserialize)]
pub struct GenerateSchemaRequest {
    #[serde(default)]
    pub tenant_code: Option<String>,
    pub model_name: String,
    pub dimension: usize,
    #[serde(default)]
    pub metric_type: Option<String>,
    #[serde(default)]
    pub index_type: Option<String>,
    #[serde(default)]
    pub nlist: Option<u32>,
    #[serde(default)]
    pub metadata_length: Option<u32>,
}

/// POST /api/v1/vector_store/generate_schema
pub async fn generate_schema(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(body): Json<GenerateSchemaRequest>,
) -> Response {
    let tenant = match ctx
        .require_admin()
        .and_then(|()| ctx.require_tenant(body.tenant_code.as_deref()))
    {
        Ok(tenant) => tenant,
        Err(err) => return error_response(&err),
    };

    let tenant_for_body = tenant.clone();
    service_method("vector_store.generate_schema", &tenant, async move {
        let defaults = &state.config.vector;
        let request = SchemaRequest {
            dimension: body.dimension,
            metric: match &body.metric_type {
                Some(raw) => DistanceMetric::parse(raw)?,
                None => DistanceMetric::parse(&defaults.default_metric)?,
            },
            index: match &body.index_type {
                Some(raw) => IndexKind::parse(raw)?,
                None => IndexKind::parse(&defaults.default_index)?,
            },
            nlist: body.nlist.unwrap_or(defaults.nlist),
            metadata_length: body.metadata_length.unwrap_or(defaults.metadata_length),
            drop_ratio_build: defaults.drop_ratio_build,
        };
        let client = tenant_client(&state, &ctx, &tenant_for_body).await?;
        let outcome = state
            .schema_manager
            .generate_schema(client.client(), &tenant_for_body, &body.model_name, &request)
            .await?;
        Ok(("schema generated".to_string(), outcome))
    })
    .await
}

#[derive(Debug, Deserialize)]
pub struct InsertRequest {
    #[serde(default)]
    pub tenant_code: Option<String>,
    pub model_name: String,
    pub data: Vec<EmbeddedVector>,
    #[serde(default)]
    pub auto_flush: Option<bool>,
}

/// POST /api/v1/vector_store/insert
pub async fn insert(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(body): Json<InsertRequest>,
) -> Response {
    let tenant = match ctx
        .require_action("write")
        .and_then(|()| ctx.require_tenant(body.tenant_code.as_deref()))
    {
        Ok(tenant) => tenant,
        Err(err) => return error_response(&err),
    };

    let tenant_for_body = tenant.clone();
    service_method("vector_store.insert", &tenant, async move {
        let client = tenant_client(&state, &ctx, &tenant_for_body).await?;
        let outcome = state
            .engine
            .insert(
                client.client(),
                &tenant_for_body,
                &body.model_name,
                body.data,
                body.auto_flush,
            )
            .await?;
        Ok((
            format!("{} vectors upserted", outcome.inserted),
            json!({"inserted": outcome.inserted, "flushed": outcome.flushed}),
        ))
    })
    .await
}

#[derive(Debug, Deserialize)]
pub struct VectorSearchRequest {
    #[serde(default)]
    pub tenant_code: Option<String>,
    pub model: String,
    pub vector: Vec<f32>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub score_threshold: Option<f32>,
    #[serde(default)]
    pub metric_type: Option<String>,
    #[serde(default)]
    pub hybrid_search: bool,
    #[serde(default)]
    pub text_filter: Option<String>,
    #[serde(default = "default_min_words")]
    pub minimum_words_match: usize,
    #[serde(default)]
    pub include_stop_words: bool,
}

const fn default_limit() -> usize {
    10
}

const fn default_min_words() -> usize {
    1
}

/// POST /api/v1/vector_store/search
pub async fn search(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(body): Json<VectorSearchRequest>,
) -> Response {
    let tenant = match ctx
        .require_action("read")
        .and_then(|()| ctx.require_tenant(body.tenant_code.as_deref()))
    {
        Ok(tenant) => tenant,
        Err(err) => return error_response(&err),
    };

    let tenant_for_body = tenant.clone();
    service_method("vector_store.search", &tenant, async move {
        // The metric is fixed at collection creation; a supplied value is
        // validated for shape and otherwise ignored.
        if let Some(metric) = &body.metric_type {
            DistanceMetric::parse(metric)?;
        }
        let request = SearchRequest {
            vector: body.vector,
            limit: body.limit,
            score_threshold: body.score_threshold,
            hybrid: body.hybrid_search,
            text_filter: body.text_filter,
            minimum_words_match: body.minimum_words_match,
            include_stop_words: body.include_stop_words,
        };
        let start = std::time::Instant::now();
        let client = tenant_client(&state, &ctx, &tenant_for_body).await?;
        let hits = state
            .engine
            .search(client.client(), &tenant_for_body, &body.model, &request)
            .await?;
        let search_time_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        let total_count = hits.len();
        Ok((
            format!("{total_count} results"),
            json!({
                "results": hits,
                "total_count": total_count,
                "search_time_ms": search_time_ms,
            }),
        ))
    })
    .await
}

#[derive(Debug, Deserialize)]
pub struct FlushRequest {
    #[serde(default)]
    pub tenant_code: Option<String>,
    pub model_name: String,
}

/// POST /api/v1/vector_store/flush
pub async fn flush(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(body): Json<FlushRequest>,
) -> Response {
    let tenant = match ctx
        .require_action("write")
        .and_then(|()| ctx.require_tenant(body.tenant_code.as_deref()))
    {
        Ok(tenant) => tenant,
        Err(err) => return error_response(&err),
    };

    let tenant_for_body = tenant.clone();
    service_method("vector_store.flush", &tenant, async move {
        let client = tenant_client(&state, &ctx, &tenant_for_body).await?;
        state
            .engine
            .flush(client.client(), &tenant_for_body, &body.model_name)
            .await?;
        Ok(("flush issued".to_string(), json!({"flushed": true})))
    })
    .await
}
