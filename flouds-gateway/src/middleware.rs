//! Request interceptor pipeline
//!
//! Outermost to innermost: CORS → trusted host → auth → rate limit →
//! validation → logging → metrics → handler. CORS and trusted-host policies
//! are tenant-scoped: the config store keys `cors_origins` and
//! `trusted_hosts` win over the global configuration defaults.

use crate::auth::{self, AuthContext};
use crate::service_method::error_response;
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use flouds_core::error::GatewayError;
use flouds_core::types::tenant::TenantCode;
use flouds_security::{sanitize, AuditEvent, ClientRecord, PatternList};
use metrics::{counter, histogram};
use std::time::Instant;
use tracing::info;

const ALLOWED_METHODS: &str = "GET, POST, PUT, DELETE, OPTIONS";
const ALLOWED_HEADERS: &str =
    "Authorization, Content-Type, X-Tenant-Code, Flouds-VectorDB-Token";

/// Resolve a pattern list: tenant config entry → global config default
fn resolve_patterns(
    state: &AppState,
    key: &str,
    tenant: Option<&TenantCode>,
    global_default: &[String],
) -> PatternList {
    let stored = tenant
        .and_then(|t| state.config_store.get_policy(key, t).ok().flatten())
        .or_else(|| {
            state
                .config_store
                .get_policy(key, &TenantCode::global())
                .ok()
                .flatten()
        });
    match stored {
        Some(raw) => {
            let patterns: Vec<String> = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
            PatternList::compile_lossy(&patterns)
        }
        None => PatternList::compile_lossy(global_default),
    }
}

/// CORS preflight handling and response header attachment
pub async fn cors(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let origin = request
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    let tenant = auth::parse_tenant_header(request.headers()).unwrap_or(None);

    let Some(origin) = origin else {
        // Not a cross-origin request
        return next.run(request).await;
    };

    let allowed = resolve_patterns(
        &state,
        "cors_origins",
        tenant.as_ref(),
        &state.config.security.cors_origins,
    );
    let origin_allowed = allowed.matches(&origin);

    if request.method() == Method::OPTIONS {
        if !origin_allowed {
            return error_response(&GatewayError::authorization(format!(
                "origin {origin} is not allowed"
            )));
        }
        let mut response = StatusCode::NO_CONTENT.into_response();
        let headers = response.headers_mut();
        if let Ok(value) = HeaderValue::from_str(&origin) {
            headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
        }
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOWED_METHODS),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOWED_HEADERS),
        );
        headers.insert(
            header::ACCESS_CONTROL_MAX_AGE,
            HeaderValue::from_static("600"),
        );
        return response;
    }

    let mut response = next.run(request).await;
    if origin_allowed {
        if let Ok(value) = HeaderValue::from_str(&origin) {
            response
                .headers_mut()
                .insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
            response
                .headers_mut()
                .insert(header::VARY, HeaderValue::from_static("Origin"));
        }
    }
    response
}

/// Reject requests whose Host is outside the tenant's trusted list
pub async fn trusted_host(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let tenant = auth::parse_tenant_header(request.headers()).unwrap_or(None);
    let trusted = resolve_patterns(
        &state,
        "trusted_hosts",
        tenant.as_ref(),
        &state.config.security.trusted_hosts,
    );

    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(strip_port)
        .unwrap_or_default();

    if trusted.matches(&host) {
        next.run(request).await
    } else {
        error_response(&GatewayError::validation(format!(
            "host '{}' is not trusted",
            sanitize(&host)
        )))
    }
}

/// Drop a trailing `:port` (IPv6 literals keep their brackets)
fn strip_port(host: &str) -> String {
    if host.starts_with('[') {
        host.split("]:").next().map_or_else(
            || host.to_string(),
            |h| format!("{}]", h.trim_end_matches(']')),
        )
    } else {
        host.rsplit_once(':')
            .filter(|(_, port)| port.chars().all(|c| c.is_ascii_digit()))
            .map_or_else(|| host.to_string(), |(h, _)| h.to_string())
    }
}

/// Authenticate the principal and attach the request identity
pub async fn authenticate(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let source_ip = auth::source_ip(request.headers(), None);

    if !state.config.security.enabled {
        // Security disabled: synthesise a global principal
        let db_token = auth::parse_db_token(request.headers()).unwrap_or(None);
        request.extensions_mut().insert(AuthContext {
            client: ClientRecord {
                username: "anonymous".to_string(),
                fingerprint: "0".repeat(16),
                tenant_code: String::new(),
                allowed_actions: vec!["admin".to_string()],
                created_at: Utc::now(),
                last_used_at: None,
            },
            header_tenant: None,
            db_token,
            source_ip,
        });
        return next.run(request).await;
    }

    let header_tenant = match auth::parse_tenant_header(request.headers()) {
        Ok(tenant) => tenant,
        Err(err) => return error_response(&err),
    };
    let (user, secret) = match auth::parse_bearer(request.headers()) {
        Ok(credentials) => credentials,
        Err(err) => return error_response(&err),
    };
    let client = match state
        .key_manager
        .validate(&user, &secret, header_tenant.as_ref())
    {
        Ok(client) => client,
        Err(err) => {
            let _ = state.audit.log(AuditEvent::AccessDenied {
                principal: user,
                operation: request.uri().path().to_string(),
                reason: err.to_string(),
            });
            return error_response(&err);
        }
    };
    let db_token = match auth::parse_db_token(request.headers()) {
        Ok(token) => token,
        Err(err) => return error_response(&err),
    };

    request.extensions_mut().insert(AuthContext {
        client,
        header_tenant,
        db_token,
        source_ip,
    });
    next.run(request).await
}

/// IP bucket first, tenant bucket when the tenant is resolvable
pub async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if !state.config.security.enabled {
        return next.run(request).await;
    }
    let Some(ctx) = request.extensions().get::<AuthContext>().cloned() else {
        return error_response(&GatewayError::internal("auth context missing"));
    };

    if let Some(err) = state.limiter.check_ip(&ctx.source_ip).into_error() {
        let _ = state.audit.log(AuditEvent::RateLimitExceeded {
            principal: ctx.client.username.clone(),
            limit_type: "ip".to_string(),
            limit: state.config.rate_limit.ip_limit,
        });
        return error_response(&err);
    }

    if let Some(tenant) = &ctx.header_tenant {
        if let Some(err) = state
            .limiter
            .check_tenant(tenant, &state.config_store)
            .into_error()
        {
            let _ = state.audit.log(AuditEvent::RateLimitExceeded {
                principal: ctx.client.username.clone(),
                limit_type: "tenant".to_string(),
                limit: match &err {
                    GatewayError::RateLimited { limit, .. } => *limit,
                    _ => 0,
                },
            });
            return error_response(&err);
        }
    }

    next.run(request).await
}

/// Shape checks that precede body deserialisation
pub async fn validate_request(
    State(_state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if matches!(*request.method(), Method::POST | Method::PUT) {
        let is_json = request
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/json"));
        if !is_json {
            return error_response(&GatewayError::validation(
                "request body must be application/json",
            ));
        }
    }
    next.run(request).await
}

/// Structured request log line with latency
pub async fn request_logging(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = Instant::now();
    let response = next.run(request).await;
    info!(
        method = %method,
        path = %sanitize(&path),
        status = response.status().as_u16(),
        latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
        "request"
    );
    response
}

/// Request counters and latency histogram
pub async fn track_metrics(request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let start = Instant::now();
    let response = next.run(request).await;
    let status = response.status().as_u16().to_string();
    counter!("flouds_http_requests_total", "method" => method, "status" => status).increment(1);
    histogram!("flouds_http_request_duration_seconds").record(start.elapsed().as_secs_f64());
    response
}
