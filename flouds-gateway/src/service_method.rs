//! Uniform service-method wrapper
//!
//! Every data/control-plane handler runs through [`service_method`], which
//! stamps timing, maps typed errors to the canonical envelope, and keeps all
//! outbound detail strings sanitised. Rate-limit denials get their own body
//! shape (part of the public contract) plus `Retry-After` headers.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use flouds_core::error::{GatewayError, Result};
use flouds_core::types::response::{ApiResponse, ErrorEnvelope, LimitInfo, RateLimitEnvelope};
use flouds_core::types::tenant::TenantCode;
use flouds_security::sanitize;
use metrics::{counter, histogram};
use serde::Serialize;
use std::future::Future;
use std::time::Instant;
use tracing::{error, warn};

/// Run a handler body inside the canonical envelope
///
/// `operation` names the route for logs and metrics; `tenant` is the
/// resolved request tenant.
pub async fn service_method<T, Fut>(
    operation: &'static str,
    tenant: &TenantCode,
    fut: Fut,
) -> Response
where
    T: Serialize,
    Fut: Future<Output = Result<(String, T)>>,
{
    let start = Instant::now();
    let outcome = fut.await;
    let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
    histogram!("flouds_operation_duration_ms", "operation" => operation)
        .record(elapsed_ms as f64);

    match outcome {
        Ok((message, results)) => {
            counter!("flouds_operations_total", "operation" => operation, "outcome" => "ok")
                .increment(1);
            let mut envelope = ApiResponse::ok(message, tenant.as_str(), results);
            envelope.time_taken_ms = elapsed_ms;
            (StatusCode::OK, Json(envelope)).into_response()
        }
        Err(err) => {
            counter!("flouds_operations_total", "operation" => operation, "outcome" => "error")
                .increment(1);
            log_failure(operation, &err);
            error_response(&err)
        }
    }
}

fn log_failure(operation: &str, err: &GatewayError) {
    let detail = sanitize(&err.to_string());
    if err.is_server_fault() {
        error!(operation, kind = err.kind_code(), detail = %detail, "Request failed");
    } else {
        warn!(operation, kind = err.kind_code(), detail = %detail, "Request rejected");
    }
}

/// Map a typed error to its wire response
#[must_use]
pub fn error_response(err: &GatewayError) -> Response {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    if let GatewayError::RateLimited {
        limit,
        period_secs,
        retry_after_secs,
        scope,
        tier,
    } = err
    {
        let body = RateLimitEnvelope {
            error: err.title().to_string(),
            type_code: err.kind_code().to_string(),
            message: format!("Too many requests. Limit: {limit} requests per {period_secs} seconds"),
            limit_info: LimitInfo {
                limit: *limit,
                period: *period_secs,
                retry_after: *retry_after_secs,
                limit_type: scope.as_str().to_string(),
                tier: tier.clone(),
            },
            suggestion: (tier.as_deref() == Some(crate::limits::TIER_DEFAULT))
                .then(|| "Consider upgrading your tier for higher limits".to_string()),
        };
        let mut response = (status, Json(body)).into_response();
        let headers = response.headers_mut();
        if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
            headers.insert(header::RETRY_AFTER, value.clone());
            headers.insert("x-ratelimit-reset", value);
        }
        if let Ok(value) = HeaderValue::from_str(&limit.to_string()) {
            headers.insert("x-ratelimit-limit", value);
        }
        return response;
    }

    let envelope = ErrorEnvelope {
        error: err.title().to_string(),
        message: err.title().to_string(),
        type_code: err.kind_code().to_string(),
        details: sanitize(&err.to_string()),
        retry_after: matches!(err, GatewayError::Connection { .. }).then_some(5),
    };
    (status, Json(envelope)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flouds_core::error::RateScope;

    #[tokio::test]
    async fn test_success_envelope_carries_timing_and_tenant() {
        let tenant = TenantCode::parse("demo").unwrap();
        let response = service_method("test_op", &tenant, async {
            Ok(("done".to_string(), serde_json::json!({"x": 1})))
        })
        .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_error_maps_to_status() {
        let tenant = TenantCode::global();
        let response = service_method::<serde_json::Value, _>("test_op", &tenant, async {
            Err(GatewayError::schema_conflict("dim mismatch"))
        })
        .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_rate_limit_response_shape() {
        let err = GatewayError::RateLimited {
            limit: 100,
            period_secs: 60,
            retry_after_secs: 12,
            scope: RateScope::Ip,
            tier: None,
        };
        let response = error_response(&err);
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).unwrap(),
            "12"
        );
        assert_eq!(response.headers().get("x-ratelimit-limit").unwrap(), "100");
    }

    #[test]
    fn test_error_details_are_sanitised() {
        let err = GatewayError::connection("connection to mongodb://admin:pw@10.0.0.1 failed");
        let response = error_response(&err);
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
