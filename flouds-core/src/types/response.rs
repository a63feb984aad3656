//! Canonical response envelopes
//!
//! Every data/control-plane handler returns `ApiResponse<T>`; errors are
//! shaped by the service-method wrapper into `ErrorEnvelope` or, for 429s,
//! `RateLimitEnvelope` (its body layout is part of the public contract).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Success envelope wrapping handler results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    /// Tenant the request resolved to; empty for global operations
    pub tenant_code: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<T>,
    pub time_taken_ms: u64,
}

impl<T> ApiResponse<T> {
    /// Build a success envelope; `time_taken_ms` is stamped by the wrapper
    pub fn ok(message: impl Into<String>, tenant_code: impl Into<String>, results: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            tenant_code: tenant_code.into(),
            timestamp: Utc::now(),
            results: Some(results),
            time_taken_ms: 0,
        }
    }
}

/// Error envelope for all non-429 failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Human-readable title
    pub error: String,
    /// Human-readable message
    pub message: String,
    /// Machine code from the error taxonomy
    #[serde(rename = "type")]
    pub type_code: String,
    /// Sanitised detail string; never echoes secrets, IPs, or URIs
    pub details: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

/// Limit metadata attached to 429 responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitInfo {
    pub limit: u32,
    pub period: u64,
    pub retry_after: u64,
    pub limit_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
}

/// Denial body for rate-limited requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitEnvelope {
    pub error: String,
    #[serde(rename = "type")]
    pub type_code: String,
    pub message: String,
    pub limit_info: LimitInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_envelope_shape() {
        let resp = ApiResponse::ok("inserted", "acme", serde_json::json!({"inserted": 2}));
        assert!(resp.success);
        assert_eq!(resp.tenant_code, "acme");
        let json = serde_json::to_value(&resp).unwrap();
        assert!(json.get("results").is_some());
        assert!(json.get("time_taken_ms").is_some());
    }

    #[test]
    fn test_error_envelope_type_field_rename() {
        let env = ErrorEnvelope {
            error: "Validation Error".into(),
            message: "bad dimension".into(),
            type_code: "validation_error".into(),
            details: "dimension must be between 1 and 4096".into(),
            retry_after: None,
        };
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["type"], "validation_error");
        assert!(json.get("retry_after").is_none());
    }
}
