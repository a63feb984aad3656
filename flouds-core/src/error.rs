//! ABOUTME: Error types and handling for the Flouds vector gateway
//! ABOUTME: Provides the GatewayError enum, wire codes, and Result type alias

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which limiter produced a rate-limit denial
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateScope {
    /// Per-source-address window
    Ip,
    /// Per-tenant window with tier quotas
    Tenant,
}

impl RateScope {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ip => "ip",
            Self::Tenant => "tenant",
        }
    }
}

/// Comprehensive error enum for all gateway operations
///
/// Every variant carries a machine code (`kind_code`) and an HTTP status
/// (`http_status`). Handlers raise these; the service-method wrapper maps
/// them to the canonical error envelope.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    #[error("Not authorized: {message}")]
    Authorization { message: String },

    #[error("Tenant error: {message}")]
    Tenant { message: String },

    #[error("Too many requests. Limit: {limit} requests per {period_secs} seconds")]
    RateLimited {
        limit: u32,
        period_secs: u64,
        retry_after_secs: u64,
        scope: RateScope,
        tier: Option<String>,
    },

    #[error("Connection error: {message}")]
    Connection { message: String },

    #[error("Operation error: {message}")]
    Operation { message: String },

    #[error("Schema conflict: {message}")]
    SchemaConflict { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Encryption error: {message}")]
    Encryption { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl GatewayError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    pub fn authorization(message: impl Into<String>) -> Self {
        Self::Authorization {
            message: message.into(),
        }
    }

    pub fn tenant(message: impl Into<String>) -> Self {
        Self::Tenant {
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn operation(message: impl Into<String>) -> Self {
        Self::Operation {
            message: message.into(),
        }
    }

    pub fn schema_conflict(message: impl Into<String>) -> Self {
        Self::SchemaConflict {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn encryption(message: impl Into<String>) -> Self {
        Self::Encryption {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Machine-readable error code used in the wire envelope
    #[must_use]
    pub const fn kind_code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation_error",
            Self::Authentication { .. } => "authentication_error",
            Self::Authorization { .. } => "authorization_error",
            Self::Tenant { .. } => "tenant_error",
            Self::RateLimited { .. } => "rate_limit_error",
            Self::Connection { .. } => "connection_error",
            Self::Operation { .. } => "operation_error",
            Self::SchemaConflict { .. } => "schema_conflict",
            Self::Configuration { .. } => "configuration_error",
            Self::Encryption { .. } => "system_error",
            Self::Internal { .. } => "internal_error",
        }
    }

    /// HTTP status the error maps to
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::Validation { .. } | Self::Tenant { .. } | Self::Operation { .. } => 400,
            Self::Authentication { .. } => 401,
            Self::Authorization { .. } => 403,
            Self::SchemaConflict { .. } => 409,
            Self::RateLimited { .. } => 429,
            Self::Connection { .. } => 503,
            Self::Configuration { .. } | Self::Encryption { .. } | Self::Internal { .. } => 500,
        }
    }

    /// Human-readable title for the error envelope
    #[must_use]
    pub const fn title(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "Validation Error",
            Self::Authentication { .. } => "Authentication Failed",
            Self::Authorization { .. } => "Not Authorized",
            Self::Tenant { .. } => "Tenant Error",
            Self::RateLimited { .. } => "Rate Limit Exceeded",
            Self::Connection { .. } => "Service Unavailable",
            Self::Operation { .. } => "Operation Failed",
            Self::SchemaConflict { .. } => "Schema Conflict",
            Self::Configuration { .. } => "Configuration Error",
            Self::Encryption { .. } => "System Error",
            Self::Internal { .. } => "Internal Error",
        }
    }

    /// Whether the failure should be logged at `error` level
    ///
    /// Rate-limit denials and client-side mistakes are logged at `warn`.
    #[must_use]
    pub const fn is_server_fault(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::Configuration { .. }
                | Self::Encryption { .. }
                | Self::Internal { .. }
        )
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation {
            message: format!("invalid JSON payload: {err}"),
        }
    }
}

/// Convenience Result type alias
pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_codes_match_taxonomy() {
        assert_eq!(GatewayError::validation("x").kind_code(), "validation_error");
        assert_eq!(GatewayError::tenant("x").kind_code(), "tenant_error");
        assert_eq!(GatewayError::schema_conflict("x").kind_code(), "schema_conflict");
        assert_eq!(GatewayError::encryption("x").kind_code(), "system_error");
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(GatewayError::validation("x").http_status(), 400);
        assert_eq!(GatewayError::authentication("x").http_status(), 401);
        assert_eq!(GatewayError::authorization("x").http_status(), 403);
        assert_eq!(GatewayError::schema_conflict("x").http_status(), 409);
        assert_eq!(GatewayError::connection("x").http_status(), 503);
        assert_eq!(GatewayError::internal("x").http_status(), 500);
        let limited = GatewayError::RateLimited {
            limit: 100,
            period_secs: 60,
            retry_after_secs: 12,
            scope: RateScope::Ip,
            tier: None,
        };
        assert_eq!(limited.http_status(), 429);
        assert_eq!(limited.kind_code(), "rate_limit_error");
    }

    #[test]
    fn test_server_fault_classification() {
        assert!(GatewayError::connection("down").is_server_fault());
        assert!(!GatewayError::validation("bad dim").is_server_fault());
        assert!(!GatewayError::RateLimited {
            limit: 10,
            period_secs: 60,
            retry_after_secs: 1,
            scope: RateScope::Tenant,
            tier: Some("default".into()),
        }
        .is_server_fault());
    }
}
