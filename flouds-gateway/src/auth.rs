//! Request identity extraction
//!
//! Three headers drive authentication:
//! - `Authorization: Bearer <user>:<secret>` — the gateway principal
//! - `X-Tenant-Code` — tenant context, taking precedence over any body field
//! - `Flouds-VectorDB-Token: <db_user>|<db_secret>` (or `:`-separated) —
//!   per-request backend credentials feeding the pool key

use axum::http::HeaderMap;
use flouds_core::error::{GatewayError, Result};
use flouds_core::types::tenant::TenantCode;
use flouds_security::ClientRecord;

/// Header carrying the per-request backend credential
pub const DB_TOKEN_HEADER: &str = "flouds-vectordb-token";
/// Header carrying the tenant context
pub const TENANT_HEADER: &str = "x-tenant-code";

/// Backend credential parsed from [`DB_TOKEN_HEADER`]
#[derive(Debug, Clone)]
pub struct DbCredentials {
    pub user: String,
    pub secret: String,
}

/// Identity attached to every authenticated request
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub client: ClientRecord,
    /// Tenant from the header; body fields may refine this in handlers
    pub header_tenant: Option<TenantCode>,
    pub db_token: Option<DbCredentials>,
    pub source_ip: String,
}

impl AuthContext {
    /// Resolve the effective tenant for a request
    ///
    /// Header value wins over the body field; with neither, the scope is
    /// global. A client bound to a tenant may only act within it.
    ///
    /// # Errors
    ///
    /// `GatewayError::Validation` for a malformed code,
    /// `GatewayError::Tenant` when the client is bound elsewhere.
    pub fn resolve_tenant(&self, body_tenant: Option<&str>) -> Result<TenantCode> {
        let tenant = match (&self.header_tenant, body_tenant) {
            (Some(header), _) => header.clone(),
            (None, Some(code)) if !code.is_empty() => TenantCode::parse(code)?,
            _ => TenantCode::global(),
        };
        if !self.client.tenant_code.is_empty() && self.client.tenant_code != tenant.as_str() {
            return Err(GatewayError::tenant(format!(
                "client {} is not bound to the requested tenant",
                self.client.username
            )));
        }
        Ok(tenant)
    }

    /// Require a tenant-scoped request (global scope not acceptable)
    ///
    /// # Errors
    ///
    /// `GatewayError::Tenant` when no tenant could be resolved.
    pub fn require_tenant(&self, body_tenant: Option<&str>) -> Result<TenantCode> {
        let tenant = self.resolve_tenant(body_tenant)?;
        if tenant.is_global() {
            return Err(GatewayError::tenant(
                "this operation requires a tenant code (header X-Tenant-Code or body tenant_code)",
            ));
        }
        Ok(tenant)
    }

    /// Require an admin-capable principal
    ///
    /// # Errors
    ///
    /// `GatewayError::Authorization` otherwise.
    pub fn require_admin(&self) -> Result<()> {
        if self.client.is_admin() {
            Ok(())
        } else {
            Err(GatewayError::authorization(format!(
                "client {} lacks the admin action",
                self.client.username
            )))
        }
    }

    /// Require a specific allowed action (admin implies all)
    ///
    /// # Errors
    ///
    /// `GatewayError::Authorization` otherwise.
    pub fn require_action(&self, action: &str) -> Result<()> {
        if self.client.allows(action) {
            Ok(())
        } else {
            Err(GatewayError::authorization(format!(
                "client {} lacks the {action} action",
                self.client.username
            )))
        }
    }

    /// The backend credential, mandatory for data-plane endpoints
    ///
    /// # Errors
    ///
    /// `GatewayError::Authentication` when the header was absent.
    pub fn require_db_token(&self) -> Result<&DbCredentials> {
        self.db_token.as_ref().ok_or_else(|| {
            GatewayError::authentication(
                "missing Flouds-VectorDB-Token header with backend credentials",
            )
        })
    }
}

/// Parse `Authorization: Bearer <user>:<secret>`
///
/// # Errors
///
/// `GatewayError::Authentication` for a missing or malformed header.
pub fn parse_bearer(headers: &HeaderMap) -> Result<(String, String)> {
    let raw = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| GatewayError::authentication("missing Authorization header"))?;
    let token = raw
        .strip_prefix("Bearer ")
        .or_else(|| raw.strip_prefix("bearer "))
        .ok_or_else(|| GatewayError::authentication("Authorization must use the Bearer scheme"))?;
    let (user, secret) = token
        .split_once(':')
        .ok_or_else(|| GatewayError::authentication("bearer credential must be user:secret"))?;
    if user.is_empty() || secret.is_empty() {
        return Err(GatewayError::authentication(
            "bearer credential must be user:secret",
        ));
    }
    Ok((user.to_string(), secret.to_string()))
}

/// Parse the optional tenant header
///
/// # Errors
///
/// `GatewayError::Validation` when the header value is not a valid code.
pub fn parse_tenant_header(headers: &HeaderMap) -> Result<Option<TenantCode>> {
    match headers.get(TENANT_HEADER).and_then(|v| v.to_str().ok()) {
        None => Ok(None),
        Some(code) if code.is_empty() => Ok(None),
        Some(code) => TenantCode::parse(code).map(Some),
    }
}

/// Parse the optional backend credential header
///
/// Accepts `db_user|db_secret` or `db_user:db_secret`.
///
/// # Errors
///
/// `GatewayError::Authentication` when the header is present but malformed.
pub fn parse_db_token(headers: &HeaderMap) -> Result<Option<DbCredentials>> {
    let Some(raw) = headers.get(DB_TOKEN_HEADER).and_then(|v| v.to_str().ok()) else {
        return Ok(None);
    };
    let (user, secret) = raw
        .split_once('|')
        .or_else(|| raw.split_once(':'))
        .ok_or_else(|| {
            GatewayError::authentication(
                "Flouds-VectorDB-Token must be db_user|db_secret or db_user:db_secret",
            )
        })?;
    if user.is_empty() || secret.is_empty() {
        return Err(GatewayError::authentication(
            "Flouds-VectorDB-Token must carry both a user and a secret",
        ));
    }
    Ok(Some(DbCredentials {
        user: user.to_string(),
        secret: secret.to_string(),
    }))
}

/// Best-effort source address: `X-Forwarded-For` first hop, else peer info
#[must_use]
pub fn source_ip(headers: &HeaderMap, peer: Option<std::net::SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use chrono::Utc;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                axum::http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    fn client_bound_to(tenant: &str) -> ClientRecord {
        ClientRecord {
            username: "svc".to_string(),
            fingerprint: "f".repeat(16),
            tenant_code: tenant.to_string(),
            allowed_actions: vec!["read".to_string(), "write".to_string()],
            created_at: Utc::now(),
            last_used_at: None,
        }
    }

    #[test]
    fn test_parse_bearer() {
        let map = headers(&[("authorization", "Bearer alice:s3cret")]);
        let (user, secret) = parse_bearer(&map).unwrap();
        assert_eq!(user, "alice");
        assert_eq!(secret, "s3cret");

        assert!(parse_bearer(&headers(&[])).is_err());
        assert!(parse_bearer(&headers(&[("authorization", "Basic x")])).is_err());
        assert!(parse_bearer(&headers(&[("authorization", "Bearer nosep")])).is_err());
    }

    #[test]
    fn test_parse_db_token_both_separators() {
        let map = headers(&[("flouds-vectordb-token", "dbu|dbpw")]);
        let creds = parse_db_token(&map).unwrap().unwrap();
        assert_eq!(creds.user, "dbu");
        assert_eq!(creds.secret, "dbpw");

        let map = headers(&[("flouds-vectordb-token", "dbu:dbpw")]);
        let creds = parse_db_token(&map).unwrap().unwrap();
        assert_eq!(creds.secret, "dbpw");

        assert!(parse_db_token(&headers(&[])).unwrap().is_none());
        assert!(parse_db_token(&headers(&[("flouds-vectordb-token", "broken")])).is_err());
    }

    #[test]
    fn test_tenant_header_precedence_over_body() {
        let ctx = AuthContext {
            client: client_bound_to(""),
            header_tenant: Some(TenantCode::parse("from-header").unwrap()),
            db_token: None,
            source_ip: "test".to_string(),
        };
        let tenant = ctx.resolve_tenant(Some("from-body")).unwrap();
        assert_eq!(tenant.as_str(), "from-header");
    }

    #[test]
    fn test_body_tenant_used_when_no_header() {
        let ctx = AuthContext {
            client: client_bound_to(""),
            header_tenant: None,
            db_token: None,
            source_ip: "test".to_string(),
        };
        assert_eq!(
            ctx.resolve_tenant(Some("from-body")).unwrap().as_str(),
            "from-body"
        );
        assert!(ctx.resolve_tenant(None).unwrap().is_global());
    }

    #[test]
    fn test_bound_client_cannot_cross_tenants() {
        let ctx = AuthContext {
            client: client_bound_to("acme"),
            header_tenant: None,
            db_token: None,
            source_ip: "test".to_string(),
        };
        assert!(ctx.resolve_tenant(Some("acme")).is_ok());
        let err = ctx.resolve_tenant(Some("rival")).unwrap_err();
        assert!(matches!(err, GatewayError::Tenant { .. }));
    }

    #[test]
    fn test_source_ip_prefers_forwarded_header() {
        let map = headers(&[("x-forwarded-for", "203.0.113.9, 10.0.0.1")]);
        assert_eq!(source_ip(&map, None), "203.0.113.9");
        assert_eq!(source_ip(&headers(&[]), None), "unknown");
    }
}
