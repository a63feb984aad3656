//! Tenant identity and derived object names
//!
//! A tenant is an opaque code matching `^[A-Za-z0-9_-]{1,256}$`. It is never
//! persisted as its own record; it materialises as a logical database name,
//! a role name, and a user name on the vector backend.

use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum accepted tenant code length
pub const MAX_TENANT_CODE_LEN: usize = 256;

/// Validated tenant code
///
/// The empty code is the global scope: admin principals and global
/// configuration entries use it. All other codes must match
/// `[A-Za-z0-9_-]{1,256}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantCode(String);

impl TenantCode {
    /// Parse and validate a tenant code
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Validation` when the code is empty, too long,
    /// or contains characters outside `[A-Za-z0-9_-]`.
    pub fn parse(code: &str) -> Result<Self> {
        if code.is_empty() {
            return Err(GatewayError::validation("tenant code must not be empty"));
        }
        if code.len() > MAX_TENANT_CODE_LEN {
            return Err(GatewayError::validation(format!(
                "tenant code exceeds {MAX_TENANT_CODE_LEN} characters"
            )));
        }
        if !code
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
        {
            return Err(GatewayError::validation(
                "tenant code may only contain letters, digits, '_' and '-'",
            ));
        }
        Ok(Self(code.to_string()))
    }

    /// The global (tenant-less) scope, persisted as the empty string
    #[must_use]
    pub const fn global() -> Self {
        Self(String::new())
    }

    #[must_use]
    pub fn is_global(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Logical database name on the vector backend
    ///
    /// Backend database names reject '-', so dashes are folded to '_'.
    #[must_use]
    pub fn database_name(&self) -> String {
        format!("flouds_{}", self.0.replace('-', "_"))
    }

    /// Role owning all collections of this tenant
    #[must_use]
    pub fn role_name(&self) -> String {
        format!("flouds_{}_role", self.0)
    }

    /// Data-plane user bound to this tenant
    #[must_use]
    pub fn user_name(&self) -> String {
        format!("{}_user", self.0)
    }

    /// Physical collection name for a `(tenant, model)` pair
    #[must_use]
    pub fn collection_name(&self, model: &str) -> String {
        format!("vector_store_schema_for_{}_{}", self.0, model)
    }
}

impl fmt::Display for TenantCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("<global>")
        } else {
            f.write_str(&self.0)
        }
    }
}

impl TryFrom<String> for TenantCode {
    type Error = GatewayError;

    fn try_from(value: String) -> Result<Self> {
        if value.is_empty() {
            Ok(Self::global())
        } else {
            Self::parse(&value)
        }
    }
}

impl From<TenantCode> for String {
    fn from(code: TenantCode) -> Self {
        code.0
    }
}
