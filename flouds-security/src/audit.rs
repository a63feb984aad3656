//! Audit logging for security events

use crate::sanitize::sanitize;
use chrono::{DateTime, Utc};
use flouds_core::error::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;

/// Audit event types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AuditEvent {
    /// Client record created
    ClientCreated {
        username: String,
        fingerprint: String,
        tenant_code: String,
    },

    /// Authentication or authorization denied
    AccessDenied {
        principal: String,
        operation: String,
        reason: String,
    },

    /// Rate limit exceeded
    RateLimitExceeded {
        principal: String,
        limit_type: String,
        limit: u32,
    },

    /// Tenant resources provisioned
    TenantProvisioned {
        tenant_code: String,
        provisioned_by: String,
        database_created: bool,
        user_created: bool,
    },

    /// Tenant user password reset
    PasswordReset {
        tenant_code: String,
        reset_by: String,
    },

    /// Configuration entry changed
    ConfigurationChanged {
        key: String,
        tenant_code: String,
        changed_by: String,
    },
}

/// Audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique entry ID
    pub id: uuid::Uuid,

    /// Timestamp
    pub timestamp: DateTime<Utc>,

    /// Event
    pub event: AuditEvent,
}

impl AuditEntry {
    /// Create a new audit entry
    #[must_use]
    pub fn new(event: AuditEvent) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            timestamp: Utc::now(),
            event,
        }
    }
}

/// Audit logger draining entries to the `audit` tracing target
///
/// Free-text fields pass the sanitizer before they reach the log stream;
/// the append-only log must never carry credentials or addresses.
pub struct AuditLogger {
    sender: mpsc::UnboundedSender<AuditEntry>,
}

impl AuditLogger {
    /// Create a new audit logger; must be called inside a tokio runtime
    #[must_use]
    pub fn new() -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<AuditEntry>();

        tokio::spawn(async move {
            while let Some(entry) = receiver.recv().await {
                match &entry.event {
                    AuditEvent::ClientCreated {
                        username,
                        fingerprint,
                        tenant_code,
                    } => {
                        info!(
                            target: "audit",
                            event_type = "client_created",
                            entry_id = %entry.id,
                            username = %username,
                            fingerprint = %fingerprint,
                            tenant_code = %tenant_code,
                            "Client created"
                        );
                    }
                    AuditEvent::AccessDenied {
                        principal,
                        operation,
                        reason,
                    } => {
                        info!(
                            target: "audit",
                            event_type = "access_denied",
                            entry_id = %entry.id,
                            principal = %principal,
                            operation = %operation,
                            reason = %sanitize(reason),
                            "Access denied"
                        );
                    }
                    AuditEvent::RateLimitExceeded {
                        principal,
                        limit_type,
                        limit,
                    } => {
                        info!(
                            target: "audit",
                            event_type = "rate_limit_exceeded",
                            entry_id = %entry.id,
                            principal = %principal,
                            limit_type = %limit_type,
                            limit = limit,
                            "Rate limit exceeded"
                        );
                    }
                    AuditEvent::TenantProvisioned {
                        tenant_code,
                        provisioned_by,
                        database_created,
                        user_created,
                    } => {
                        info!(
                            target: "audit",
                            event_type = "tenant_provisioned",
                            entry_id = %entry.id,
                            tenant_code = %tenant_code,
                            provisioned_by = %provisioned_by,
                            database_created = database_created,
                            user_created = user_created,
                            "Tenant provisioned"
                        );
                    }
                    AuditEvent::PasswordReset {
                        tenant_code,
                        reset_by,
                    } => {
                        info!(
                            target: "audit",
                            event_type = "password_reset",
                            entry_id = %entry.id,
                            tenant_code = %tenant_code,
                            reset_by = %reset_by,
                            "Tenant user password reset"
                        );
                    }
                    AuditEvent::ConfigurationChanged {
                        key,
                        tenant_code,
                        changed_by,
                    } => {
                        info!(
                            target: "audit",
                            event_type = "configuration_changed",
                            entry_id = %entry.id,
                            key = %key,
                            tenant_code = %tenant_code,
                            changed_by = %changed_by,
                            "Configuration changed"
                        );
                    }
                }
            }
        });

        Self { sender }
    }

    /// Log an audit event
    ///
    /// # Errors
    ///
    /// Returns an internal error when the drain task has terminated.
    pub fn log(&self, event: AuditEvent) -> Result<()> {
        self.sender
            .send(AuditEntry::new(event))
            .map_err(|_| flouds_core::GatewayError::internal("audit channel closed"))
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_audit_logging_accepts_events() {
        let logger = AuditLogger::new();

        logger
            .log(AuditEvent::ClientCreated {
                username: "svc".to_string(),
                fingerprint: "abcd1234abcd1234".to_string(),
                tenant_code: "acme".to_string(),
            })
            .unwrap();

        logger
            .log(AuditEvent::AccessDenied {
                principal: "svc".to_string(),
                operation: "insert".to_string(),
                reason: "password=oops leaked in reason".to_string(),
            })
            .unwrap();

        // Give the drain task a tick
        tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
    }
}
