//! Tenant provisioning state machine
//!
//! `set_vector_store` walks database → role → user → role grant for a
//! tenant, creating whatever is absent. Every step runs through the
//! transaction manager, so a failure midway drops the resources created by
//! the earlier steps instead of leaving a half-provisioned tenant. The
//! generated user password conforms to the password policy and is returned
//! exactly once.

use flouds_core::error::{GatewayError, Result};
use flouds_core::traits::backend::VectorBackend;
use flouds_core::types::tenant::TenantCode;
use flouds_storage::Transaction;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

/// Generated passwords: length and character classes
const PASSWORD_LEN: usize = 20;
const LOWER: &[u8] = b"abcdefghijkmnopqrstuvwxyz";
const UPPER: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ";
const DIGITS: &[u8] = b"23456789";
const SYMBOLS: &[u8] = b"!@#$%^&*-_=+";

/// Provisioning summary; `password` is present only when the user was created
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionSummary {
    pub database_created: bool,
    pub user_created: bool,
    pub permissions_granted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Tenant lifecycle operations against an admin-bound backend client
#[derive(Debug, Default)]
pub struct Provisioner;

impl Provisioner {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Ensure database, role, user and role grant exist for `tenant`
    ///
    /// Idempotent: resources that already exist are left alone and reported
    /// as not-created; a repeat call returns the same username with no
    /// password.
    ///
    /// # Errors
    ///
    /// Backend failures propagate after the rollback chain has run.
    pub async fn set_vector_store(
        &self,
        client: Arc<dyn VectorBackend>,
        tenant: &TenantCode,
    ) -> Result<ProvisionSummary> {
        if tenant.is_global() {
            return Err(GatewayError::tenant(
                "provisioning requires a concrete tenant code",
            ));
        }
        let database = tenant.database_name();
        let role = tenant.role_name();
        let username = tenant.user_name();

        let database_exists = client.list_databases().await?.contains(&database);
        let role_exists = client.has_role(&role).await?;
        let user_exists = client.has_user(&username).await?;
        let password = if user_exists {
            None
        } else {
            Some(generate_password())
        };

        let mut txn = Transaction::begin(format!("set_vector_store:{tenant}"));

        if !database_exists {
            let create_client = client.clone();
            let drop_client = client.clone();
            let create_db = database.clone();
            let drop_db = database.clone();
            txn.add(
                "create_database",
                move || async move {
                    create_client.create_database(&create_db).await?;
                    Ok(json!(true))
                },
                move |_| async move { drop_client.drop_database(&drop_db).await },
            );
        }
        if !role_exists {
            let create_client = client.clone();
            let drop_client = client.clone();
            let create_role = role.clone();
            let drop_role = role.clone();
            txn.add(
                "create_role",
                move || async move {
                    create_client.create_role(&create_role).await?;
                    Ok(json!(true))
                },
                move |_| async move { drop_client.drop_role(&drop_role).await },
            );
        }
        if !user_exists {
            let create_client = client.clone();
            let drop_client = client.clone();
            let create_user = username.clone();
            let drop_user = username.clone();
            let user_password = password.clone().expect("password generated for new user");
            txn.add(
                "create_user",
                move || async move {
                    create_client.create_user(&create_user, &user_password).await?;
                    Ok(json!(true))
                },
                move |_| async move { drop_client.drop_user(&drop_user).await },
            );
        }
        {
            let grant_client = client.clone();
            let revoke_client = client.clone();
            let grant_user = username.clone();
            let revoke_user = username.clone();
            let grant_role = role.clone();
            let revoke_role = role.clone();
            txn.add(
                "grant_role",
                move || async move {
                    grant_client.grant_role(&grant_user, &grant_role).await?;
                    Ok(json!(true))
                },
                move |_| async move { revoke_client.revoke_role(&revoke_user, &revoke_role).await },
            );
        }

        txn.execute().await?;

        info!(
            tenant = %tenant,
            database_created = !database_exists,
            user_created = !user_exists,
            "Tenant vector store provisioned"
        );
        Ok(ProvisionSummary {
            database_created: !database_exists,
            user_created: !user_exists,
            permissions_granted: true,
            username: Some(username),
            password,
        })
    }

    /// Set a fresh policy-conforming password for the tenant user
    ///
    /// The new password is returned exactly once. The reset is a single
    /// backend operation: when it fails nothing has changed, so the previous
    /// credential remains in effect.
    ///
    /// # Errors
    ///
    /// `GatewayError::Operation` when the tenant user does not exist.
    pub async fn reset_password(
        &self,
        client: Arc<dyn VectorBackend>,
        tenant: &TenantCode,
    ) -> Result<String> {
        if tenant.is_global() {
            return Err(GatewayError::tenant(
                "password reset requires a concrete tenant code",
            ));
        }
        let username = tenant.user_name();
        if !client.has_user(&username).await? {
            return Err(GatewayError::operation(format!(
                "tenant user {username} does not exist; provision the tenant first"
            )));
        }
        let password = generate_password();
        debug_assert!(validate_password(&password).is_ok());
        client.update_password(&username, &password).await?;
        info!(tenant = %tenant, "Tenant user password reset");
        Ok(password)
    }
}

/// Generate a password satisfying [`validate_password`]
#[must_use]
pub fn generate_password() -> String {
    let mut rng = rand::thread_rng();
    let mut chars: Vec<u8> = Vec::with_capacity(PASSWORD_LEN);
    // One guaranteed character per class, the rest drawn from all classes
    chars.push(LOWER[rng.gen_range(0..LOWER.len())]);
    chars.push(UPPER[rng.gen_range(0..UPPER.len())]);
    chars.push(DIGITS[rng.gen_range(0..DIGITS.len())]);
    chars.push(SYMBOLS[rng.gen_range(0..SYMBOLS.len())]);
    let all: Vec<u8> = [LOWER, UPPER, DIGITS, SYMBOLS].concat();
    for _ in chars.len()..PASSWORD_LEN {
        chars.push(all[rng.gen_range(0..all.len())]);
    }
    chars.shuffle(&mut rng);
    String::from_utf8(chars).expect("password alphabet is ASCII")
}

/// Password policy: at least 12 chars with lower, upper, digit and symbol
///
/// # Errors
///
/// Returns `GatewayError::Validation` naming the missing property.
pub fn validate_password(password: &str) -> Result<()> {
    if password.len() < 12 {
        return Err(GatewayError::validation(
            "password must be at least 12 characters",
        ));
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        return Err(GatewayError::validation(
            "password must contain a lowercase letter",
        ));
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(GatewayError::validation(
            "password must contain an uppercase letter",
        ));
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(GatewayError::validation("password must contain a digit"));
    }
    if password.chars().all(char::is_alphanumeric) {
        return Err(GatewayError::validation("password must contain a symbol"));
    }
    Ok(())
}
