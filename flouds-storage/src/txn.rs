//! Compound transaction manager
//!
//! Provisioning and ingestion flows span multiple backend resources. A
//! [`Transaction`] queues `(forward, rollback)` pairs, executes forwards
//! strictly in order, and on the first failure runs the rollbacks of all
//! previously-successful operations in reverse order. Rollback failures are
//! swallowed operationally (every remaining rollback still runs) but are
//! aggregated into the propagated error and the log.
//!
//! Non-reversible operations (flush) register a no-op rollback; the manager
//! does not pretend to undo them. A transaction dropped without `execute`
//! is a cancelled no-op.

use flouds_core::error::{GatewayError, Result};
use futures::future::BoxFuture;
use serde_json::Value;
use tracing::{debug, error, warn};

type ForwardFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<Value>> + Send>;
type RollbackFn = Box<dyn FnOnce(Value) -> BoxFuture<'static, Result<()>> + Send>;

struct TxnOp {
    name: String,
    forward: ForwardFn,
    rollback: RollbackFn,
}

/// Ordered operation log with reverse rollback on failure
pub struct Transaction {
    name: String,
    ops: Vec<TxnOp>,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("name", &self.name)
            .field("ops", &self.ops.len())
            .finish()
    }
}

impl Transaction {
    /// Begin a named transaction
    #[must_use]
    pub fn begin(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ops: Vec::new(),
        }
    }

    /// Queue an operation
    ///
    /// The rollback receives the forward's result value; it only ever runs
    /// for forwards that succeeded.
    pub fn add<F, FFut, R, RFut>(&mut self, name: impl Into<String>, forward: F, rollback: R)
    where
        F: FnOnce() -> FFut + Send + 'static,
        FFut: std::future::Future<Output = Result<Value>> + Send + 'static,
        R: FnOnce(Value) -> RFut + Send + 'static,
        RFut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        self.ops.push(TxnOp {
            name: name.into(),
            forward: Box::new(move || Box::pin(forward())),
            rollback: Box::new(move |value| Box::pin(rollback(value))),
        });
    }

    /// Queue an operation whose effect cannot be undone
    pub fn add_irreversible<F, FFut>(&mut self, name: impl Into<String>, forward: F)
    where
        F: FnOnce() -> FFut + Send + 'static,
        FFut: std::future::Future<Output = Result<Value>> + Send + 'static,
    {
        self.add(name, forward, |_| async { Ok(()) });
    }

    /// Number of queued operations
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Run all forwards in order; roll back in reverse on the first failure
    ///
    /// The body runs on a detached task: cancelling the caller (client
    /// disconnect) cannot abandon a partially-applied transaction before
    /// its rollback chain has finished.
    ///
    /// # Errors
    ///
    /// Propagates the original failure. When rollbacks fail too, their
    /// messages are appended to the propagated error.
    pub async fn execute(self) -> Result<Vec<Value>> {
        match tokio::spawn(self.run()).await {
            Ok(outcome) => outcome,
            Err(join_err) => Err(GatewayError::internal(format!(
                "transaction task failed: {join_err}"
            ))),
        }
    }

    async fn run(self) -> Result<Vec<Value>> {
        let txn_name = self.name;
        debug!(txn = %txn_name, ops = self.ops.len(), "Executing transaction");

        let mut completed: Vec<(String, Value, RollbackFn)> = Vec::new();
        let mut failure: Option<(String, GatewayError)> = None;

        for op in self.ops {
            match (op.forward)().await {
                Ok(value) => {
                    completed.push((op.name, value, op.rollback));
                }
                Err(err) => {
                    failure = Some((op.name, err));
                    break;
                }
            }
        }

        let Some((failed_op, cause)) = failure else {
            debug!(txn = %txn_name, "Transaction committed");
            return Ok(completed.into_iter().map(|(_, value, _)| value).collect());
        };

        warn!(
            txn = %txn_name,
            failed_op = %failed_op,
            completed = completed.len(),
            "Transaction failed, rolling back in reverse order"
        );

        let mut rollback_failures: Vec<String> = Vec::new();
        for (op_name, value, rollback) in completed.into_iter().rev() {
            if let Err(rollback_err) = rollback(value).await {
                error!(
                    txn = %txn_name,
                    op = %op_name,
                    error = %rollback_err,
                    "Rollback step failed"
                );
                rollback_failures.push(format!("{op_name}: {rollback_err}"));
            }
        }

        if rollback_failures.is_empty() {
            Err(cause)
        } else {
            Err(augment(cause, &rollback_failures))
        }
    }
}

/// Append rollback failure details without losing the original error kind
fn augment(cause: GatewayError, rollback_failures: &[String]) -> GatewayError {
    let suffix = format!("; rollback failures: [{}]", rollback_failures.join("; "));
    match cause {
        GatewayError::Validation { message } => GatewayError::Validation {
            message: message + &suffix,
        },
        GatewayError::Authentication { message } => GatewayError::Authentication {
            message: message + &suffix,
        },
        GatewayError::Authorization { message } => GatewayError::Authorization {
            message: message + &suffix,
        },
        GatewayError::Tenant { message } => GatewayError::Tenant {
            message: message + &suffix,
        },
        GatewayError::Connection { message } => GatewayError::Connection {
            message: message + &suffix,
        },
        GatewayError::Operation { message } => GatewayError::Operation {
            message: message + &suffix,
        },
        GatewayError::SchemaConflict { message } => GatewayError::SchemaConflict {
            message: message + &suffix,
        },
        GatewayError::Configuration { message } => GatewayError::Configuration {
            message: message + &suffix,
        },
        GatewayError::Encryption { message } => GatewayError::Encryption {
            message: message + &suffix,
        },
        GatewayError::Internal { message } => GatewayError::Internal {
            message: message + &suffix,
        },
        limited @ GatewayError::RateLimited { .. } => limited,
    }
}
