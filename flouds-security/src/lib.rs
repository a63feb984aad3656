//! Security layer for the Flouds vector gateway
//!
//! Provides client identity management (creation, validation, fingerprints),
//! secret encryption under a process master key, outbound message redaction,
//! the CORS/trusted-host pattern matcher, and the audit log.

pub mod audit;
pub mod key_manager;
pub mod master_key;
pub mod policy;
pub mod sanitize;

pub use audit::{AuditEvent, AuditLogger};
pub use key_manager::{ClientRecord, KeyManager};
pub use master_key::MasterKey;
pub use policy::PatternList;
pub use sanitize::sanitize;
