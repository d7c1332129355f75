//! Security controls for the pharmacy client.
//!
//! # Audit Logging
//!
//! The audit module provides structured logging for security-relevant events
//! with automatic redaction of e-mail addresses and credentials:
//!
//! ```rust
//! use pharmacy_client::security::audit::{AuditEvent, AuditEventType};
//! use uuid::Uuid;
//!
//! let event = AuditEvent::new(AuditEventType::LoginSucceeded, "u-42", Uuid::new_v4())
//!     .with_email("owner@pharmacy.example");
//!
//! pharmacy_client::security::audit::audit_log(&event);
//! ```
//!
//! Or use the convenience macro:
//!
//! ```rust
//! use pharmacy_client::{audit, security::audit::AuditEventType};
//! use uuid::Uuid;
//!
//! audit!(
//!     AuditEventType::SubscriptionCanceled,
//!     "u-42",
//!     Uuid::new_v4(),
//!     with_pharmacy_id("ph-1")
//! );
//! ```
//!
//! # Security Considerations
//!
//! - Audit logs use a separate tracing target for easy filtering
//! - Tokens are held in zeroize-on-drop wrappers and never logged
//! - Request correlation IDs link audit entries to transport spans

pub mod audit;

pub use audit::{
    AuditDetails, AuditEvent, AuditEventType, audit_log, redact_credentials, redact_email,
};
