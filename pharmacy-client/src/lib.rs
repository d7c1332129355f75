//! Pharmacy Client: session and subscription lifecycle for a multi-tenant
//! pharmacy backend.
//!
//! This crate is the client-side core of a pharmacy management application.
//! It keeps a user signed in against the backend and presents the
//! backend-owned subscription of each pharmacy (tenant).
//!
//! # What does it do?
//!
//! - **Session Manager**: login, logout, persisted sessions, bearer token
//!   injection, one refresh-and-retry on 401, proactive refresh before
//!   expiry, forced logout when the refresh token is refused
//! - **Subscription Controller**: current subscription, history, plans, and
//!   the trial / change plan / cancel / renew mutations, each followed by a
//!   re-fetch of the authoritative record
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────┐
//! │  Application shell / UI   │
//! └────────────┬──────────────┘
//!              │
//! ┌────────────▼──────────────────────────────────────┐
//! │                pharmacy-client                    │
//! │  ┌──────────────────────┐   ┌──────────────────┐  │
//! │  │ SubscriptionController│──►│  SessionManager  │  │
//! │  └──────────────────────┘   │  (tokens, 401,   │  │
//! │                             │   refresh gate)  │  │
//! │  ┌──────────────────────┐   └────────┬─────────┘  │
//! │  │   RefreshScheduler   │────────────┤            │
//! │  └──────────────────────┘   ┌────────▼─────────┐  │
//! │                             │ Transport (HTTP) │  │
//! │                             └────────┬─────────┘  │
//! └──────────────────────────────────────┼────────────┘
//!                                        │ HTTPS + Bearer
//!                               ┌────────▼─────────┐
//!                               │ Pharmacy backend │
//!                               └──────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use pharmacy_client::{PharmacyClient, auth::Role, config::ClientConfig, subscription::PharmacyId};
//!
//! # async fn example() -> pharmacy_client::Result<()> {
//! let config = ClientConfig::from_toml(r#"base_url = "https://api.pharmacy.example""#)?;
//! let client = PharmacyClient::from_config(&config)?;
//!
//! let user = client.session().login("owner@pharmacy.example", "secret").await?;
//! let scheduler = client.start_refresh();
//!
//! if let Some(pharmacy_id) = &user.pharmacy_id {
//!     let view = client.subscriptions().view(pharmacy_id, user.role).await;
//!     println!("{view:?}");
//! }
//!
//! scheduler.stop().await;
//! client.session().logout().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Module Organization
//!
//! - [`auth`]: tokens, session state, persistence, session manager, refresh scheduler
//! - [`subscription`]: models, lifecycle rules, controller, view mapping
//! - [`transport`]: sealed transport trait and the reqwest implementation
//! - [`config`] and [`endpoints`]: TOML configuration
//! - [`reliability`]: retry with backoff for idempotent reads
//! - [`security`]: audit logging
//! - [`error`]: error type and UI feedback classification
//!
//! # Security Considerations
//!
//! - Tokens are zeroized on drop and redacted from `Debug` output
//! - HTTPS is required unless `allow_insecure_http` is set
//! - A refused refresh token ends the session (fail closed)
//! - Audit events go to the `audit` tracing target with e-mails redacted
//!
//! # Error Handling
//!
//! All fallible operations return [`Result<T>`]. Presentation code usually
//! only needs [`ClientError::feedback`]:
//!
//! ```rust
//! use pharmacy_client::{ClientError, error::Feedback};
//!
//! let error = ClientError::SessionExpired;
//! assert_eq!(error.feedback(), Feedback::SignInRequired);
//! ```

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![allow(
    clippy::multiple_crate_versions,
    reason = "transitive dependencies from reqwest"
)]

pub mod api;
pub mod auth;
pub mod client;
pub mod config;
pub mod endpoints;
pub mod error;
pub mod reliability;
pub mod security;
pub mod subscription;
pub mod transport;

pub use client::PharmacyClient;
pub use error::{ClientError, Result};
