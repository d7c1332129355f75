//! Error types for the pharmacy client.
//!
//! Every fallible operation in this crate returns [`Result`], whose error type
//! is [`ClientError`]. The variants follow the failure taxonomy the UI cares
//! about:
//!
//! - **Credential errors** ([`ClientError::InvalidCredentials`]): shown inline on the login
//!   form, session untouched
//! - **Session errors** ([`ClientError::NotAuthenticated`], [`ClientError::Unauthorized`],
//!   [`ClientError::SessionExpired`]): the user has to sign in again
//! - **Authorization errors** ([`ClientError::AccessDenied`]): the session is valid but the
//!   role or tenant may not see the resource
//! - **Network and backend errors** ([`ClientError::HttpError`],
//!   [`ClientError::TransportError`], [`ClientError::BackendError`]): generic, usually
//!   retryable
//!
//! [`ClientError::feedback`] collapses any error into the [`Feedback`] shape
//! presentation code renders.
//!
//! # Examples
//!
//! ```
//! use pharmacy_client::error::{ClientError, Feedback};
//!
//! let err = ClientError::AccessDenied("subscription belongs to another pharmacy".to_owned());
//! assert_eq!(err.feedback(), Feedback::AccessDenied);
//! ```

use thiserror::Error;

/// Result type alias for client operations.
///
/// All fallible functions in this crate return this type.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur in the pharmacy client.
///
/// # Error Recovery
///
/// - **Transient errors** ([`HttpError`](Self::HttpError),
///   [`TransportError`](Self::TransportError), 5xx [`BackendError`](Self::BackendError)):
///   retry later, session state is untouched
/// - **Session errors** ([`SessionExpired`](Self::SessionExpired),
///   [`NotAuthenticated`](Self::NotAuthenticated)): redirect to login
/// - **Validation errors** (`Invalid*Id`, [`ConfigError`](Self::ConfigError)): fix input
#[must_use = "errors should be handled, propagated, or explicitly panicked"]
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP request failed before a response was received.
    ///
    /// Wraps [`reqwest::Error`]. Common causes are timeouts, refused
    /// connections, DNS failures and TLS errors.
    ///
    /// # Recovery
    ///
    /// Retry with exponential backoff. Tokens are kept.
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Transport-level failure that is not a [`reqwest::Error`].
    ///
    /// Raised for rejected request paths or header values, and for network
    /// failures reported by non-reqwest transports.
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Login was rejected by the backend (HTTP 400 or 401 on login).
    #[error("Invalid email or password")]
    InvalidCredentials,

    /// No session is available to authenticate the request.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// The backend answered 401 and the single permitted refresh did not help.
    ///
    /// The session is left in place; the next proactive refresh may still
    /// recover it.
    #[error("Request was not authorized")]
    Unauthorized,

    /// The refresh token was rejected and the session has been cleared.
    ///
    /// # Recovery
    ///
    /// Redirect the user to the login screen.
    #[error("Session expired, please sign in again")]
    SessionExpired,

    /// The backend answered 403.
    ///
    /// Distinct from "not found": the resource may exist but the caller's
    /// role or tenant is not allowed to see it.
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// The backend answered 404 for a resource that must exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The pharmacy has already consumed its free trial.
    #[error("The free trial has already been used for this pharmacy")]
    TrialAlreadyUsed,

    /// A subscription mutation for the same pharmacy is still in flight.
    ///
    /// Nothing was sent to the backend.
    #[error("Operation already in progress for pharmacy {0}")]
    OperationInProgress(String),

    /// A subscription mutation was accepted, but re-reading the subscription
    /// afterwards failed.
    ///
    /// # Recovery
    ///
    /// Do not resubmit the mutation; reload the subscription instead.
    #[error("Change applied, but the subscription could not be reloaded: {0}")]
    RefetchFailed(#[source] Box<ClientError>),

    /// The backend rejected the request payload (HTTP 400 or 422).
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The backend answered with an unexpected status code.
    #[error("Backend returned status {status}: {message}")]
    BackendError {
        /// HTTP status code.
        status: u16,
        /// Message extracted from the response body, if any.
        message: String,
    },

    /// The backend response could not be decoded.
    #[error("Invalid backend response: {0}")]
    InvalidResponse(String),

    /// An access token could not be decoded.
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Invalid pharmacy ID.
    ///
    /// Pharmacy IDs must be non-empty, at most 64 characters, and contain only
    /// ASCII alphanumerics, hyphens and underscores.
    ///
    /// # Examples
    ///
    /// ```
    /// use pharmacy_client::error::ClientError;
    ///
    /// let err = ClientError::InvalidPharmacyId("pharmacy id cannot be empty".to_string());
    /// assert!(err.to_string().contains("Invalid pharmacy ID"));
    /// ```
    #[error("Invalid pharmacy ID: {0}")]
    InvalidPharmacyId(String),

    /// Invalid plan ID. Same rules as [`InvalidPharmacyId`](Self::InvalidPharmacyId).
    #[error("Invalid plan ID: {0}")]
    InvalidPlanId(String),

    /// Invalid subscription ID. Same rules as
    /// [`InvalidPharmacyId`](Self::InvalidPharmacyId).
    #[error("Invalid subscription ID: {0}")]
    InvalidSubscriptionId(String),

    /// Invalid caller input (empty email, empty password).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Session persistence failed.
    ///
    /// Persistence failures are logged and never abort a session operation;
    /// this variant is surfaced only by the [`SessionStore`](crate::auth::SessionStore)
    /// adapters themselves.
    #[error("Session storage error: {0}")]
    StorageError(String),

    /// Configuration could not be loaded or failed validation.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// User-facing classification of an error.
///
/// Presentation code matches on this instead of on [`ClientError`] so that
/// every failure lands in one of a handful of UI treatments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feedback {
    /// Inline "wrong email or password" message; nothing else changes.
    InvalidCredentials,
    /// The user must sign in again.
    SignInRequired,
    /// The user is signed in but may not see this resource.
    AccessDenied,
    /// Generic failure message.
    Failure {
        /// Human-readable summary.
        message: String,
        /// Whether offering a "try again" action makes sense.
        retryable: bool,
    },
}

impl ClientError {
    /// Classifies this error into the UI feedback it should produce.
    #[must_use]
    pub fn feedback(&self) -> Feedback {
        match self {
            Self::InvalidCredentials => Feedback::InvalidCredentials,
            Self::NotAuthenticated | Self::Unauthorized | Self::SessionExpired => {
                Feedback::SignInRequired
            }
            Self::AccessDenied(_) => Feedback::AccessDenied,
            other => Feedback::Failure {
                message: other.to_string(),
                retryable: crate::reliability::is_retryable(other),
            },
        }
    }

    /// Returns the HTTP status code carried by this error, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpError(e) => e.status().map(|s| s.as_u16()),
            Self::BackendError { status, .. } => Some(*status),
            Self::Unauthorized | Self::SessionExpired => Some(401),
            Self::AccessDenied(_) => Some(403),
            Self::NotFound(_) => Some(404),
            _ => None,
        }
    }
}
