//! Audit logging for security-relevant session and subscription events.
//!
//! Events are emitted on the `audit` tracing target so they can be routed to
//! a separate sink. Identifiers that could identify a person are redacted
//! before they reach the log.

use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Types of auditable events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// Credentials accepted.
    LoginSucceeded,
    /// Credentials rejected.
    LoginFailed,
    /// Access token exchanged for a new one.
    TokenRefreshed,
    /// The refresh token was rejected by the backend.
    RefreshRejected,
    /// User-initiated logout.
    LoggedOut,
    /// Session terminated because it could not be kept alive.
    SessionExpired,
    /// The backend refused a request with 403.
    AccessDenied,
    /// Free trial started for a pharmacy.
    TrialStarted,
    /// Subscription plan changed.
    PlanChanged,
    /// Subscription canceled.
    SubscriptionCanceled,
    /// Subscription renewed.
    SubscriptionRenewed,
}

/// Details for an audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuditDetails {
    /// Redacted e-mail address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Tenant the event concerns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pharmacy_id: Option<String>,
    /// Plan involved in a subscription event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
    /// Subscription involved in a subscription event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
    /// Error message, with credentials redacted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Duration of the operation in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Audit log entry.
///
/// # Examples
///
/// ```
/// use pharmacy_client::security::audit::{AuditEvent, AuditEventType, audit_log};
/// use uuid::Uuid;
///
/// let event = AuditEvent::new(AuditEventType::PlanChanged, "u-42", Uuid::new_v4())
///     .with_pharmacy_id("ph-1")
///     .with_plan_id("premium");
///
/// audit_log(&event);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// When the event occurred.
    pub timestamp: SystemTime,
    /// What happened.
    pub event_type: AuditEventType,
    /// User id, or `anonymous` before login.
    pub actor: String,
    /// Request correlation id.
    pub request_id: Uuid,
    /// Contextual details.
    pub details: AuditDetails,
}

impl AuditEvent {
    /// Creates a new audit event.
    #[must_use]
    #[allow(
        clippy::impl_trait_in_params,
        reason = "impl Into<String> is idiomatic for builder methods"
    )]
    pub fn new(event_type: AuditEventType, actor: impl Into<String>, request_id: Uuid) -> Self {
        Self {
            timestamp: SystemTime::now(),
            event_type,
            actor: actor.into(),
            request_id,
            details: AuditDetails::default(),
        }
    }

    /// Adds an e-mail address, redacted.
    #[must_use]
    pub fn with_email(mut self, email: &str) -> Self {
        self.details.email = Some(redact_email(email));
        self
    }

    /// Adds the pharmacy id.
    #[must_use]
    #[allow(
        clippy::impl_trait_in_params,
        reason = "impl Into<String> is idiomatic for builder methods"
    )]
    pub fn with_pharmacy_id(mut self, id: impl Into<String>) -> Self {
        self.details.pharmacy_id = Some(id.into());
        self
    }

    /// Adds the plan id.
    #[must_use]
    #[allow(
        clippy::impl_trait_in_params,
        reason = "impl Into<String> is idiomatic for builder methods"
    )]
    pub fn with_plan_id(mut self, id: impl Into<String>) -> Self {
        self.details.plan_id = Some(id.into());
        self
    }

    /// Adds the subscription id.
    #[must_use]
    #[allow(
        clippy::impl_trait_in_params,
        reason = "impl Into<String> is idiomatic for builder methods"
    )]
    pub fn with_subscription_id(mut self, id: impl Into<String>) -> Self {
        self.details.subscription_id = Some(id.into());
        self
    }

    /// Adds an error message. Credentials in the message are redacted.
    #[must_use]
    #[allow(
        clippy::impl_trait_in_params,
        reason = "impl Into<String> is idiomatic for builder methods"
    )]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.details.error = Some(redact_credentials(&error.into()));
        self
    }

    /// Adds duration.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        reason = "duration in ms fits u64 for practical values"
    )]
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.details.duration_ms = Some(duration.as_millis() as u64);
        self
    }
}

/// Logs an audit event to tracing with target "audit".
pub fn audit_log(event: &AuditEvent) {
    tracing::info!(
        target: "audit",
        timestamp = ?event.timestamp,
        event_type = ?event.event_type,
        actor = %event.actor,
        request_id = %event.request_id,
        details = ?event.details,
        "AUDIT"
    );
}

/// Redacts an e-mail address to its first character and domain.
///
/// # Examples
///
/// ```
/// use pharmacy_client::security::audit::redact_email;
///
/// assert_eq!(redact_email("amina@example.com"), "a****@example.com");
/// assert_eq!(redact_email("not-an-email"), "[REDACTED]");
/// ```
#[must_use]
pub fn redact_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {
            let first: String = local.chars().take(1).collect();
            format!("{first}****@{domain}")
        }
        _ => "[REDACTED]".to_owned(),
    }
}

/// Redacts bearer credentials and JWTs from free text.
///
/// Replaces the word after `Bearer` and any word that looks like a JWT
/// (three dot-separated segments starting with `eyJ`).
///
/// # Examples
///
/// ```
/// use pharmacy_client::security::audit::redact_credentials;
///
/// let msg = "rejected Authorization: Bearer abc.def.ghi for user";
/// assert_eq!(redact_credentials(msg), "rejected Authorization: Bearer [REDACTED] for user");
/// ```
#[must_use]
pub fn redact_credentials(input: &str) -> String {
    let mut redact_next = false;
    let words: Vec<String> = input
        .split(' ')
        .map(|word| {
            let redacted = if redact_next && !word.is_empty() {
                "[REDACTED]".to_owned()
            } else if looks_like_jwt(word) {
                "[REDACTED_JWT]".to_owned()
            } else {
                word.to_owned()
            };
            redact_next = word.eq_ignore_ascii_case("bearer");
            redacted
        })
        .collect();
    words.join(" ")
}

fn looks_like_jwt(word: &str) -> bool {
    let word = word.trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '-' && c != '_');
    word.starts_with("eyJ")
        && word.split('.').count() == 3
        && word.split('.').all(|segment| {
            !segment.is_empty()
                && segment.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        })
}

/// Convenience macro for audit logging.
///
/// # Examples
///
/// ```
/// use pharmacy_client::{audit, security::audit::AuditEventType};
/// use uuid::Uuid;
///
/// audit!(AuditEventType::LoggedOut, "u-42", Uuid::new_v4());
///
/// audit!(
///     AuditEventType::LoginFailed,
///     "anonymous",
///     Uuid::new_v4(),
///     with_email("amina@example.com"),
///     with_error("invalid credentials")
/// );
/// ```
#[macro_export]
macro_rules! audit {
    ($event_type:expr, $actor:expr, $request_id:expr) => {
        $crate::security::audit::audit_log(
            &$crate::security::audit::AuditEvent::new($event_type, $actor, $request_id)
        )
    };
    ($event_type:expr, $actor:expr, $request_id:expr, $($method:ident($arg:expr)),+ $(,)?) => {
        $crate::security::audit::audit_log(
            &$crate::security::audit::AuditEvent::new($event_type, $actor, $request_id)
                $(.$method($arg))+
        )
    };
}

#[cfg(test)]
#[allow(
    clippy::str_to_string,
    reason = "test code uses this pattern for readability"
)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_email() {
        assert_eq!(redact_email("amina@example.com"), "a****@example.com");
        assert_eq!(redact_email("x@y.io"), "x****@y.io");
        assert_eq!(redact_email("@example.com"), "[REDACTED]");
        assert_eq!(redact_email("nobody"), "[REDACTED]");
        assert_eq!(redact_email(""), "[REDACTED]");
    }

    #[test]
    fn test_redact_bearer() {
        let result = redact_credentials("header was Bearer s3cr3t-value");
        assert_eq!(result, "header was Bearer [REDACTED]");
    }

    #[test]
    fn test_redact_jwt() {
        let jwt = "eyJhbGciOiJIUzI1NiJ9.eyJleHAiOjF9.c2ln";
        let result = redact_credentials(&format!("token {jwt}, expired"));
        assert!(!result.contains(jwt));
        assert!(result.contains("[REDACTED_JWT]"));
        assert!(result.ends_with("expired"));
    }

    #[test]
    fn test_redact_preserves_safe_text() {
        let input = "Backend returned status 503: maintenance until 2024-01-15";
        assert_eq!(redact_credentials(input), input);
    }

    #[test]
    fn test_audit_event_builder() {
        let request_id = Uuid::new_v4();
        let event = AuditEvent::new(AuditEventType::PlanChanged, "u-1", request_id)
            .with_pharmacy_id("ph-1")
            .with_plan_id("premium")
            .with_subscription_id("sub-9")
            .with_email("owner@pharmacy.example")
            .with_duration(Duration::from_millis(1500));

        assert_eq!(event.actor, "u-1");
        assert_eq!(event.request_id, request_id);
        assert_eq!(event.details.pharmacy_id.as_deref(), Some("ph-1"));
        assert_eq!(event.details.plan_id.as_deref(), Some("premium"));
        assert_eq!(event.details.subscription_id.as_deref(), Some("sub-9"));
        assert_eq!(event.details.email.as_deref(), Some("o****@pharmacy.example"));
        assert_eq!(event.details.duration_ms, Some(1500));
    }

    #[test]
    fn test_audit_event_with_error_redacts() {
        let event = AuditEvent::new(AuditEventType::RefreshRejected, "u-1", Uuid::new_v4())
            .with_error("refresh failed for Bearer abc");
        assert_eq!(event.details.error.as_deref(), Some("refresh failed for Bearer [REDACTED]"));
    }

    #[test]
    fn test_audit_event_serialization() {
        let event = AuditEvent::new(AuditEventType::TrialStarted, "u-7", Uuid::new_v4())
            .with_pharmacy_id("ph-3");

        let json = serde_json::to_string(&event).expect("Should serialize");
        assert!(json.contains("trial_started"));
        assert!(json.contains("ph-3"));
        assert!(!json.contains("plan_id"));
    }
}
