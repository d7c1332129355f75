//! Backend endpoint paths.
//!
//! Paths are relative to the API base (`base_url` + `api_prefix`). Each one
//! may be overridden in the `[endpoints]` table of the configuration file.

use serde::Deserialize;

use crate::error::{ClientError, Result};

/// Backend endpoint paths.
///
/// # Examples
///
/// ```
/// use pharmacy_client::endpoints::Endpoints;
///
/// let endpoints = Endpoints::default();
/// assert_eq!(endpoints.login, "/auth/login");
/// assert_eq!(
///     endpoints.current_subscription_for("ph-1"),
///     "/subscriptions/current?pharmacyId=ph-1"
/// );
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Endpoints {
    /// Credential exchange.
    pub login: String,
    /// Refresh-token exchange.
    pub refresh: String,
    /// Server-side session invalidation.
    pub logout: String,
    /// Current subscription of a pharmacy.
    pub current_subscription: String,
    /// Past subscriptions of a pharmacy.
    pub history: String,
    /// Purchasable plans.
    pub plans: String,
    /// Plan change.
    pub change_plan: String,
    /// Cancellation.
    pub cancel: String,
    /// Renewal.
    pub renew: String,
    /// Free trial start.
    pub start_trial: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            login: "/auth/login".to_owned(),
            refresh: "/auth/refresh-token".to_owned(),
            logout: "/auth/logout".to_owned(),
            current_subscription: "/subscriptions/current".to_owned(),
            history: "/subscriptions/history".to_owned(),
            plans: "/subscriptions/plans".to_owned(),
            change_plan: "/subscriptions/change-plan".to_owned(),
            cancel: "/subscriptions/cancel".to_owned(),
            renew: "/subscriptions/renew".to_owned(),
            start_trial: "/subscriptions/start-trial".to_owned(),
        }
    }
}

impl Endpoints {
    /// Validates every path.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ConfigError`] naming the first path that does not
    /// start with `/`, contains `..` or `//`, or carries a query string.
    pub fn validate(&self) -> Result<()> {
        for (name, path) in self.named() {
            if !path.starts_with('/') {
                return Err(ClientError::ConfigError(format!(
                    "endpoints.{name} must start with '/': {path}"
                )));
            }
            if path.contains("..") || path.contains("//") || path.contains('?') {
                return Err(ClientError::ConfigError(format!(
                    "endpoints.{name} contains forbidden sequence: {path}"
                )));
            }
        }
        Ok(())
    }

    /// Current-subscription path scoped to a pharmacy.
    #[must_use]
    pub fn current_subscription_for(&self, pharmacy_id: &str) -> String {
        with_query(&self.current_subscription, &[("pharmacyId", pharmacy_id)])
    }

    /// History path scoped to a pharmacy.
    #[must_use]
    pub fn history_for(&self, pharmacy_id: &str) -> String {
        with_query(&self.history, &[("pharmacyId", pharmacy_id)])
    }

    fn named(&self) -> [(&'static str, &str); 10] {
        [
            ("login", self.login.as_str()),
            ("refresh", self.refresh.as_str()),
            ("logout", self.logout.as_str()),
            ("current_subscription", self.current_subscription.as_str()),
            ("history", self.history.as_str()),
            ("plans", self.plans.as_str()),
            ("change_plan", self.change_plan.as_str()),
            ("cancel", self.cancel.as_str()),
            ("renew", self.renew.as_str()),
            ("start_trial", self.start_trial.as_str()),
        ]
    }
}

/// Appends URL-encoded query parameters to a path.
#[must_use]
pub fn with_query(path: &str, params: &[(&str, &str)]) -> String {
    if params.is_empty() {
        return path.to_owned();
    }
    let query = url::form_urlencoded::Serializer::new(String::new()).extend_pairs(params).finish();
    format!("{path}?{query}")
}
