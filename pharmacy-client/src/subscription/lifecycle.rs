//! Display-side subscription lifecycle rules.
//!
//! The backend owns every transition. This module only answers questions the
//! UI asks before offering an action, and none of its answers is enforced
//! locally: the backend has the final word and its re-fetched state replaces
//! whatever was shown.
//!
//! ```text
//! (none) ──start trial──► TRIALING ──┬──► ACTIVE ──► CANCELED ──► EXPIRED
//!                                    ├──► EXPIRED ◄───────────────────┘
//!                                    └──► CANCELED        │
//!                         EXPIRED / CANCELED ──renew──► ACTIVE
//!                         any ──change plan──► (new plan)
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::models::{Subscription, SubscriptionStatus};

/// A mutation the UI may offer for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionAction {
    /// Switch to another plan.
    ChangePlan,
    /// Stop the subscription at the end of the current period.
    Cancel,
    /// Start a new period on an ended subscription.
    Renew,
}

/// Actions worth offering for a subscription in `status`.
///
/// # Examples
///
/// ```
/// use pharmacy_client::subscription::{SubscriptionAction, SubscriptionStatus, available_actions};
///
/// let actions = available_actions(SubscriptionStatus::Expired);
/// assert!(actions.contains(&SubscriptionAction::Renew));
/// assert!(!actions.contains(&SubscriptionAction::Cancel));
/// ```
#[must_use]
pub fn available_actions(status: SubscriptionStatus) -> Vec<SubscriptionAction> {
    let mut actions = vec![SubscriptionAction::ChangePlan];
    match status {
        SubscriptionStatus::Trialing | SubscriptionStatus::Active => {
            actions.push(SubscriptionAction::Cancel);
        }
        SubscriptionStatus::Expired | SubscriptionStatus::Canceled => {
            actions.push(SubscriptionAction::Renew);
        }
        SubscriptionStatus::Pending => {}
    }
    actions
}

impl Subscription {
    /// Whether the pharmacy can use paid features at `now`.
    ///
    /// A canceled subscription keeps access until its period ends.
    #[must_use]
    pub fn has_access(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            SubscriptionStatus::Active => true,
            SubscriptionStatus::Trialing => !self.is_trial_expired(now),
            SubscriptionStatus::Canceled => now < self.current_period_end,
            SubscriptionStatus::Expired | SubscriptionStatus::Pending => false,
        }
    }

    /// Whether a trial subscription has passed its trial end.
    ///
    /// Falls back to the period end when `trialEndsAt` is absent. Always
    /// `false` for non-trial subscriptions.
    #[must_use]
    pub fn is_trial_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == SubscriptionStatus::Trialing
            && now >= self.trial_ends_at.unwrap_or(self.current_period_end)
    }

    /// Whole days until the relevant end date, zero once passed.
    ///
    /// Uses the trial end for trials and the period end otherwise.
    #[must_use]
    pub fn days_remaining(&self, now: DateTime<Utc>) -> i64 {
        let end = match self.status {
            SubscriptionStatus::Trialing => {
                self.trial_ends_at.unwrap_or(self.current_period_end)
            }
            _ => self.current_period_end,
        };
        (end - now).num_days().max(0)
    }

    /// Actions worth offering for this subscription.
    #[must_use]
    pub fn available_actions(&self) -> Vec<SubscriptionAction> {
        available_actions(self.status)
    }
}
