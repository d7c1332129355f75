//! What the subscription screen should show.

use super::{lifecycle::SubscriptionAction, models::Subscription};
use crate::{
    auth::Role,
    error::{ClientError, Feedback, Result},
};

/// Outcome of a current-subscription lookup, as presented to the user.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionView {
    /// A subscription exists.
    Current {
        /// The backend record.
        subscription: Subscription,
        /// Actions worth offering.
        actions: Vec<SubscriptionAction>,
    },
    /// The pharmacy has no subscription yet.
    NoSubscription {
        /// Whether to offer a free trial. Platform administrators do not
        /// subscribe, so they are never offered one.
        offer_trial: bool,
    },
    /// The user may not see this pharmacy's subscription.
    AccessDenied,
    /// The session is gone; the user must sign in again.
    SignInRequired,
    /// The lookup failed.
    Unavailable {
        /// Whether retrying may help.
        retryable: bool,
    },
}

/// Maps a lookup result to a view.
///
/// "No subscription yet" and "access denied" never collapse into each other.
///
/// # Examples
///
/// ```
/// use pharmacy_client::{
///     auth::Role,
///     subscription::{SubscriptionView, resolve_view},
/// };
///
/// let view = resolve_view(Ok(None), Role::Owner);
/// assert_eq!(view, SubscriptionView::NoSubscription { offer_trial: true });
/// ```
#[must_use]
pub fn resolve_view(lookup: Result<Option<Subscription>>, role: Role) -> SubscriptionView {
    match lookup {
        Ok(Some(subscription)) => {
            let actions = subscription.available_actions();
            SubscriptionView::Current { subscription, actions }
        }
        Ok(None) => SubscriptionView::NoSubscription { offer_trial: !role.is_platform_admin() },
        Err(error) => from_error(&error),
    }
}

fn from_error(error: &ClientError) -> SubscriptionView {
    match error.feedback() {
        Feedback::AccessDenied => SubscriptionView::AccessDenied,
        Feedback::SignInRequired | Feedback::InvalidCredentials => SubscriptionView::SignInRequired,
        Feedback::Failure { retryable, .. } => SubscriptionView::Unavailable { retryable },
    }
}
