//! Pharmacy subscriptions.
//!
//! - [`models`]: backend record shapes and validated identifiers
//! - [`lifecycle`]: display-side status rules
//! - [`controller`]: reads and mutations through the session manager
//! - [`view`]: mapping lookups to what the screen shows

pub mod controller;
pub mod lifecycle;
pub mod models;
pub mod view;

pub use controller::SubscriptionController;
pub use lifecycle::{SubscriptionAction, available_actions};
pub use models::{
    BillingCycle, PharmacyId, Plan, PlanId, Subscription, SubscriptionId, SubscriptionStatus,
};
pub use view::{SubscriptionView, resolve_view};
