//! Subscription data models.
//!
//! All subscription state is owned by the backend. These types mirror its
//! JSON shapes (camelCase fields, SCREAMING_SNAKE_CASE enums) and are never
//! mutated locally.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Result};

/// Checks the identifier rules shared by every id newtype.
fn validate_id(kind: &str, id: &str) -> std::result::Result<(), String> {
    if id.is_empty() {
        return Err(format!("{kind} cannot be empty"));
    }
    if id.len() > 64 {
        return Err(format!("{kind} must be 64 characters or less"));
    }
    if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(format!(
            "{kind} can only contain alphanumeric characters, hyphens, and underscores"
        ));
    }
    Ok(())
}

/// Identifier of a pharmacy (tenant).
///
/// # Examples
///
/// ```
/// use pharmacy_client::subscription::PharmacyId;
///
/// assert!(PharmacyId::new("ph-001").is_ok());
/// assert!(PharmacyId::new("").is_err());
/// assert!(PharmacyId::new("ph/001").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PharmacyId(String);

impl PharmacyId {
    /// Creates a new pharmacy ID after validation.
    ///
    /// # Errors
    ///
    /// Returns error if ID is empty, exceeds 64 characters, or contains invalid characters.
    pub fn new<S: Into<String>>(id: S) -> Result<Self> {
        let id = id.into();
        validate_id("pharmacy_id", &id).map_err(ClientError::InvalidPharmacyId)?;
        Ok(Self(id))
    }

    /// Returns the inner string reference.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Unique identifier for a subscription plan.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PlanId(String);

impl PlanId {
    /// Creates a new plan ID after validation.
    ///
    /// # Errors
    ///
    /// Returns error if ID is empty, exceeds 64 characters, or contains invalid characters.
    pub fn new<S: Into<String>>(id: S) -> Result<Self> {
        let id = id.into();
        validate_id("plan_id", &id).map_err(ClientError::InvalidPlanId)?;
        Ok(Self(id))
    }

    /// Returns the inner string reference.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Unique identifier for a subscription instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SubscriptionId(String);

impl SubscriptionId {
    /// Creates a new subscription ID after validation.
    ///
    /// # Errors
    ///
    /// Returns error if ID is empty, exceeds 64 characters, or contains invalid characters.
    pub fn new<S: Into<String>>(id: S) -> Result<Self> {
        let id = id.into();
        validate_id("subscription_id", &id).map_err(ClientError::InvalidSubscriptionId)?;
        Ok(Self(id))
    }

    /// Returns the inner string reference.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

macro_rules! string_id_conversions {
    ($($ty:ident),+) => {$(
        impl TryFrom<String> for $ty {
            type Error = ClientError;

            fn try_from(value: String) -> Result<Self> {
                Self::new(value)
            }
        }

        impl From<$ty> for String {
            fn from(id: $ty) -> Self {
                id.0
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    )+};
}

string_id_conversions!(PharmacyId, PlanId, SubscriptionId);

/// Server-side subscription status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    /// Free trial running.
    Trialing,
    /// Paid and current.
    Active,
    /// Validity period ended.
    Expired,
    /// Canceled; access may continue until the period ends.
    Canceled,
    /// Awaiting activation (e.g. payment confirmation).
    Pending,
}

impl SubscriptionStatus {
    /// Returns the wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trialing => "TRIALING",
            Self::Active => "ACTIVE",
            Self::Expired => "EXPIRED",
            Self::Canceled => "CANCELED",
            Self::Pending => "PENDING",
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Billing cycle of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillingCycle {
    /// Every month.
    Monthly,
    /// Every three months.
    Quarterly,
    /// Every year.
    Yearly,
}

/// A purchasable plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    /// Plan identifier.
    pub id: PlanId,
    /// Display name.
    pub name: String,
    /// Marketing description.
    #[serde(default)]
    pub description: Option<String>,
    /// Price per billing cycle.
    pub price: Decimal,
    /// ISO 4217 currency code, if the backend sends one.
    #[serde(default)]
    pub currency: Option<String>,
    /// Billing cycle.
    pub billing_cycle: BillingCycle,
    /// Feature flags and limits, e.g. `{"maxBranches": 3, "reports": true}`.
    #[serde(default)]
    pub features: serde_json::Map<String, serde_json::Value>,
    /// Length of the free trial, if the plan offers one.
    #[serde(default)]
    pub trial_days: Option<u32>,
    /// Whether the plan is offered to new subscribers.
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

/// A pharmacy's subscription record.
///
/// Used both for the current subscription and for history entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    /// Subscription identifier.
    pub id: SubscriptionId,
    /// Owning pharmacy.
    pub pharmacy_id: PharmacyId,
    /// Subscribed plan.
    pub plan_id: PlanId,
    /// Embedded plan details, when the backend includes them.
    #[serde(default)]
    pub plan: Option<Plan>,
    /// Lifecycle status.
    pub status: SubscriptionStatus,
    /// When the subscription began.
    pub start_date: DateTime<Utc>,
    /// When the subscription ended or will end.
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    /// End of the free trial, for trial subscriptions.
    #[serde(default)]
    pub trial_ends_at: Option<DateTime<Utc>>,
    /// Start of the current billing period.
    pub current_period_start: DateTime<Utc>,
    /// End of the current billing period.
    pub current_period_end: DateTime<Utc>,
    /// Whether the subscription renews automatically.
    #[serde(default)]
    pub auto_renew: bool,
}
