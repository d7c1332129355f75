//! Session data types.

use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::subscription::PharmacyId;

/// A bearer credential that is wiped from memory when dropped.
///
/// `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SecretToken(String);

impl SecretToken {
    /// Wraps a token value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the raw token for use in an `Authorization` header.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretToken([REDACTED])")
    }
}

/// Role of a signed-in user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// Platform administrator, not attached to any pharmacy.
    Admin,
    /// Pharmacy owner.
    Owner,
    /// Branch or pharmacy manager.
    Manager,
    /// Pharmacist.
    Pharmacist,
    /// Point-of-sale operator.
    Cashier,
    /// Any role this client does not know about.
    #[serde(other)]
    Other,
}

impl Role {
    /// Whether this is the platform-wide administrator.
    #[must_use]
    pub const fn is_platform_admin(self) -> bool {
        matches!(self, Self::Admin)
    }
}

/// Profile snapshot returned by the backend at login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    /// User id.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Login e-mail.
    pub email: String,
    /// Role within the platform.
    pub role: Role,
    /// Tenant the user belongs to. Absent for platform administrators.
    #[serde(default)]
    pub pharmacy_id: Option<PharmacyId>,
}

/// Credentials and profile held by the session manager.
#[derive(Debug, Clone, Default)]
pub struct Session {
    /// Short-lived bearer credential.
    pub access_token: Option<SecretToken>,
    /// Longer-lived credential used to mint new access tokens.
    pub refresh_token: Option<SecretToken>,
    /// Profile of the signed-in user.
    pub user: Option<UserProfile>,
}

impl Session {
    /// Whether neither token is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none()
    }
}

/// Authentication state published to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    /// No session.
    SignedOut,
    /// A session is held. It may still need a refresh before use.
    SignedIn,
    /// The session was terminated because it could not be refreshed.
    Expired,
}

/// Body of the login response.
#[derive(Deserialize)]
pub(crate) struct LoginResponse {
    #[serde(alias = "accessToken")]
    pub access_token: String,
    #[serde(alias = "refreshToken")]
    pub refresh_token: String,
    pub user: UserProfile,
}

/// Body of the refresh response. The refresh token may or may not rotate.
#[derive(Deserialize)]
pub(crate) struct RefreshResponse {
    #[serde(alias = "accessToken")]
    pub access_token: String,
    #[serde(default, alias = "refreshToken")]
    pub refresh_token: Option<String>,
}
