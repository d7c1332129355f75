//! Access token inspection and refresh timing.
//!
//! Access tokens are JWTs issued by the backend. The client never verifies
//! the signature (it holds no key); it only reads the `exp` claim to decide
//! whether a token is still usable and when to refresh it.

use std::time::Duration;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::{ClientError, Result};

/// Claims the client reads from an access token payload.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TokenClaims {
    /// Expiry, seconds since the Unix epoch.
    pub exp: i64,
    /// Issued-at, seconds since the Unix epoch.
    #[serde(default)]
    pub iat: Option<i64>,
    /// Subject (user id).
    #[serde(default)]
    pub sub: Option<String>,
}

impl TokenClaims {
    /// Expiry as a timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidToken`] if `exp` is out of range.
    pub fn expires_at(&self) -> Result<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
            .ok_or_else(|| ClientError::InvalidToken(format!("exp out of range: {}", self.exp)))
    }
}

/// Decodes the payload segment of a JWT without verifying its signature.
///
/// # Errors
///
/// Returns [`ClientError::InvalidToken`] if the token does not have three
/// segments, the payload is not base64url JSON, or `exp` is missing.
///
/// # Examples
///
/// ```
/// use pharmacy_client::auth::token::decode_claims;
///
/// // {"alg":"HS256","typ":"JWT"} . {"sub":"u-1","exp":1900000000} . sig
/// let token = "eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9.\
///              eyJzdWIiOiJ1LTEiLCJleHAiOjE5MDAwMDAwMDB9.c2ln";
/// let claims = decode_claims(token).unwrap();
/// assert_eq!(claims.exp, 1_900_000_000);
/// assert_eq!(claims.sub.as_deref(), Some("u-1"));
/// ```
pub fn decode_claims(token: &str) -> Result<TokenClaims> {
    let mut segments = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) =
        (segments.next(), segments.next(), segments.next(), segments.next())
    else {
        return Err(ClientError::InvalidToken("expected three dot-separated segments".to_owned()));
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| ClientError::InvalidToken(format!("payload is not base64url: {e}")))?;

    serde_json::from_slice(&bytes)
        .map_err(|e| ClientError::InvalidToken(format!("payload claims: {e}")))
}

/// Returns `true` unless the token is absent, malformed, or expired by more
/// than `skew`.
///
/// A token with `exp` exactly `now - skew` is still accepted.
#[must_use]
pub fn is_token_valid(token: Option<&str>, now: DateTime<Utc>, skew: Duration) -> bool {
    let Some(token) = token else {
        return false;
    };
    let Ok(claims) = decode_claims(token) else {
        return false;
    };
    let skew_secs = i64::try_from(skew.as_secs()).unwrap_or(i64::MAX);
    claims.exp >= now.timestamp().saturating_sub(skew_secs)
}

/// Time left before the token expires, zero if already expired.
///
/// # Errors
///
/// Returns [`ClientError::InvalidToken`] if the token cannot be decoded.
pub fn remaining_lifetime(token: &str, now: DateTime<Utc>) -> Result<Duration> {
    let claims = decode_claims(token)?;
    let remaining = claims.exp.saturating_sub(now.timestamp());
    Ok(Duration::from_secs(u64::try_from(remaining).unwrap_or(0)))
}

/// Delay before a proactive refresh.
///
/// Refreshes after `ratio` of the remaining lifetime, but no later than
/// `min_lead` before expiry when the lifetime is longer than `min_lead`.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use pharmacy_client::auth::token::refresh_delay;
///
/// let lead = Duration::from_secs(60);
/// // Short-lived token: 80% of 30s.
/// assert_eq!(refresh_delay(Duration::from_secs(30), 0.8, lead), Duration::from_secs(24));
/// // Two minutes left: refresh one minute before expiry.
/// assert_eq!(refresh_delay(Duration::from_secs(120), 0.8, lead), Duration::from_secs(60));
/// // Fifteen minutes left: 80% wins.
/// assert_eq!(refresh_delay(Duration::from_secs(900), 0.8, lead), Duration::from_secs(720));
/// ```
#[must_use]
pub fn refresh_delay(remaining: Duration, ratio: f64, min_lead: Duration) -> Duration {
    if remaining.is_zero() {
        return Duration::ZERO;
    }
    let proportional = remaining.mul_f64(ratio.clamp(0.0, 1.0));
    if remaining > min_lead { proportional.min(remaining - min_lead) } else { proportional }
}


#[cfg(test)]
mod tests {
    use super::{testing::*, *};

    fn at(ts: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(ts, 0).unwrap()
    }

    const SKEW: Duration = Duration::from_secs(5);

    #[test]
    fn test_decode_claims() {
        let claims = decode_claims(&token_expiring_at(1_700_000_000)).unwrap();
        assert_eq!(claims.exp, 1_700_000_000);
        assert_eq!(claims.sub.as_deref(), Some("user-1"));
        assert_eq!(claims.expires_at().unwrap(), at(1_700_000_000));
    }

    #[test]
    fn test_decode_accepts_padded_payload() {
        let token = token_expiring_at(1_700_000_000);
        let mut parts: Vec<String> = token.split('.').map(str::to_owned).collect();
        parts[1].push_str("==");
        assert!(decode_claims(&parts.join(".")).is_ok());
    }

    #[test]
    fn test_decode_rejects_malformed() {
        let no_exp = format!(
            "{}.{}.sig",
            URL_SAFE_NO_PAD.encode(b"{}"),
            URL_SAFE_NO_PAD.encode(br#"{"sub":"x"}"#)
        );
        for token in ["", "abc", "a.b", "a.b.c.d", "a.!!!.c", "a.bm90IGpzb24.c", no_exp.as_str()] {
            assert!(
                matches!(decode_claims(token), Err(ClientError::InvalidToken(_))),
                "accepted {token:?}"
            );
        }
    }

    #[test]
    fn test_validity_boundaries() {
        let now = at(1_700_000_000);
        assert!(is_token_valid(Some(&token_expiring_in(now, 3600)), now, SKEW));
        assert!(is_token_valid(Some(&token_expiring_in(now, 0)), now, SKEW));
        assert!(is_token_valid(Some(&token_expiring_in(now, -5)), now, SKEW));
        assert!(!is_token_valid(Some(&token_expiring_in(now, -6)), now, SKEW));
        assert!(!is_token_valid(None, now, SKEW));
        assert!(!is_token_valid(Some("garbage"), now, SKEW));
    }

    #[test]
    fn test_remaining_lifetime() {
        let now = at(1_700_000_000);
        assert_eq!(
            remaining_lifetime(&token_expiring_in(now, 90), now).unwrap(),
            Duration::from_secs(90)
        );
        assert_eq!(remaining_lifetime(&token_expiring_in(now, -90), now).unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_refresh_delay_thirty_second_token() {
        let delay = refresh_delay(Duration::from_secs(30), 0.8, Duration::from_secs(60));
        assert_eq!(delay, Duration::from_secs(24));
    }

    #[test]
    fn test_refresh_delay_bounded_by_lead() {
        let lead = Duration::from_secs(60);
        assert_eq!(refresh_delay(Duration::from_secs(200), 0.8, lead), Duration::from_secs(140));
        assert_eq!(refresh_delay(Duration::from_secs(3600), 0.8, lead), Duration::from_secs(2880));
    }

    #[test]
    fn test_refresh_delay_expired() {
        assert_eq!(refresh_delay(Duration::ZERO, 0.8, Duration::from_secs(60)), Duration::ZERO);
    }
}
