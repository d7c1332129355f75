//! Transport abstraction layer.
//!
//! This module provides a sealed [`Transport`] trait that the session manager
//! sends every backend request through. The transport only moves bytes: it
//! attaches the bearer credential and correlation id it is given and reports
//! the status code it got back. Status interpretation (401 refresh, 403 access
//! denied, 404 empty subscription) lives in the layers above.
//!
//! # Architecture
//!
//! - **Transport**: protocol mechanics (reqwest, connection pooling, timeouts)
//! - **`SessionManager`**: credentials, refresh-and-retry, status mapping
//! - **`SubscriptionController`**: subscription semantics
//!
//! # Examples
//!
//! ```rust,no_run
//! use pharmacy_client::transport::{HttpMethod, HttpTransport, RequestContext, Transport};
//!
//! # async fn example() -> pharmacy_client::error::Result<()> {
//! let transport = HttpTransport::new("https://api.pharmacy.example/api")?;
//!
//! let ctx = RequestContext::new(HttpMethod::Get, "/subscriptions/plans");
//! let response = transport.send(ctx).await?;
//! println!("Status: {}", response.status);
//! # Ok(())
//! # }
//! ```

#[allow(
    redundant_imports,
    reason = "Future needed for RPITIT despite being in Edition 2024 prelude"
)]
use std::future::Future;

use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::error::{ClientError, Result};

pub mod config;
pub mod http;
#[cfg(test)]
pub(crate) mod mock;
mod sealed;

pub use config::{HttpConfig, HttpVersion};
pub use http::HttpTransport;

/// HTTP method of a backend request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// GET
    Get,
    /// POST
    Post,
}

impl HttpMethod {
    /// Returns the method name as sent on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

/// Request context for transport operations.
///
/// `path` is relative to the API base and may carry a query string.
#[derive(Debug, Clone)]
pub struct RequestContext<'a> {
    /// HTTP method.
    pub method: HttpMethod,
    /// Request path including query (e.g. "/subscriptions/current?pharmacyId=ph-1").
    pub path: &'a str,
    /// Bearer credential for the `Authorization` header.
    pub bearer: Option<&'a str>,
    /// JSON request body.
    pub body: Option<&'a [u8]>,
    /// Correlation id sent as `X-Request-Id`.
    pub request_id: Uuid,
}

impl<'a> RequestContext<'a> {
    /// Creates an unauthenticated request without body and with a fresh request id.
    #[must_use]
    pub fn new(method: HttpMethod, path: &'a str) -> Self {
        Self { method, path, bearer: None, body: None, request_id: Uuid::new_v4() }
    }

    /// Sets the bearer credential.
    #[must_use]
    pub fn with_bearer(mut self, token: &'a str) -> Self {
        self.bearer = Some(token);
        self
    }

    /// Sets the JSON body.
    #[must_use]
    pub fn with_body(mut self, body: &'a [u8]) -> Self {
        self.body = Some(body);
        self
    }

    /// Sets the correlation id.
    #[must_use]
    pub fn with_request_id(mut self, request_id: Uuid) -> Self {
        self.request_id = request_id;
        self
    }
}

/// Response from transport operations.
///
/// Non-2xx responses are returned as values, not errors.
#[derive(Debug)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// Raw response body bytes.
    pub body: Vec<u8>,
    /// Response headers.
    pub headers: Vec<(String, String)>,
}

impl TransportResponse {
    /// Whether the status is 2xx.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Whether the body is empty or the JSON literal `null`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        let trimmed = self.body.trim_ascii();
        trimmed.is_empty() || trimmed == b"null"
    }

    /// Decodes the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidResponse`] if the body does not match `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| ClientError::InvalidResponse(format!("status {}: {e}", self.status)))
    }

    /// Extracts a human-readable error message from the body.
    ///
    /// Understands `{"message": "..."}` and `{"message": ["...", "..."]}`,
    /// falling back to the raw body text.
    #[must_use]
    pub fn message(&self) -> String {
        if let Ok(value) = serde_json::from_slice::<serde_json::Value>(&self.body) {
            match value.get("message") {
                Some(serde_json::Value::String(msg)) => return msg.clone(),
                Some(serde_json::Value::Array(items)) => {
                    let joined: Vec<&str> =
                        items.iter().filter_map(serde_json::Value::as_str).collect();
                    if !joined.is_empty() {
                        return joined.join("; ");
                    }
                }
                _ => {}
            }
        }
        String::from_utf8_lossy(&self.body).trim().to_owned()
    }
}

/// Transport protocol abstraction.
///
/// This trait is sealed: only implementations within this crate are allowed,
/// so every implementation applies the same header validation and never logs
/// credentials.
///
/// # Protocol Support
///
/// | Protocol | Implementation |
/// |----------|----------------|
/// | HTTP/1.1 | `HttpTransport` |
/// | HTTP/2   | `HttpTransport` |
pub trait Transport: sealed::private::Sealed + Send + Sync {
    /// Executes a request and returns the raw response.
    ///
    /// # Errors
    ///
    /// Returns error only if no response was received (network failure,
    /// timeout) or the request was rejected before sending.
    fn send<'a>(
        &'a self,
        ctx: RequestContext<'a>,
    ) -> impl Future<Output = Result<TransportResponse>> + Send + 'a;

    /// Returns the protocol name for logging.
    fn protocol_name(&self) -> &'static str;
}
