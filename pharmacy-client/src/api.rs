//! Authenticated request description and status mapping.

use uuid::Uuid;

use crate::{
    error::ClientError,
    transport::{HttpMethod, TransportResponse},
};

/// A backend request issued through the session manager.
///
/// The manager supplies credentials and correlation id; the request only
/// describes what to send.
#[derive(Debug, Clone)]
pub struct ApiRequest<'a> {
    /// HTTP method.
    pub method: HttpMethod,
    /// Path relative to the API base, including any query string.
    pub path: &'a str,
    /// JSON body.
    pub body: Option<&'a [u8]>,
    /// Correlation id sent as `X-Request-Id`, reused on the retry after a refresh.
    pub request_id: Uuid,
}

impl<'a> ApiRequest<'a> {
    /// A GET request.
    #[must_use]
    pub fn get(path: &'a str) -> Self {
        Self { method: HttpMethod::Get, path, body: None, request_id: Uuid::new_v4() }
    }

    /// A POST request with a JSON body.
    #[must_use]
    pub fn post(path: &'a str, body: &'a [u8]) -> Self {
        Self { method: HttpMethod::Post, path, body: Some(body), request_id: Uuid::new_v4() }
    }

    /// Sets the correlation id, e.g. to match an audit entry.
    #[must_use]
    pub fn with_request_id(mut self, request_id: Uuid) -> Self {
        self.request_id = request_id;
        self
    }
}

/// Maps a non-success response to the matching error.
///
/// 401 is not expected here: the session manager consumes it. It still maps
/// to [`ClientError::Unauthorized`] for completeness.
pub fn error_for_status(response: &TransportResponse) -> ClientError {
    let message = response.message();
    match response.status {
        400 | 422 => ClientError::BadRequest(message),
        401 => ClientError::Unauthorized,
        403 => ClientError::AccessDenied(message),
        404 => ClientError::NotFound(message),
        status => ClientError::BackendError { status, message },
    }
}
