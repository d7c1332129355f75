//! HTTP transport implementation.
//!
//! This module provides HTTP/1.1 and HTTP/2 transport using reqwest.

use reqwest::Client;
use tracing::instrument;
use url::Url;

use super::config::{HttpConfig, HttpVersion};
use crate::{
    error::{ClientError, Result},
    transport::{HttpMethod, RequestContext, Transport, TransportResponse, sealed},
};

/// Validates the API base URL.
///
/// Requires HTTPS unless `allow_insecure` is set, and a host in every case.
fn validate_base_url(url: &Url, allow_insecure: bool) -> Result<()> {
    match url.scheme() {
        "https" => {}
        "http" if allow_insecure => {}
        other => {
            return Err(ClientError::ConfigError(format!(
                "base URL scheme must be https, got {other}"
            )));
        }
    }

    if url.host_str().is_none_or(str::is_empty) {
        return Err(ClientError::ConfigError(format!("base URL missing host: {url}")));
    }

    Ok(())
}

/// Sanitizes path to prevent path traversal.
///
/// Rejects paths containing directory traversal sequences.
fn sanitize_path(path: &str) -> Result<&str> {
    let route = path.split('?').next().unwrap_or_default();
    if route.contains("..") || route.contains("//") {
        return Err(ClientError::TransportError(
            "Invalid path: traversal sequences not allowed".to_owned(),
        ));
    }
    if !path.starts_with('/') {
        return Err(ClientError::TransportError("Path must start with '/'".to_owned()));
    }
    Ok(path)
}

/// Validates header value for CRLF injection prevention.
fn validate_header_value(name: &str, value: &str) -> Result<()> {
    if value.contains('\r') || value.contains('\n') || value.contains('\0') {
        return Err(ClientError::TransportError(format!(
            "Invalid {name} header: control characters not allowed"
        )));
    }
    Ok(())
}

/// HTTP/1.1 and HTTP/2 transport using reqwest.
///
/// Supports automatic connection pooling, keep-alive, and HTTP/2 multiplexing.
///
/// # Examples
///
/// ```
/// use pharmacy_client::transport::{HttpConfig, HttpTransport, HttpVersion, Transport};
///
/// let config = HttpConfig { http_version: HttpVersion::Http1, ..HttpConfig::default() };
/// let transport = HttpTransport::with_config("https://api.pharmacy.example/api", &config).unwrap();
/// assert_eq!(transport.protocol_name(), "http/1.1");
/// ```
#[derive(Debug)]
pub struct HttpTransport {
    client: Client,
    base_url: Url,
    http_version: HttpVersion,
}

impl sealed::private::Sealed for HttpTransport {}

impl HttpTransport {
    /// Creates a new HTTP transport with default settings.
    ///
    /// Default configuration:
    /// - Pool max idle per host: 10
    /// - Timeout: 30 seconds
    /// - Connect timeout: 10 seconds
    /// - HTTP version: Auto (prefer HTTP/2)
    ///
    /// # Errors
    ///
    /// Returns error if `base_url` is invalid or the HTTP client cannot be built.
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_config(base_url, &HttpConfig::default())
    }

    /// Creates HTTP transport with custom configuration.
    ///
    /// `base_url` is the API root every request path is appended to,
    /// e.g. `https://api.pharmacy.example/api`.
    ///
    /// # Errors
    ///
    /// Returns error if `base_url` is invalid, uses plain HTTP without
    /// `allow_insecure_http`, or HTTP client creation fails.
    pub fn with_config(base_url: &str, config: &HttpConfig) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ClientError::ConfigError(format!("invalid base URL: {e}")))?;
        validate_base_url(&base_url, config.allow_insecure_http)?;

        let mut builder = Client::builder()
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .timeout(config.timeout())
            .connect_timeout(config.connect_timeout());

        builder = match config.http_version {
            HttpVersion::Http1 => builder.http1_only(),
            HttpVersion::Http2 => builder.http2_prior_knowledge(),
            HttpVersion::Auto => builder,
        };

        let client = builder.build().map_err(ClientError::HttpError)?;

        Ok(Self { client, base_url, http_version: config.http_version })
    }

    /// Returns the API base URL.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    #[instrument(
        skip(self, ctx),
        fields(
            method = ctx.method.as_str(),
            path = ctx.path,
            request_id = %ctx.request_id,
            status
        )
    )]
    async fn execute_request(&self, ctx: RequestContext<'_>) -> Result<TransportResponse> {
        let path = sanitize_path(ctx.path)?;
        let full_url = format!("{}{path}", self.base_url.as_str().trim_end_matches('/'));

        let mut request = match ctx.method {
            HttpMethod::Get => self.client.get(&full_url),
            HttpMethod::Post => self.client.post(&full_url),
        };

        request = request
            .header("Accept", "application/json")
            .header("X-Request-Id", ctx.request_id.to_string());

        if let Some(token) = ctx.bearer {
            validate_header_value("Authorization", token)?;
            request = request.bearer_auth(token);
        }

        if let Some(body) = ctx.body {
            request = request.header("Content-Type", "application/json").body(body.to_vec());
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        tracing::Span::current().record("status", status);

        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_owned()))
            .collect();

        let body = response.bytes().await.map_err(ClientError::HttpError)?.to_vec();

        Ok(TransportResponse { status, body, headers })
    }
}

impl Transport for HttpTransport {
    async fn send<'a>(&'a self, ctx: RequestContext<'a>) -> Result<TransportResponse> {
        self.execute_request(ctx).await
    }

    fn protocol_name(&self) -> &'static str {
        match self.http_version {
            HttpVersion::Http1 => "http/1.1",
            HttpVersion::Http2 => "http/2",
            HttpVersion::Auto => "http",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_transport_new() {
        let transport = HttpTransport::new("https://api.pharmacy.example/api");
        assert!(transport.is_ok());
    }

    #[test]
    fn test_http_transport_protocol_name() {
        let base = "https://api.pharmacy.example";
        let cases = [
            (HttpVersion::Http1, "http/1.1"),
            (HttpVersion::Http2, "http/2"),
            (HttpVersion::Auto, "http"),
        ];
        for (http_version, expected) in cases {
            let config = HttpConfig { http_version, ..Default::default() };
            let transport = HttpTransport::with_config(base, &config).unwrap();
            assert_eq!(transport.protocol_name(), expected);
        }
    }

    #[test]
    fn test_http_transport_rejects_invalid_url() {
        let result = HttpTransport::new("not-a-url");
        assert!(matches!(result, Err(ClientError::ConfigError(_))));
    }

    #[test]
    fn test_http_transport_rejects_plain_http_by_default() {
        let result = HttpTransport::new("http://localhost:3000/api");
        assert!(matches!(result, Err(ClientError::ConfigError(_))));
    }

    #[test]
    fn test_http_transport_allows_plain_http_when_configured() {
        let config = HttpConfig { allow_insecure_http: true, ..Default::default() };
        let transport = HttpTransport::with_config("http://localhost:3000/api", &config);
        assert!(transport.is_ok());
    }

    #[test]
    fn test_http_transport_rejects_file_scheme() {
        let config = HttpConfig { allow_insecure_http: true, ..Default::default() };
        let result = HttpTransport::with_config("file:///etc/passwd", &config);
        assert!(matches!(result, Err(ClientError::ConfigError(_))));
    }

    #[test]
    fn test_sanitize_path() {
        assert!(sanitize_path("/auth/login").is_ok());
        assert!(sanitize_path("/subscriptions/current?pharmacyId=ph-1").is_ok());
        assert!(sanitize_path("/../etc/passwd").is_err());
        assert!(sanitize_path("//evil.example").is_err());
        assert!(sanitize_path("auth/login").is_err());
        assert!(sanitize_path("").is_err());
    }

    #[test]
    fn test_validate_header_value() {
        assert!(validate_header_value("Authorization", "eyJhbGciOi.payload.sig").is_ok());
        assert!(validate_header_value("Authorization", "token\r\nX-Evil: 1").is_err());
        assert!(validate_header_value("Authorization", "token\0").is_err());
    }

    #[tokio::test]
    async fn test_http_transport_rejects_traversal_before_sending() {
        let transport = HttpTransport::new("https://api.pharmacy.example").unwrap();
        let result = transport.send(RequestContext::new(HttpMethod::Get, "/a/../b")).await;
        assert!(matches!(result, Err(ClientError::TransportError(_))));
    }
}
