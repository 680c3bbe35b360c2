//! Buffered HTTP response handed to response handlers.

use crate::{Result, UpstreamError};
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;

/// HTTP response with its body fully read.
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    url: url::Url,
    host: String,
}

impl Response {
    /// Read a reqwest response to completion.
    pub(crate) async fn from_reqwest(response: reqwest::Response, host: &str) -> Result<Self> {
        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response.bytes().await?;

        Ok(Self {
            status,
            headers,
            body,
            url,
            host: host.to_string(),
        })
    }

    /// Build a response by hand, e.g. in handler tests.
    pub fn from_parts(
        status: StatusCode,
        headers: HeaderMap,
        body: impl Into<Bytes>,
        url: url::Url,
    ) -> Self {
        let host = url.origin().ascii_serialization();
        Self {
            status,
            headers,
            body: body.into(),
            url,
            host,
        }
    }

    /// Get the status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Check if the response was successful (2xx).
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Check if the response was a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        self.status.is_server_error()
    }

    /// Get the response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Get a specific header value.
    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        self.headers
            .get(name.as_ref())
            .and_then(|v| v.to_str().ok())
    }

    /// Get the response URL.
    pub fn url(&self) -> &url::Url {
        &self.url
    }

    /// Upstream host that served the response.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Get the response body as bytes.
    pub fn bytes(&self) -> &Bytes {
        &self.body
    }

    /// Consume the response and return the body as bytes.
    pub fn into_bytes(self) -> Bytes {
        self.body
    }

    /// Get the response body as text.
    pub fn text(&self) -> Result<String> {
        String::from_utf8(self.body.to_vec()).map_err(UpstreamError::handler)
    }

    /// Parse the response body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(UpstreamError::handler)
    }

    /// Turn a non-2xx status into an attempt failure.
    pub fn error_for_status(self) -> Result<Self> {
        if self.status.is_success() {
            return Ok(self);
        }
        let message = self
            .text()
            .ok()
            .filter(|t| !t.is_empty())
            .or_else(|| self.status.canonical_reason().map(str::to_string))
            .unwrap_or_else(|| "Unknown error".to_string());
        Err(UpstreamError::Response {
            status: self.status.as_u16(),
            message,
        })
    }
}
