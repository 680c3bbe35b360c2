//! Request builder.

use crate::{Response, Result, UpstreamClient, UpstreamError};
use crate::resource::Resource;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, header};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Methods the client knows how to send.
pub const SUPPORTED_METHODS: [Method; 6] = [
    Method::GET,
    Method::HEAD,
    Method::POST,
    Method::PUT,
    Method::PATCH,
    Method::DELETE,
];

/// Reject methods outside [`SUPPORTED_METHODS`].
pub fn ensure_supported(method: &Method) -> Result<()> {
    if SUPPORTED_METHODS.contains(method) {
        Ok(())
    } else {
        Err(UpstreamError::UnsupportedMethod(method.clone()))
    }
}

/// Everything needed to replay a request against any host.
#[derive(Debug, Clone)]
struct RequestParams {
    method: Method,
    path: String,
    headers: HeaderMap,
    query: Vec<(String, String)>,
    body: Option<Bytes>,
    timeout: Option<Duration>,
}

impl RequestParams {
    fn url_for(&self, resource: &Resource) -> Result<url::Url> {
        let raw = resource.url_for(&self.path);
        let mut url = url::Url::parse(&raw)
            .map_err(|e| UpstreamError::InvalidUrl(format!("{}: {}", raw, e)))?;
        if !self.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &self.query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    /// One round-trip against `resource`, body read included.
    async fn execute(&self, http: &reqwest::Client, resource: &Resource) -> Result<Response> {
        let url = self.url_for(resource)?;
        trace!(method = %self.method, url = %url, "Sending HTTP request");

        let mut request = http.request(self.method.clone(), url).headers(self.headers.clone());
        if let Some(body) = &self.body {
            request = request.body(body.clone());
        }
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await?;
        Response::from_reqwest(response, resource.id()).await
    }
}

/// HTTP request builder.
///
/// The request is addressed by path only; the host is filled in per attempt
/// from the upstream pool.
pub struct RequestBuilder<'a> {
    client: &'a UpstreamClient,
    params: RequestParams,
    retry: bool,
    error: Option<UpstreamError>,
}

impl<'a> RequestBuilder<'a> {
    /// Create a new request builder.
    pub(crate) fn new(client: &'a UpstreamClient, method: Method, path: String) -> Self {
        Self {
            client,
            params: RequestParams {
                method,
                path,
                headers: HeaderMap::new(),
                query: Vec::new(),
                body: None,
                timeout: None,
            },
            retry: true,
            error: None,
        }
    }

    fn set_header(mut self, name: HeaderName, value: &str) -> Self {
        match HeaderValue::try_from(value) {
            Ok(value) => {
                self.params.headers.insert(name, value);
            }
            Err(e) => self.fail(format!("header {}: {}", name, e)),
        }
        self
    }

    fn fail(&mut self, message: String) {
        if self.error.is_none() {
            self.error = Some(UpstreamError::RequestBuild(message));
        }
    }

    /// Add a header to the request.
    pub fn header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        match HeaderName::try_from(name.as_ref()) {
            Ok(name) => self.set_header(name, value.as_ref()),
            Err(e) => {
                self.fail(format!("header name {}: {}", name.as_ref(), e));
                self
            }
        }
    }

    /// Set the `Content-Type` header.
    pub fn content_type(self, content_type: impl AsRef<str>) -> Self {
        self.set_header(header::CONTENT_TYPE, content_type.as_ref())
    }

    /// Set the `Accept` header.
    pub fn accept(self, accept: impl AsRef<str>) -> Self {
        self.set_header(header::ACCEPT, accept.as_ref())
    }

    /// Add a query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.query.push((key.into(), value.into()));
        self
    }

    /// Set the request body as raw bytes.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.params.body = Some(body.into());
        self
    }

    /// Set the request body as JSON.
    pub fn json<T: Serialize + ?Sized>(mut self, json: &T) -> Self {
        match serde_json::to_vec(json) {
            Ok(bytes) => {
                self.params.body = Some(bytes.into());
                self.set_header(header::CONTENT_TYPE, "application/json")
            }
            Err(e) => {
                self.fail(format!("JSON body: {}", e));
                self
            }
        }
    }

    /// Set the request body as form data.
    pub fn form<T: Serialize + ?Sized>(mut self, form: &T) -> Self {
        match serde_urlencoded::to_string(form) {
            Ok(encoded) => {
                self.params.body = Some(encoded.into());
                self.set_header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            }
            Err(e) => {
                self.fail(format!("form body: {}", e));
                self
            }
        }
    }

    /// Set a per-attempt transport timeout.
    ///
    /// Expiry counts as a failure against the host, unlike cancellation.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.params.timeout = Some(timeout);
        self
    }

    /// Send at most one attempt to one host.
    ///
    /// For requests that must not be repeated, such as a non-idempotent POST.
    pub fn no_retry(mut self) -> Self {
        self.retry = false;
        self
    }

    /// Send the request and apply `handler` to the response.
    ///
    /// Errors returned by `handler` count as attempt failures and trigger a
    /// retry; a response the handler accepts counts as a success whatever
    /// its status.
    pub async fn send<T, H>(self, token: &CancellationToken, handler: H) -> Result<T>
    where
        H: Fn(Response) -> Result<T> + Send + Sync + 'static,
        T: Send + 'static,
    {
        if let Some(error) = self.error {
            return Err(error);
        }
        ensure_supported(&self.params.method)?;

        let balancer = self.client.balancer();
        let policy = if self.retry {
            *balancer.policy()
        } else {
            balancer.policy().single_attempt()
        };

        let params = Arc::new(self.params);
        let handler = Arc::new(handler);
        let http = self.client.inner().clone();

        balancer
            .submit_with(token, policy, move |resource| {
                let params = params.clone();
                let handler = handler.clone();
                let http = http.clone();
                async move {
                    let response = params.execute(&http, &resource).await?;
                    (*handler)(response)
                }
            })
            .await
    }

    /// Send the request, failing on any non-2xx status.
    pub async fn send_checked(self, token: &CancellationToken) -> Result<Response> {
        self.send(token, Response::error_for_status).await
    }
}
