//! HTTP transport layer.
//!
//! [`Transport`] is the seam every request goes through. [`HttpTransport`] talks
//! to the network, [`AuthenticatingTransport`] decorates another transport with
//! the current API token, and [`ApiClient`] builds requests against the API base
//! URL and unwraps the `{"data": ...}` response envelope.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Body, Method, Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::client::FORM_CONTENT_TYPE;
use crate::codec::FormParams;
use crate::config::PveClientConfig;
use crate::error::{Error, Result};
use crate::token::TokenStore;

/// User agent sent by [`HttpTransport`].
pub const USER_AGENT: &str = concat!("pve-core/", env!("CARGO_PKG_VERSION"));

/// Executes a prepared HTTP request.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `request` and return the raw response, whatever its status.
    async fn execute(&self, request: Request) -> Result<Response>;
}

/// Transport backed by a pooled `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    /// Build a transport from the client configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &PveClientConfig) -> Result<Self> {
        let http = config.http_config().build_http_client(USER_AGENT)?;
        Ok(Self { http })
    }

    /// Wrap an existing `reqwest` client.
    #[must_use]
    pub const fn from_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: Request) -> Result<Response> {
        self.http.execute(request).await.map_err(Error::from)
    }
}

/// Transport decorator that sets `Authorization: PVEAPIToken=<id>=<secret>`
/// from the shared [`TokenStore`] on every request.
pub struct AuthenticatingTransport {
    inner: Arc<dyn Transport>,
    tokens: TokenStore,
}

impl AuthenticatingTransport {
    /// Decorate `inner` with the token held in `tokens`.
    #[must_use]
    pub fn new(inner: Arc<dyn Transport>, tokens: TokenStore) -> Self {
        Self { inner, tokens }
    }
}

impl fmt::Debug for AuthenticatingTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticatingTransport")
            .field("token", &self.tokens.get().full_token_id())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for AuthenticatingTransport {
    async fn execute(&self, mut request: Request) -> Result<Response> {
        let token = self.tokens.get();
        let mut value = HeaderValue::from_str(&token.authorization_value()).map_err(|_| {
            Error::ConfigError(format!(
                "Token `{}` cannot be sent as a header",
                token.full_token_id()
            ))
        })?;
        value.set_sensitive(true);
        request.headers_mut().insert(AUTHORIZATION, value);

        self.inner.execute(request).await
    }
}

/// Status codes an operation accepts as success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectStatus {
    /// Exactly `200 OK`
    OkOnly,
    /// Any `2xx`
    AnySuccess,
}

impl ExpectStatus {
    /// Returns true if `status` counts as success.
    #[must_use]
    pub fn accepts(self, status: StatusCode) -> bool {
        match self {
            Self::OkOnly => status == StatusCode::OK,
            Self::AnySuccess => status.is_success(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    data: T,
}

/// Request builder and response decoder bound to one API base URL.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    base_url: Url,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Create a client sending through `transport` to `base_url`
    /// (e.g. `https://pve:8006/api2/json`).
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, base_url: Url) -> Self {
        Self {
            transport,
            base_url,
        }
    }

    /// API base URL.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Same base URL, different transport.
    #[must_use]
    pub fn with_transport(&self, transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            base_url: self.base_url.clone(),
        }
    }

    /// Resolve path segments below the base URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEndpoint`] if the base URL cannot carry a path.
    pub fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| {
                Error::InvalidEndpoint(format!("`{}` cannot be a base URL", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Build a request for `segments`, with an optional form body.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL cannot be built.
    pub fn request(
        &self,
        method: Method,
        segments: &[&str],
        form: Option<&FormParams>,
    ) -> Result<Request> {
        let mut request = Request::new(method, self.endpoint(segments)?);
        let headers = request.headers_mut();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(FORM_CONTENT_TYPE));
        if let Some(form) = form {
            *request.body_mut() = Some(Body::from(form.encode()));
        }
        Ok(request)
    }

    /// Send a prepared request and check its status.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Status`] carrying the response body when the status is
    /// not accepted, or the transport error.
    pub async fn send(&self, request: Request, expect: ExpectStatus) -> Result<Response> {
        let method = request.method().clone();
        let path = request.url().path().to_string();
        debug!(method = %method, path = %path, "Sending PVE request");

        let response = self.transport.execute(request).await?;
        let status = response.status();
        if expect.accepts(status) {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        debug!(method = %method, path = %path, status = status.as_u16(), "PVE request rejected");
        Err(Error::Status {
            status: status.as_u16(),
            message: format!("{method} {path}: {}", text.trim()),
        })
    }

    /// Unwrap the `data` member of a response envelope.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if the body is not an envelope holding a `T`.
    pub async fn decode<T>(response: Response) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let path = response.url().path().to_string();
        let body = response.bytes().await?;
        serde_json::from_slice::<ApiResponse<T>>(&body)
            .map(|envelope| envelope.data)
            .map_err(|err| Error::Decode(format!("Failed to parse response for `{path}`: {err}")))
    }

    /// Send a request and decode the enveloped payload.
    ///
    /// # Errors
    ///
    /// Returns transport, status or decode errors.
    pub async fn call<T>(
        &self,
        method: Method,
        segments: &[&str],
        form: Option<&FormParams>,
        expect: ExpectStatus,
    ) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let request = self.request(method, segments, form)?;
        let response = self.send(request, expect).await?;
        Self::decode(response).await
    }

    /// Send a request whose response body is not needed.
    ///
    /// # Errors
    ///
    /// Returns transport or status errors.
    pub async fn call_unit(
        &self,
        method: Method,
        segments: &[&str],
        form: Option<&FormParams>,
        expect: ExpectStatus,
    ) -> Result<()> {
        let request = self.request(method, segments, form)?;
        self.send(request, expect).await.map(drop)
    }
}
