//! Single request/response round trips against the homeserver.

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use client_core::{ClientError, CredentialSource, ErrorCategory};
use reqwest::{Method, header::CONTENT_TYPE};
use serde_json::Value;
use thiserror::Error;
use tracing::trace;
use url::Url;

const USER_AGENT: &str = concat!("client-matrix/", env!("CARGO_PKG_VERSION"));

/// Payload attached to a request.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(Value),
    Bytes { content_type: String, data: Vec<u8> },
}

/// One call against the client-server API.
#[derive(Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    /// Absolute API path such as `/_matrix/client/v3/sync`, already percent-encoded.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<RequestBody>,
    /// Attach the current bearer token.
    pub authenticated: bool,
    /// Bearer token to present instead of the stored session's.
    pub access_token: Option<String>,
    /// Overall timeout for this request; the transport default applies when `None`.
    pub timeout: Option<Duration>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            authenticated: true,
            access_token: None,
            timeout: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn with_json(mut self, body: Value) -> Self {
        self.body = Some(RequestBody::Json(body));
        self
    }

    pub fn with_bytes(mut self, content_type: impl Into<String>, data: Vec<u8>) -> Self {
        self.body = Some(RequestBody::Bytes {
            content_type: content_type.into(),
            data,
        });
        self
    }

    pub fn with_query(mut self, query: Vec<(String, String)>) -> Self {
        self.query = query;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Send without an `Authorization` header (login endpoints).
    pub fn unauthenticated(mut self) -> Self {
        self.authenticated = false;
        self
    }

    /// Authenticate with `token` rather than the stored session, e.g. to vet a
    /// candidate token without disturbing the live one.
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.authenticated = true;
        self.access_token = Some(token.into());
        self
    }

    /// Value of a query parameter, if present.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Debug for ApiRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiRequest")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("query", &self.query)
            .field("body", &self.body)
            .field("authenticated", &self.authenticated)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Failure of a single round trip.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Connection refused, reset, DNS failure and the like.
    #[error("network error: {0}")]
    Network(String),
    /// The client-side timeout elapsed (distinct from the server's long-poll timeout).
    #[error("request timed out")]
    Timeout,
    /// The homeserver answered with a non-success status.
    #[error("homeserver responded with status {status}")]
    Status { status: u16, body: String },
    /// An authenticated request was issued while no token is available.
    #[error("no access token available for an authenticated request")]
    MissingCredential,
    /// The request could not be built (bad path or homeserver URL).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl From<TransportError> for ClientError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Network(message) => {
                ClientError::new(ErrorCategory::Network, "network_error", message)
            }
            TransportError::Timeout => ClientError::new(
                ErrorCategory::Network,
                "request_timeout",
                "request timed out",
            ),
            TransportError::Status { status, body } => ClientError::from_http_status(status, &body),
            TransportError::MissingCredential => ClientError::new(
                ErrorCategory::Auth,
                "missing_credential",
                "no access token available for an authenticated request",
            ),
            TransportError::InvalidRequest(message) => {
                ClientError::new(ErrorCategory::Config, "invalid_request", message)
            }
        }
    }
}

/// Performs one HTTP round trip and returns the raw response body.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(&self, request: ApiRequest) -> Result<String, TransportError>;
}

/// `reqwest`-backed transport bound to one homeserver.
#[derive(Clone)]
pub struct HttpTransport {
    base_url: Url,
    http: reqwest::Client,
    credentials: Arc<dyn CredentialSource>,
}

impl HttpTransport {
    pub fn new(homeserver: &str, credentials: Arc<dyn CredentialSource>) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| {
                ClientError::new(ErrorCategory::Config, "http_client_build_error", err.to_string())
            })?;
        Self::with_http_client(homeserver, http, credentials)
    }

    pub fn with_http_client(
        homeserver: &str,
        http: reqwest::Client,
        credentials: Arc<dyn CredentialSource>,
    ) -> Result<Self, ClientError> {
        Ok(Self {
            base_url: parse_homeserver(homeserver)?,
            http,
            credentials,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url_for(&self, request: &ApiRequest) -> Result<Url, TransportError> {
        let mut url = self
            .base_url
            .join(request.path.trim_start_matches('/'))
            .map_err(|err| TransportError::InvalidRequest(format!("{}: {err}", request.path)))?;
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(
                request
                    .query
                    .iter()
                    .map(|(key, value)| (key.as_str(), value.as_str())),
            );
        }
        Ok(url)
    }
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url.as_str())
            .finish()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(&self, request: ApiRequest) -> Result<String, TransportError> {
        let url = self.url_for(&request)?;
        trace!(method = %request.method, path = %request.path, "sending request");

        let mut builder = self.http.request(request.method.clone(), url);
        if request.authenticated {
            let token = request
                .access_token
                .clone()
                .or_else(|| self.credentials.current_token())
                .ok_or(TransportError::MissingCredential)?;
            builder = builder.bearer_auth(token);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        builder = match request.body {
            Some(RequestBody::Json(body)) => builder.json(&body),
            Some(RequestBody::Bytes { content_type, data }) => {
                builder.header(CONTENT_TYPE, content_type).body(data)
            }
            None => builder,
        };

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        let body = response.text().await.map_err(map_reqwest_error)?;
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

fn parse_homeserver(homeserver: &str) -> Result<Url, ClientError> {
    let mut url = Url::parse(homeserver.trim()).map_err(|err| {
        ClientError::new(
            ErrorCategory::Config,
            "invalid_homeserver",
            format!("invalid homeserver url '{homeserver}': {err}"),
        )
    })?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Network(err.to_string())
    }
}
