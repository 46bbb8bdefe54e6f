//! # API Client
//!
//! The generic HTTP transport for the storefront backend. Thin wrapper around
//! `reqwest` with a retry middleware stack, exposed behind the
//! [`HttpTransport`] trait so the caching layer (and the tests) can swap the
//! network out.
//!
//! ## Key Design Points:
//! - **Retry with backoff**: transient network failures are retried up to
//!   three times with exponential backoff via `reqwest-retry`.
//! - **Non-throwing status handling**: an HTTP error status is a normal
//!   [`ApiOutcome`] with `success == false`, not an `Err`. Only transport
//!   level failures (DNS, connect, decode) surface as [`RetrieveError`].
//! - **Cloneable results**: outcomes and errors are `Clone` so a single
//!   in-flight response can be fanned out to every coalesced waiter.

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, Method, StatusCode};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde_json::Value;
use thiserror::Error;
use url::Url;

/// Errors surfaced by the retrieval layer.
///
/// `Clone` is required so coalesced requests can hand the same failure to
/// every waiter; the underlying error types are not `Clone`, so their
/// display strings are captured instead.
#[derive(Debug, Clone, Error)]
pub enum RetrieveError {
    #[error("invalid request URL: {0}")]
    Url(String),
    #[error("network request failed: {0}")]
    Network(String),
    #[error("failed to decode response body: {0}")]
    Decode(String),
}

/// The uniform result of a backend call.
#[derive(Debug, Clone)]
pub struct ApiOutcome {
    /// Decoded JSON body for successful responses, `Null` otherwise.
    pub data: Value,
    /// Raw body text for non-success responses.
    pub error_body: Option<String>,
    /// HTTP status code.
    pub status: u16,
    /// Whether the status was in the 2xx range.
    pub success: bool,
}

impl ApiOutcome {
    /// Shorthand for a successful outcome carrying `data`.
    pub fn ok(data: Value) -> Self {
        Self {
            data,
            error_body: None,
            status: StatusCode::OK.as_u16(),
            success: true,
        }
    }
}

/// A fully-described request, independent of any concrete HTTP stack.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    /// Path relative to the configured base URL.
    pub path: String,
    /// Optional query parameters (flat JSON object).
    pub params: Option<Value>,
    /// Optional JSON request body.
    pub body: Option<Value>,
}

/// The seam between request policy and the actual network.
///
/// [`ApiClient`] is the production implementation; tests provide mocks.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: TransportRequest) -> Result<ApiOutcome, RetrieveError>;
}

/// Production transport: `reqwest` with retry middleware and bearer auth.
pub struct ApiClient {
    inner: ClientWithMiddleware,
    base_url: Url,
    auth_token: Option<String>,
}

impl ApiClient {
    /// Builds a client rooted at `base_url` (must end with `/` for relative
    /// paths to join correctly).
    pub fn new(base_url: &str, auth_token: Option<String>) -> Result<Self, RetrieveError> {
        let base_url = Url::parse(base_url).map_err(|e| RetrieveError::Url(e.to_string()))?;

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);
        let inner = ClientBuilder::new(Client::new())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            inner,
            base_url,
            auth_token,
        })
    }

    fn build_url(&self, path: &str, params: Option<&Value>) -> Result<Url, RetrieveError> {
        let mut url = self
            .base_url
            .join(path)
            .map_err(|e| RetrieveError::Url(e.to_string()))?;

        if let Some(Value::Object(map)) = params {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in map {
                match value {
                    // Strings go in raw, everything else via its JSON text.
                    Value::String(s) => pairs.append_pair(key, s),
                    other => pairs.append_pair(key, &other.to_string()),
                };
            }
        }

        Ok(url)
    }
}

#[async_trait]
impl HttpTransport for ApiClient {
    async fn execute(&self, request: TransportRequest) -> Result<ApiOutcome, RetrieveError> {
        let url = self.build_url(&request.path, request.params.as_ref())?;

        let mut builder = self.inner.request(request.method.clone(), url);
        if let Some(token) = &self.auth_token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| RetrieveError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let data = response
                .json::<Value>()
                .await
                .map_err(|e| RetrieveError::Decode(e.to_string()))?;
            Ok(ApiOutcome {
                data,
                error_body: None,
                status: status.as_u16(),
                success: true,
            })
        } else {
            let error_body = response.text().await.ok();
            Ok(ApiOutcome {
                data: Value::Null,
                error_body,
                status: status.as_u16(),
                success: false,
            })
        }
    }
}
