//! HTTP relay to the woken device
//!
//! Requests are forwarded through a pooled hyper client with only the
//! authority and `Host` header rewritten. Bodies are passed through as
//! streams in both directions, so long-lived responses reach the caller
//! chunk by chunk.

use http_body_util::{combinators::BoxBody, BodyExt};
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, HOST};
use hyper::{Request, Response, Uri, Version};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Error type for relay operations
#[derive(Debug, Error)]
pub enum RelayError {
    /// The outbound request could not be built
    #[error("request build error: {0}")]
    RequestBuild(String),
    /// The backend could not be reached or failed mid-response
    #[error("client error: {0}")]
    Client(#[from] hyper_util::client::legacy::Error),
    /// The inbound request was cancelled before the backend answered
    #[error("relay cancelled")]
    Cancelled,
}

/// Configuration for the backend connection pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum idle connections per host
    pub max_idle_per_host: usize,
    /// Idle connection timeout
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: 10,
            idle_timeout: Duration::from_secs(90),
        }
    }
}

/// Forwards requests to a single backend authority
pub struct Relay {
    client: Client<HttpConnector, Incoming>,
    authority: String,
    host_header: HeaderValue,
}

impl Relay {
    /// Create a relay for `authority` (`ip:port`)
    pub fn new(authority: String, config: &PoolConfig) -> Result<Self, RelayError> {
        let host_header = HeaderValue::from_str(&authority)
            .map_err(|e| RelayError::RequestBuild(format!("invalid authority {:?}: {}", authority, e)))?;

        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);
        connector.enforce_http(true);

        // No request timeout: streamed responses may run indefinitely
        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(config.max_idle_per_host)
            .pool_idle_timeout(config.idle_timeout)
            .http1_preserve_header_case(true)
            .build(connector);

        debug!(
            %authority,
            max_idle = config.max_idle_per_host,
            idle_timeout_secs = config.idle_timeout.as_secs(),
            "Relay client initialized"
        );

        Ok(Self {
            client,
            authority,
            host_header,
        })
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Forward `req` to the backend and return its response with the body
    /// still streaming.
    ///
    /// Cancelling `cancel` abandons the call while waiting for response
    /// headers. Once the response is returned, dropping its body closes the
    /// backend connection.
    pub async fn forward(
        &self,
        req: Request<Incoming>,
        cancel: &CancellationToken,
    ) -> Result<Response<BoxBody<Bytes, hyper::Error>>, RelayError> {
        let backend_req = self.rewrite(req)?;

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RelayError::Cancelled),
            result = self.client.request(backend_req) => result?,
        };

        let (parts, body) = response.into_parts();
        Ok(Response::from_parts(parts, body.boxed()))
    }

    /// Point `req` at the backend, keeping method, path, query, headers
    /// (including repeated ones) and body untouched apart from `Host`.
    fn rewrite<B>(&self, req: Request<B>) -> Result<Request<B>, RelayError> {
        let path = req.uri().path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        let uri: Uri = format!("http://{}{}", self.authority, path)
            .parse()
            .map_err(|e: hyper::http::uri::InvalidUri| RelayError::RequestBuild(e.to_string()))?;

        let (mut parts, body) = req.into_parts();
        parts.uri = uri;
        // The pooled client speaks HTTP/1.1 to the device regardless of the inbound protocol
        parts.version = Version::HTTP_11;
        parts.headers.insert(HOST, self.host_header.clone());

        Ok(Request::from_parts(parts, body))
    }
}
