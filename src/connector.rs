//! Connector: configuration, request building and final-status handling.

use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, info, warn};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Url};
use serde_json::Value;

use crate::error::{ConfigError, FatalHttpError};
use crate::request::RequestSpec;
use crate::response::Response;
use crate::retry::{Outcome, RetryPolicy};
use crate::transport::Transport;

/// Long-lived client for one base service.
///
/// Owns the transport (and with it the connection pool); clones share both.
/// Construction goes through [`Connector::builder`], which validates the
/// configuration up front.
#[derive(Debug, Clone)]
pub struct Connector {
    base_url: String,
    default_headers: HeaderMap,
    auth: Option<HeaderValue>,
    transport: Transport,
}

impl Connector {
    pub fn builder(base_url: impl Into<String>) -> ConnectorBuilder {
        ConnectorBuilder::new(base_url)
    }

    /// The normalized base URL, without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Joins the base URL and an endpoint with exactly one slash, whatever
    /// the endpoint's leading slashes.
    pub fn url_for(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    /// Merges header sources in precedence order: built-in JSON defaults,
    /// connector defaults, per-call overrides, then the bearer token, which
    /// always wins for `Authorization` when configured.
    ///
    /// Pure: same inputs, same output, no I/O.
    pub fn build_headers(&self, per_call: Option<&HeaderMap>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        for (name, value) in &self.default_headers {
            headers.insert(name.clone(), value.clone());
        }
        if let Some(overrides) = per_call {
            for (name, value) in overrides {
                headers.insert(name.clone(), value.clone());
            }
        }
        if let Some(auth) = &self.auth {
            headers.insert(AUTHORIZATION, auth.clone());
        }
        headers
    }

    /// Dispatches one request and classifies the final response.
    ///
    /// A retryable status that survived the transport's retries is returned
    /// as an ordinary [`Response`] so the caller can inspect it; a fatal
    /// status becomes a [`FatalHttpError`] carrying status and body.
    #[tracing::instrument(skip(self, spec), fields(request = %spec))]
    pub async fn request(&self, spec: RequestSpec) -> Result<Response> {
        let url = self.url_for(&spec.endpoint);
        let headers = self.build_headers(spec.headers.as_ref());
        info!("{} {}", spec.method, url);
        if !spec.query.is_empty() {
            debug!("Query parameters: {:?}", spec.query);
        }

        let response = self
            .transport
            .execute(
                spec.method.clone(),
                &url,
                headers,
                &spec.query,
                spec.body.as_ref(),
            )
            .await?;

        match self.transport.policy().classify(response.status) {
            Outcome::Success => {
                debug!("{} {} returned status {}", spec.method, url, response.status);
                Ok(response)
            }
            Outcome::Retryable => {
                warn!(
                    "{} {} still returned retryable status {} after retries",
                    spec.method, url, response.status
                );
                Ok(response)
            }
            Outcome::Fatal => {
                let error = FatalHttpError {
                    status: response.status,
                    url,
                    body: response.text(),
                };
                warn!("{} {} failed: {}", spec.method, error.url, error);
                Err(error.into())
            }
        }
    }

    pub async fn get(&self, endpoint: &str) -> Result<Response> {
        self.request(RequestSpec::get(endpoint)).await
    }

    pub async fn post(&self, endpoint: &str, body: Value) -> Result<Response> {
        self.request(RequestSpec::post(endpoint).body(body)).await
    }

    pub async fn put(&self, endpoint: &str, body: Value) -> Result<Response> {
        self.request(RequestSpec::put(endpoint).body(body)).await
    }

    pub async fn patch(&self, endpoint: &str, body: Value) -> Result<Response> {
        self.request(RequestSpec::patch(endpoint).body(body)).await
    }

    pub async fn delete(&self, endpoint: &str) -> Result<Response> {
        self.request(RequestSpec::delete(endpoint)).await
    }
}

/// Validating builder for [`Connector`].
pub struct ConnectorBuilder {
    base_url: String,
    default_headers: HeaderMap,
    extra_headers: Vec<(String, String)>,
    auth_token: Option<String>,
    retry_policy: RetryPolicy,
    timeout: Option<Duration>,
}

impl ConnectorBuilder {
    fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            default_headers: HeaderMap::new(),
            extra_headers: Vec::new(),
            auth_token: None,
            retry_policy: RetryPolicy::default(),
            timeout: None,
        }
    }

    /// Replace the connector-level default headers.
    pub fn default_headers(mut self, headers: HeaderMap) -> Self {
        self.default_headers = headers;
        self
    }

    /// Add one connector-level default header. Validated at build time.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((name.into(), value.into()));
        self
    }

    /// Bearer token sent as `Authorization` on every request.
    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Bound on a single network call, not on the whole retry sequence.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<Connector> {
        let base_url = validate_base_url(&self.base_url)?;
        self.retry_policy.validate()?;

        let mut default_headers = self.default_headers;
        for (name, value) in &self.extra_headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ConfigError::InvalidHeader(format!("name '{}': {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ConfigError::InvalidHeader(format!("value for '{}': {}", name, e)))?;
            default_headers.insert(name, value);
        }

        let auth = match &self.auth_token {
            Some(token) => {
                let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
                    .map_err(|e| ConfigError::InvalidHeader(format!("auth token: {}", e)))?;
                value.set_sensitive(true);
                debug!("Connector configured with bearer authentication");
                Some(value)
            }
            None => None,
        };

        let mut client = Client::builder().user_agent(concat!("girder/", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = self.timeout {
            client = client.timeout(timeout);
        }
        let client = client.build().context("Failed to build HTTP client")?;

        Ok(Connector {
            base_url,
            default_headers,
            auth,
            transport: Transport::new(client, self.retry_policy),
        })
    }
}

fn validate_base_url(base_url: &str) -> Result<String, ConfigError> {
    let trimmed = base_url.trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(ConfigError::InvalidBaseUrl(base_url.to_string()));
    }
    let parsed =
        Url::parse(trimmed).map_err(|_| ConfigError::InvalidBaseUrl(base_url.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidBaseUrl(base_url.to_string()));
    }
    Ok(trimmed.to_string())
}
