//! Parallel fan-out of independent requests over one connector.

use anyhow::{Context, Result};
use futures_util::StreamExt;
use futures_util::stream;
use log::info;
use reqwest::Method;
use serde_json::Value;

use crate::connector::Connector;
use crate::error::ConfigError;
use crate::request::RequestSpec;
use crate::response::Response;

/// Upper bound on requests in flight for one batch call.
pub const DEFAULT_BATCH_CONCURRENCY: usize = 8;

impl Connector {
    /// Executes independent requests concurrently and returns their
    /// responses in completion order, not submission order.
    ///
    /// Fail-fast and all-or-nothing: the first error aborts aggregation and
    /// is returned with the originating request named in its context;
    /// responses collected before it are discarded, and dropping the stream
    /// cancels whatever is still in flight. Callers needing to pair
    /// responses with endpoints must track the association themselves.
    pub async fn request_many(&self, specs: Vec<RequestSpec>) -> Result<Vec<Response>> {
        self.request_many_with_limit(specs, DEFAULT_BATCH_CONCURRENCY)
            .await
    }

    /// [`request_many`](Self::request_many) with an explicit concurrency cap.
    pub async fn request_many_with_limit(
        &self,
        specs: Vec<RequestSpec>,
        limit: usize,
    ) -> Result<Vec<Response>> {
        if specs.is_empty() {
            return Ok(Vec::new());
        }
        let total = specs.len();
        info!("Dispatching {} parallel requests", total);

        let mut pending = stream::iter(specs.into_iter().map(|spec| {
            let label = spec.to_string();
            async move {
                self.request(spec)
                    .await
                    .with_context(|| format!("Batch request '{}' failed", label))
            }
        }))
        .buffer_unordered(limit.max(1));

        let mut responses = Vec::with_capacity(total);
        while let Some(result) = pending.next().await {
            responses.push(result?);
        }
        Ok(responses)
    }

    /// Concurrent GETs against a list of endpoints.
    pub async fn get_many<I, S>(&self, endpoints: I) -> Result<Vec<Response>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let specs = endpoints.into_iter().map(RequestSpec::get).collect();
        self.request_many(specs).await
    }

    /// Concurrent POSTs; `bodies` is aligned by index to `endpoints`.
    pub async fn post_many<I, S>(&self, endpoints: I, bodies: Vec<Value>) -> Result<Vec<Response>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let specs = paired_specs(Method::POST, endpoints, bodies)?;
        self.request_many(specs).await
    }

    /// Concurrent PUTs; `bodies` is aligned by index to `endpoints`.
    pub async fn put_many<I, S>(&self, endpoints: I, bodies: Vec<Value>) -> Result<Vec<Response>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let specs = paired_specs(Method::PUT, endpoints, bodies)?;
        self.request_many(specs).await
    }

    /// Concurrent PATCHes; `bodies` is aligned by index to `endpoints`.
    pub async fn patch_many<I, S>(&self, endpoints: I, bodies: Vec<Value>) -> Result<Vec<Response>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let specs = paired_specs(Method::PATCH, endpoints, bodies)?;
        self.request_many(specs).await
    }

    /// Concurrent DELETEs against a list of endpoints.
    pub async fn delete_many<I, S>(&self, endpoints: I) -> Result<Vec<Response>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let specs = endpoints.into_iter().map(RequestSpec::delete).collect();
        self.request_many(specs).await
    }
}

fn paired_specs<I, S>(
    method: Method,
    endpoints: I,
    bodies: Vec<Value>,
) -> Result<Vec<RequestSpec>, ConfigError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let endpoints: Vec<String> = endpoints.into_iter().map(Into::into).collect();
    if endpoints.len() != bodies.len() {
        return Err(ConfigError::BatchLengthMismatch {
            endpoints: endpoints.len(),
            values: bodies.len(),
        });
    }
    Ok(endpoints
        .into_iter()
        .zip(bodies)
        .map(|(endpoint, body)| RequestSpec::new(method.clone(), endpoint).body(body))
        .collect())
}
