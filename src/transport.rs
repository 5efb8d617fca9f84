//! Network exchange with built-in retry for one request at a time.

use anyhow::{Context, Result};
use log::{debug, warn};
use reqwest::header::HeaderMap;
use reqwest::{Client, Method};
use serde_json::Value;

use crate::response::Response;
use crate::retry::{Outcome, RetryPolicy};

/// Owns the shared connection pool and replays a single exchange until the
/// policy says stop.
///
/// `Client` is internally reference-counted and pooled, so a `Transport`
/// clone is cheap and all clones reuse the same connections. Safe to call
/// from many tasks concurrently.
#[derive(Debug, Clone)]
pub struct Transport {
    client: Client,
    policy: RetryPolicy,
}

impl Transport {
    pub fn new(client: Client, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Performs the exchange, re-issuing it with backoff while the outcome
    /// is a retryable status or a transient network failure.
    ///
    /// Returns the final response even when its status is still retryable
    /// after exhaustion; the dispatcher decides what that means. Network
    /// errors are returned only once retries are used up.
    #[tracing::instrument(skip(self, headers, query, body))]
    pub async fn execute(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
        query: &[(String, String)],
        body: Option<&Value>,
    ) -> Result<Response> {
        let payload = match body {
            Some(value) => {
                Some(serde_json::to_vec(value).context("Failed to serialize request body")?)
            }
            None => None,
        };

        let mut attempt: u32 = 0;
        loop {
            let result = self
                .send_once(method.clone(), url, headers.clone(), query, payload.clone())
                .await;

            match result {
                Ok(response) => {
                    let status = response.status();
                    match self.policy.classify(status) {
                        Outcome::Success | Outcome::Fatal => {
                            return Response::read_from(response).await;
                        }
                        Outcome::Retryable => {
                            if !self.policy.should_retry(attempt + 1, &method) {
                                debug!(
                                    "{} {}: status {} still retryable after {} attempts, handing back",
                                    method,
                                    url,
                                    status.as_u16(),
                                    attempt + 1
                                );
                                return Response::read_from(response).await;
                            }
                            let delay = self.policy.backoff_delay(attempt + 1);
                            warn!(
                                "{} {}: attempt {}/{} returned status {}, retrying in {:?}...",
                                method,
                                url,
                                attempt + 1,
                                self.policy.max_retries_value() + 1,
                                status.as_u16(),
                                delay
                            );
                            tokio::time::sleep(delay).await;
                            attempt += 1;
                        }
                    }
                }
                Err(error) => {
                    if !is_transient(&error) || !self.policy.should_retry(attempt + 1, &method) {
                        return Err(error).with_context(|| {
                            format!("{} {} failed after {} attempts", method, url, attempt + 1)
                        });
                    }
                    let delay = self.policy.backoff_delay(attempt + 1);
                    warn!(
                        "{} {}: attempt {}/{} failed ({}), retrying in {:?}...",
                        method,
                        url,
                        attempt + 1,
                        self.policy.max_retries_value() + 1,
                        error,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Single exchange without retry.
    async fn send_once(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
        query: &[(String, String)],
        payload: Option<Vec<u8>>,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let mut request = self.client.request(method, url).headers(headers);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(bytes) = payload {
            request = request.body(bytes);
        }
        request.send().await
    }
}

/// Connection failures, timeouts and mid-exchange resets are worth another
/// attempt; builder and redirect-policy errors are not.
fn is_transient(error: &reqwest::Error) -> bool {
    error.is_connect() || error.is_timeout() || error.is_request() || error.is_body()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    fn transport(policy: RetryPolicy) -> Transport {
        Transport::new(Client::new(), policy)
    }

    #[tokio::test]
    async fn test_execute_success_single_attempt() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/ok")
            .with_status(200)
            .with_body("fine")
            .expect(1)
            .create_async()
            .await;

        let transport = transport(RetryPolicy::default());
        let response = transport
            .execute(
                Method::GET,
                &format!("{}/ok", server.url()),
                HeaderMap::new(),
                &[],
                None,
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.text(), "fine");
    }

    #[tokio::test]
    async fn test_execute_fatal_status_no_retry() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/missing")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;

        let transport = transport(RetryPolicy::default().backoff_factor(0.0));
        let response = transport
            .execute(
                Method::GET,
                &format!("{}/missing", server.url()),
                HeaderMap::new(),
                &[],
                None,
            )
            .await
            .unwrap();

        // The transport hands the fatal response back untouched; raising is
        // the dispatcher's job.
        mock.assert_async().await;
        assert_eq!(response.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_execute_retryable_status_exhausts_and_returns_response() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/busy")
            .with_status(503)
            .with_body("overloaded")
            .expect(3)
            .create_async()
            .await;

        let transport = transport(RetryPolicy::default().max_retries(2).backoff_factor(0.0));
        let response = transport
            .execute(
                Method::GET,
                &format!("{}/busy", server.url()),
                HeaderMap::new(),
                &[],
                None,
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.text(), "overloaded");
    }

    #[tokio::test]
    async fn test_execute_non_retryable_method_single_attempt() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/busy")
            .with_status(503)
            .expect(1)
            .create_async()
            .await;

        let policy = RetryPolicy::default()
            .backoff_factor(0.0)
            .retryable_methods([Method::GET]);
        let transport = transport(policy);
        let response = transport
            .execute(
                Method::POST,
                &format!("{}/busy", server.url()),
                HeaderMap::new(),
                &[],
                None,
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_execute_query_and_body_forwarded() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/widgets?page=2")
            .match_body(mockito::Matcher::JsonString(r#"{"name": "w"}"#.to_string()))
            .with_status(201)
            .expect(1)
            .create_async()
            .await;

        let transport = transport(RetryPolicy::default());
        let body = serde_json::json!({"name": "w"});
        let response = transport
            .execute(
                Method::POST,
                &format!("{}/widgets", server.url()),
                HeaderMap::new(),
                &[("page".to_string(), "2".to_string())],
                Some(&body),
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.status, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_execute_connection_refused_errors_after_exhaustion() {
        // Nothing listens on port 1; every attempt fails at connect.
        let transport = transport(RetryPolicy::default().max_retries(1).backoff_factor(0.0));
        let result = transport
            .execute(
                Method::GET,
                "http://127.0.0.1:1/unreachable",
                HeaderMap::new(),
                &[],
                None,
            )
            .await;

        let error = result.unwrap_err();
        assert!(error.to_string().contains("failed after 2 attempts"));
    }
}
