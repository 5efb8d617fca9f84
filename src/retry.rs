//! Retry policy: outcome classification, retry predicate and exponential backoff.

use std::collections::HashSet;
use std::time::Duration;

use reqwest::{Method, StatusCode};

use crate::error::ConfigError;

/// Default maximum number of retries after the initial attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default backoff factor in seconds.
pub const DEFAULT_BACKOFF_FACTOR: f64 = 0.3;

/// Status codes retried by default: request timeout, too many requests,
/// and the transient 5xx family.
pub const DEFAULT_RETRYABLE_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Classification of a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Status < 400; hand the response back.
    Success,
    /// Status is in the retryable set; worth another attempt.
    Retryable,
    /// Client or server error that will not succeed on retry.
    Fatal,
}

/// Immutable retry configuration shared by a connector's transport.
///
/// Pure decision logic: classification, the retry predicate and the backoff
/// schedule do no I/O and are testable without a network.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    backoff_factor: f64,
    retryable_statuses: HashSet<StatusCode>,
    retryable_methods: HashSet<Method>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            retryable_statuses: DEFAULT_RETRYABLE_STATUSES
                .iter()
                .map(|&code| StatusCode::from_u16(code).expect("default status codes are valid"))
                .collect(),
            retryable_methods: [
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::PATCH,
                Method::DELETE,
            ]
            .into_iter()
            .collect(),
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of retries performed after the initial attempt.
    /// A request is attempted at most `max_retries + 1` times.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the backoff multiplier in seconds. Must be finite and >= 0.
    pub fn backoff_factor(mut self, backoff_factor: f64) -> Self {
        self.backoff_factor = backoff_factor;
        self
    }

    /// Replace the set of status codes that trigger a retry.
    pub fn retryable_statuses(mut self, statuses: impl IntoIterator<Item = StatusCode>) -> Self {
        self.retryable_statuses = statuses.into_iter().collect();
        self
    }

    /// Replace the set of methods that may be retried at all.
    pub fn retryable_methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.retryable_methods = methods.into_iter().collect();
        self
    }

    /// Check the numeric invariants. Called by the connector builder.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.backoff_factor.is_finite() {
            return Err(ConfigError::InvalidRetryPolicy(
                "backoff_factor must be finite".to_string(),
            ));
        }
        if self.backoff_factor < 0.0 {
            return Err(ConfigError::InvalidRetryPolicy(format!(
                "backoff_factor must be >= 0 (got {})",
                self.backoff_factor
            )));
        }
        Ok(())
    }

    /// Classify a response status.
    pub fn classify(&self, status: StatusCode) -> Outcome {
        if status.as_u16() < 400 {
            Outcome::Success
        } else if self.retryable_statuses.contains(&status) {
            Outcome::Retryable
        } else {
            Outcome::Fatal
        }
    }

    /// Whether another attempt is allowed after `attempt` completed attempts.
    /// The first retry asks with `attempt = 1`.
    pub fn should_retry(&self, attempt: u32, method: &Method) -> bool {
        attempt <= self.max_retries && self.retryable_methods.contains(method)
    }

    /// Delay before retry attempt `attempt` (1-indexed):
    /// `backoff_factor * 2^(attempt - 1)` seconds. The initial attempt
    /// (attempt 0) has no delay.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = attempt.saturating_sub(1).min(1023) as i32;
        let secs = self.backoff_factor * 2f64.powi(exponent);
        // Saturate instead of panicking when the schedule outgrows Duration.
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    /// Number of retries after the initial attempt.
    pub fn max_retries_value(&self) -> u32 {
        self.max_retries
    }
}
