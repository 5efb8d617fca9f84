//! Typed error values surfaced through `anyhow`.

use reqwest::StatusCode;

/// Configuration rejected at construction time. Never retried.
#[derive(Debug)]
pub enum ConfigError {
    /// Base URL is empty, relative, or not http/https.
    InvalidBaseUrl(String),
    /// Retry parameters violate their invariants (e.g. negative backoff).
    InvalidRetryPolicy(String),
    /// A header name or value could not be encoded.
    InvalidHeader(String),
    /// A batch convenience was given lists of mismatched lengths.
    BatchLengthMismatch { endpoints: usize, values: usize },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidBaseUrl(url) => {
                write!(f, "Invalid base URL '{}': must be an absolute http or https URL", url)
            }
            ConfigError::InvalidRetryPolicy(msg) => {
                write!(f, "Invalid retry policy: {}", msg)
            }
            ConfigError::InvalidHeader(msg) => {
                write!(f, "Invalid header: {}", msg)
            }
            ConfigError::BatchLengthMismatch { endpoints, values } => {
                write!(
                    f,
                    "Batch list length mismatch: {} endpoints but {} values",
                    endpoints, values
                )
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// A response with a status that is >= 400 and not retryable.
///
/// Raised on the first attempt, with zero retries performed. Carries the
/// final URL and response body so callers can diagnose the failure.
#[derive(Debug)]
pub struct FatalHttpError {
    pub status: StatusCode,
    pub url: String,
    pub body: String,
}

impl std::fmt::Display for FatalHttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HTTP {} from {}", self.status.as_u16(), self.url)?;
        if !self.body.is_empty() {
            write!(f, ": {}", self.body)?;
        }
        Ok(())
    }
}

impl std::error::Error for FatalHttpError {}
