//! Error taxonomy for the brief pipeline.
//!
//! Two families live here:
//! - [`ConfigError`]: fatal pre-flight problems. These abort the process before
//!   any provider call is made and no report is written.
//! - [`ProviderError`]: the outcome of one failed provider call. The retrieval
//!   controller inspects [`ProviderError::is_transient`] to decide whether a
//!   query gets its second attempt; none of these ever abort the run.

use crate::models::ErrorKind;
use std::path::PathBuf;
use thiserror::Error;

/// Pre-flight configuration failures.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The API token was not present in the environment.
    #[error("ANTHROPIC_API_KEY not set")]
    MissingCredential,

    /// The query file does not hold exactly one descriptor per budgeted call.
    #[error("query source has {found} entries, expected exactly {expected}")]
    QueryCount { found: usize, expected: usize },

    /// Two descriptors share a tag.
    #[error("duplicate query tag: {0}")]
    DuplicateTag(String),

    #[error("failed to read query source {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse query source {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// A failed provider call, already classified.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// HTTP 429.
    #[error("rate limited (HTTP 429): {0}")]
    RateLimited(String),

    /// HTTP 5xx.
    #[error("server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    /// Connection, DNS or body transfer failure.
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    /// Any other 4xx.
    #[error("client error (HTTP {status}): {message}")]
    Client { status: u16, message: String },

    /// 400-class rejection of the output schema field itself.
    #[error("output schema unsupported (HTTP {status}): {message}")]
    SchemaUnsupported { status: u16, message: String },

    /// The reply broke the JSON-array-of-two contract.
    #[error("response contract violated: {0}")]
    Contract(String),

    /// The provider stopped with a truncation or refusal stop reason.
    #[error("provider stopped early ({0})")]
    Stopped(String),
}

impl ProviderError {
    /// Whether the failure is worth a second attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited(_)
                | ProviderError::Server { .. }
                | ProviderError::Network(_)
                | ProviderError::Timeout(_)
        )
    }

    /// Report-facing classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::RateLimited(_) => ErrorKind::RateLimited,
            ProviderError::Server { .. } => ErrorKind::ServerError,
            ProviderError::Network(_) => ErrorKind::Network,
            ProviderError::Timeout(_) => ErrorKind::Timeout,
            ProviderError::Client { .. } | ProviderError::SchemaUnsupported { .. } => {
                ErrorKind::ClientError
            }
            ProviderError::Contract(_) => ErrorKind::Contract,
            ProviderError::Stopped(_) => ErrorKind::Stopped,
        }
    }

    /// Classify a non-success HTTP status and its body.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = body.to_string();
        match status {
            429 => ProviderError::RateLimited(message),
            500..=599 => ProviderError::Server { status, message },
            _ => ProviderError::Client { status, message },
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return ProviderError::Timeout(e.to_string());
        }
        if let Some(status) = e.status() {
            return ProviderError::from_status(status.as_u16(), &e.to_string());
        }
        if e.is_decode() {
            return ProviderError::Contract(e.to_string());
        }
        ProviderError::Network(e.to_string())
    }
}
