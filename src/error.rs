//! Error taxonomy for durable HTTP calls.
//!
//! Every failure propagates out of [`DurableHttpClient::execute`] as a
//! [`DurableHttpError`]. Nothing is retried or swallowed here; the
//! surrounding engine decides whether its own retry policy applies.
//!
//! [`DurableHttpClient::execute`]: crate::orchestrator::DurableHttpClient::execute

use std::time::Duration;

use crate::types::DurableHttpResponse;

/// The physical exchange could not be completed (DNS failure, connection
/// reset, malformed response, per-call timeout).
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    message: String,
    #[source]
    source: Option<anyhow::Error>,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(message: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A token source failed to produce a bearer token.
#[derive(Debug, thiserror::Error)]
#[error("token acquisition failed: {message}")]
pub struct AuthError {
    message: String,
    #[source]
    source: Option<anyhow::Error>,
}

impl AuthError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(message: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Encoding or decoding a history payload failed.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode history payload: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode history payload: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Configuration could not be loaded or is invalid.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Top-level error returned by the durable call orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum DurableHttpError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Only raised under [`TimeoutPolicy::Fail`]; the default policy returns
    /// the last response instead.
    ///
    /// [`TimeoutPolicy::Fail`]: crate::config::TimeoutPolicy::Fail
    #[error("asynchronous operation still pending after {elapsed:?} (last status {})", .last_response.status_code)]
    TimeoutExceeded {
        elapsed: Duration,
        last_response: Box<DurableHttpResponse>,
    },

    #[error("durable http call was cancelled")]
    Cancelled,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("step history failed: {0}")]
    History(#[source] anyhow::Error),
}

impl DurableHttpError {
    /// The last observed response, when the error carries one.
    pub fn last_response(&self) -> Option<&DurableHttpResponse> {
        match self {
            DurableHttpError::TimeoutExceeded { last_response, .. } => Some(last_response.as_ref()),
            _ => None,
        }
    }
}
