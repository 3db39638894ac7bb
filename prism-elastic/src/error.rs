//! Client error types

use crate::request::Response;
use serde::Deserialize;
use thiserror::Error;

/// Boxed error produced by a [`Transport`](crate::Transport) implementation.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while talking to the cluster
#[derive(Error, Debug)]
pub enum Error {
    /// The request body could not be encoded; no node was contacted.
    #[error("failed to serialize request body: {0}")]
    Serialization(#[source] serde_json::Error),

    /// Connection-level failure (DNS, refused, TLS, reset) before a full response arrived.
    #[error("transport error talking to {url}: {}", describe_boxed(.source))]
    Transport {
        url: String,
        #[source]
        source: BoxError,
    },

    /// The caller cancelled the request.
    #[error("request cancelled")]
    Cancelled,

    /// The caller's deadline passed before the request completed.
    #[error("request deadline exceeded")]
    DeadlineExceeded,

    /// The node answered with a status that is neither 2xx nor ignored.
    #[error("{}", status_message(.response, .details))]
    Status {
        response: Box<Response>,
        details: Option<ErrorDetails>,
    },

    #[error("response body exceeds the limit of {limit} bytes")]
    ResponseTooLarge { limit: u64 },

    /// The pool is empty or every node is backing off.
    #[error("no node available")]
    NoConnection,

    /// Sniffing did not return a usable node from any candidate.
    #[error("no nodes found")]
    NoNodesFound,

    #[error("health check timed out: {0}")]
    HealthCheckTimeout(String),

    #[error("plugin {0} not found")]
    PluginNotFound(String),

    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to decode response: {0}")]
    Decode(#[source] serde_json::Error),
}

impl Error {
    /// Get the error type as a string for metrics labeling
    pub fn error_type(&self) -> &'static str {
        match self {
            Error::Serialization(_) => "serialization",
            Error::Transport { .. } => "transport",
            Error::Cancelled => "cancelled",
            Error::DeadlineExceeded => "deadline_exceeded",
            Error::Status { .. } => "status",
            Error::ResponseTooLarge { .. } => "response_too_large",
            Error::NoConnection => "no_connection",
            Error::NoNodesFound => "no_nodes_found",
            Error::HealthCheckTimeout(_) => "health_check_timeout",
            Error::PluginNotFound(_) => "plugin_not_found",
            Error::InvalidUrl { .. } => "invalid_url",
            Error::Config(_) => "config",
            Error::Decode(_) => "decode",
        }
    }

    /// True when the cluster could not be reached at all.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Error::Transport { .. } | Error::NoConnection | Error::HealthCheckTimeout(_)
        )
    }

    /// True when the caller gave up (cancellation or deadline).
    pub fn is_context_error(&self) -> bool {
        matches!(self, Error::Cancelled | Error::DeadlineExceeded)
    }

    /// HTTP status of a [`Error::Status`] error.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Status { response, .. } => Some(response.status_code()),
            _ => None,
        }
    }

    /// Response that accompanied a [`Error::Status`] error.
    pub fn response(&self) -> Option<&Response> {
        match self {
            Error::Status { response, .. } => Some(response),
            _ => None,
        }
    }

    /// Decoded engine error payload, if the body carried one.
    pub fn details(&self) -> Option<&ErrorDetails> {
        match self {
            Error::Status { details, .. } => details.as_ref(),
            _ => None,
        }
    }

    pub(crate) fn from_status(response: Response) -> Self {
        let details = ErrorDetails::from_body(response.body());
        Error::Status {
            response: Box::new(response),
            details,
        }
    }
}

/// Error payload returned by the engine alongside a non-2xx status
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ErrorDetails {
    #[serde(rename = "type")]
    pub kind: String,
    pub reason: String,
    #[serde(default)]
    pub index: Option<String>,
    #[serde(default)]
    pub resource_id: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorPayload,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorPayload {
    Structured(ErrorDetails),
    Plain(String),
}

impl ErrorDetails {
    /// Decode `{"error": {...}, "status": N}` or `{"error": "..."}` bodies.
    pub fn from_body(body: &[u8]) -> Option<Self> {
        let envelope: ErrorEnvelope = serde_json::from_slice(body).ok()?;
        match envelope.error {
            ErrorPayload::Structured(details) => Some(details),
            ErrorPayload::Plain(reason) => Some(ErrorDetails {
                kind: String::new(),
                reason,
                index: None,
                resource_id: None,
            }),
        }
    }
}

fn status_message(response: &Response, details: &Option<ErrorDetails>) -> String {
    let status = response.status();
    let mut message = format!(
        "HTTP {} ({}) from {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("unknown"),
        response.url()
    );
    if let Some(details) = details {
        message.push_str(": ");
        message.push_str(&details.reason);
        if !details.kind.is_empty() {
            message.push_str(&format!(" [type={}]", details.kind));
        }
    }
    message
}

fn describe_boxed(err: &BoxError) -> String {
    let err: &(dyn std::error::Error + 'static) = &**err;
    describe(err)
}

/// Render an error together with its source chain.
pub(crate) fn describe(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !message.contains(&cause_text) {
            message.push_str(": ");
            message.push_str(&cause_text);
        }
        source = cause.source();
    }
    message
}

impl Error {
    pub(crate) fn invalid_url(url: &str, reason: impl std::fmt::Display) -> Self {
        Error::InvalidUrl {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
