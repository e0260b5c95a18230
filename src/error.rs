//! Error type shared by the gateway, the sanitizer and the flow engine.
//!
//! Node errors keep their kind as they travel up: a flow wraps them in
//! [`FlowError::FlowAborted`] and the retry loop in
//! [`FlowError::ExecutionExhausted`], and [`FlowError::root_cause`] walks back
//! down to the original failure.

use std::time::Duration;
use thiserror::Error;

/// Errors produced by the gateway, the sanitizer and the flow engine.
#[derive(Error, Debug)]
pub enum FlowError {
    /// Low-level HTTP transport failure (connection refused, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// HTTP error with status code, response body, and optional Retry-After hint.
    ///
    /// Returned by [`Backend`](crate::backend::Backend) implementations when
    /// the provider returns a non-success status code.
    #[error("HTTP {status}: {body}")]
    HttpError {
        /// HTTP status code (e.g. 429, 500, 503).
        status: u16,
        /// Response body text.
        body: String,
        /// Parsed `Retry-After` header value, if present.
        retry_after: Option<Duration>,
    },

    /// The model returned nothing but whitespace.
    #[error("empty response from LLM{}", stage_suffix(.stage))]
    EmptyResponse {
        /// Stage that received the blank reply, once known.
        stage: Option<String>,
    },

    /// The sanitized response is not valid JSON.
    ///
    /// `content` is the exact text handed to the JSON parser, after quote
    /// and fence stripping.
    #[error("invalid JSON from LLM after stripping: {reason}\n{content:?}")]
    MalformedResponse {
        /// Post-stripping content that failed to parse.
        content: String,
        /// The serde error message.
        reason: String,
    },

    /// JSON parsed, but its shape or indices are wrong.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A node's execute phase failed on every permitted attempt.
    #[error("node '{node}' failed after {attempts} attempt(s): {source}")]
    ExecutionExhausted {
        /// Node (or batch item) that gave up.
        node: String,
        /// Attempts made before giving up.
        attempts: u32,
        /// The error from the last attempt.
        source: Box<FlowError>,
    },

    /// A node failed fatally and the flow run was abandoned.
    #[error("flow aborted at node '{node}': {source}")]
    FlowAborted {
        /// Node at which the run stopped.
        node: String,
        /// The node's error, unmodified.
        source: Box<FlowError>,
    },

    /// A stage read a SharedStore key that no earlier stage wrote.
    #[error("shared store key '{0}' is missing")]
    MissingKey(String),

    /// A caller passed arguments outside the accepted range.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Invalid configuration detected at build time.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// JSON (de)serialization failed outside the sanitizer.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(String),
}

impl FlowError {
    /// A blank reply not yet tied to a stage.
    pub fn empty_response() -> Self {
        FlowError::EmptyResponse { stage: None }
    }

    /// Wrap an error with the stage that produced it, keeping its kind.
    ///
    /// Messages and parse reasons get the stage prefixed and empty responses
    /// record it. Malformed content is left byte-for-byte intact.
    pub fn in_stage(self, stage: &str) -> Self {
        match self {
            FlowError::Validation(msg) => FlowError::Validation(format!("{}: {}", stage, msg)),
            FlowError::MalformedResponse { content, reason } => FlowError::MalformedResponse {
                content,
                reason: format!("{}: {}", stage, reason),
            },
            FlowError::EmptyResponse { stage: inner } => FlowError::EmptyResponse {
                stage: Some(match inner {
                    Some(inner) => format!("{}: {}", stage, inner),
                    None => stage.to_string(),
                }),
            },
            FlowError::Other(msg) => FlowError::Other(format!("{}: {}", stage, msg)),
            other => other,
        }
    }

    /// Walk down through `FlowAborted` and `ExecutionExhausted` to the error
    /// that actually happened.
    pub fn root_cause(&self) -> &FlowError {
        match self {
            FlowError::FlowAborted { source, .. } | FlowError::ExecutionExhausted { source, .. } => {
                source.root_cause()
            }
            other => other,
        }
    }

    /// Name of the node that failed, if this error came out of a flow.
    pub fn failed_node(&self) -> Option<&str> {
        match self {
            FlowError::FlowAborted { node, .. } | FlowError::ExecutionExhausted { node, .. } => {
                Some(node)
            }
            _ => None,
        }
    }

    /// One-line diagnostic for the boundary layer.
    ///
    /// Names the failing stage and the underlying cause. Response bodies and
    /// malformed content are summarized, never echoed, so prompts and
    /// provider payloads do not leak.
    pub fn user_message(&self) -> String {
        let stage = self.failed_node().unwrap_or("pipeline");
        let cause = match self.root_cause() {
            FlowError::Transport(_) => "could not reach the LLM provider".to_string(),
            FlowError::HttpError { status, .. } => {
                format!("LLM provider returned HTTP {}", status)
            }
            FlowError::EmptyResponse { .. } => "LLM returned an empty response".to_string(),
            FlowError::MalformedResponse { reason, .. } => {
                format!("LLM returned invalid JSON ({})", reason)
            }
            FlowError::Validation(msg) => format!("LLM output failed validation ({})", msg),
            FlowError::MissingKey(key) => format!("required input '{}' was not provided", key),
            FlowError::InvalidInput(msg) => format!("invalid input ({})", msg),
            FlowError::InvalidConfig(msg) => format!("invalid configuration ({})", msg),
            FlowError::Json(e) => format!("JSON error ({})", e),
            FlowError::Other(msg) => msg.clone(),
            FlowError::FlowAborted { .. } | FlowError::ExecutionExhausted { .. } => {
                "unknown failure".to_string()
            }
        };
        format!("{} failed: {}", stage, cause)
    }
}

impl From<anyhow::Error> for FlowError {
    fn from(err: anyhow::Error) -> Self {
        FlowError::Other(err.to_string())
    }
}

fn stage_suffix(stage: &Option<String>) -> String {
    stage
        .as_deref()
        .map(|s| format!(" ({})", s))
        .unwrap_or_default()
}

pub type Result<T> = std::result::Result<T, FlowError>;
