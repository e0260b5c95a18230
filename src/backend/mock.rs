//! Mock backend for testing without a live LLM.
//!
//! [`MockBackend`] plays back a script of replies in order, counting calls
//! and recording every request it receives, so tests can assert both what
//! the pipeline sent and how it reacted to failures.
//!
//! # Example
//!
//! ```
//! use manual_flow::backend::{MockBackend, MockReply};
//!
//! let mock = MockBackend::new(vec!["<h3>Intro</h3>".to_string()]);
//! let flaky = MockBackend::scripted(vec![
//!     MockReply::http(503),
//!     MockReply::text("[1, 0]"),
//! ]);
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::{Backend, LlmRequest, LlmResponse};
use crate::error::{FlowError, Result};

/// One scripted backend outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum MockReply {
    /// Succeed with this text.
    Text(String),
    /// Fail as the provider would on a non-success status.
    HttpError {
        status: u16,
        retry_after: Option<Duration>,
    },
}

impl MockReply {
    pub fn text(text: impl Into<String>) -> Self {
        MockReply::Text(text.into())
    }

    pub fn http(status: u16) -> Self {
        MockReply::HttpError {
            status,
            retry_after: None,
        }
    }
}

/// A test backend that plays scripted replies in order.
///
/// Cycles back to the beginning when the script runs out.
#[derive(Debug)]
pub struct MockBackend {
    script: Vec<MockReply>,
    index: AtomicUsize,
    requests: Mutex<Vec<LlmRequest>>,
}

impl MockBackend {
    /// Create a mock that answers with `responses` in order.
    ///
    /// An empty list behaves like a single empty reply.
    pub fn new(responses: Vec<String>) -> Self {
        Self::scripted(responses.into_iter().map(MockReply::Text).collect())
    }

    /// Create a mock that always returns the same response.
    pub fn fixed(response: impl Into<String>) -> Self {
        Self::new(vec![response.into()])
    }

    /// Create a mock from a mixed script of successes and failures.
    pub fn scripted(script: Vec<MockReply>) -> Self {
        let script = if script.is_empty() {
            vec![MockReply::Text(String::new())]
        } else {
            script
        };
        Self {
            script,
            index: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Number of `complete` calls so far.
    pub fn calls(&self) -> usize {
        self.index.load(Ordering::SeqCst)
    }

    /// Copies of every request received, in call order.
    pub fn requests(&self) -> Vec<LlmRequest> {
        match self.requests.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn next_reply(&self) -> MockReply {
        let idx = self.index.fetch_add(1, Ordering::SeqCst) % self.script.len();
        self.script[idx].clone()
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn complete(
        &self,
        _client: &Client,
        _base_url: &str,
        request: &LlmRequest,
    ) -> Result<LlmResponse> {
        match self.requests.lock() {
            Ok(mut guard) => guard.push(request.clone()),
            Err(poisoned) => poisoned.into_inner().push(request.clone()),
        }

        match self.next_reply() {
            MockReply::Text(text) => Ok(LlmResponse {
                text,
                status: 200,
                metadata: None,
            }),
            MockReply::HttpError {
                status,
                retry_after,
            } => Err(FlowError::HttpError {
                status,
                body: format!("mock failure {}", status),
                retry_after,
            }),
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
