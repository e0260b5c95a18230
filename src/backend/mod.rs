//! Backend trait and normalized request/response types.
//!
//! The [`Backend`] trait abstracts over LLM providers, translating between
//! normalized [`LlmRequest`]/[`LlmResponse`] types and provider-specific
//! HTTP APIs. Built-in implementations: [`OpenAiBackend`] and, for tests and
//! demos, [`MockBackend`].
//!
//! ## Architecture
//!
//! ```text
//! LlmGateway ──► LlmRequest ──► Backend::complete() ──► LlmResponse
//!                                      │
//!                           ┌──────────┴──────────┐
//!                     OpenAiBackend          MockBackend
//!                 /v1/chat/completions     scripted replies
//! ```
//!
//! Backends make exactly one provider call per `complete`. Retry lives in
//! the node layer.

pub mod mock;
pub mod openai;

pub use mock::{MockBackend, MockReply};
pub use openai::OpenAiBackend;

use crate::error::Result;
use async_trait::async_trait;
use reqwest::Client;

/// A normalized LLM request, provider-agnostic.
///
/// [`LlmGateway`](crate::gateway::LlmGateway) builds this after validation
/// and truncation.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmRequest {
    /// Model identifier (e.g. `"gpt-4o-mini"`).
    pub model: String,

    /// System instructions, sent as the first chat message.
    pub system_prompt: String,

    /// The user prompt text.
    pub prompt: String,

    /// Sampling temperature in `[0, 1]`.
    pub temperature: f32,
}

impl LlmRequest {
    /// Characters carried by both prompts.
    pub fn char_count(&self) -> usize {
        self.system_prompt.chars().count() + self.prompt.chars().count()
    }
}

/// A normalized LLM response.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    /// The generated text content, exactly as the provider returned it.
    pub text: String,

    /// HTTP status code (for diagnostics/logging).
    pub status: u16,

    /// Provider-specific metadata (token counts, model info).
    pub metadata: Option<serde_json::Value>,
}

/// Abstraction over LLM providers.
///
/// Implementors translate between the normalized [`LlmRequest`]/[`LlmResponse`]
/// and the provider's HTTP API. A non-success status must surface as
/// [`FlowError::HttpError`](crate::FlowError::HttpError), never as a
/// successful empty response.
///
/// # Object Safety
///
/// This trait is object-safe and designed to be used as `Arc<dyn Backend>`.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Execute one non-streaming LLM call.
    async fn complete(
        &self,
        client: &Client,
        base_url: &str,
        request: &LlmRequest,
    ) -> Result<LlmResponse>;

    /// Human-readable name for logging and diagnostics.
    fn name(&self) -> &'static str;
}
