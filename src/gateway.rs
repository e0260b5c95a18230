//! The LLM gateway: one validated, budget-bounded provider call.
//!
//! [`LlmGateway`] is constructed once with its backend and credentials and
//! passed (as `Arc<LlmGateway>`) into every node that talks to a model. It
//! never retries; a failed call surfaces as an error for the node's retry
//! policy to judge.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::Client;

use crate::backend::{Backend, LlmRequest, OpenAiBackend};
use crate::config::PipelineConfig;
use crate::error::{FlowError, Result};
use crate::events::{emit, Event, EventHandler};

/// Default character budget for one request.
pub const MAX_CHARS: usize = 15_000;

/// Default number of replies the response cache holds.
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// Cut `text` to at most `max` characters, on a char boundary.
///
/// ```
/// use manual_flow::gateway::truncate_chars;
///
/// assert_eq!(truncate_chars("héllo", 2), "hé");
/// assert_eq!(truncate_chars("short", 100), "short");
/// ```
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((cut, _)) => &text[..cut],
        None => text,
    }
}

/// Fit both prompts into `max` characters.
///
/// The system prompt is kept whole and the user prompt is cut to the
/// remaining budget. A system prompt that alone exceeds the budget is cut
/// itself and the user prompt is dropped. Returns whether anything was cut.
fn fit_budget<'a>(system: &'a str, user: &'a str, max: usize) -> (&'a str, &'a str, bool) {
    let system_len = system.chars().count();
    if system_len >= max {
        let cut = truncate_chars(system, max);
        return (cut, "", system_len > max || !user.is_empty());
    }
    let user_cut = truncate_chars(user, max - system_len);
    (system, user_cut, user_cut.len() < user.len())
}

/// Model settings a stage applies to its calls.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmSettings {
    pub model: String,
    pub temperature: f32,
    /// Serve first attempts from the in-memory cache when possible.
    pub use_cache: bool,
}

impl LlmSettings {
    pub fn new(model: impl Into<String>, temperature: f32) -> Self {
        Self {
            model: model.into(),
            temperature,
            use_cache: false,
        }
    }

    pub fn with_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.model.clone(), config.temperature)
    }

    /// Settings for one execute attempt. Retries never read the cache, so a
    /// bad cached reply is not replayed.
    pub fn for_attempt(&self, attempt: u32) -> Self {
        let mut settings = self.clone();
        settings.use_cache = self.use_cache && attempt <= 1;
        settings
    }
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self::new("gpt-4o-mini", 0.2)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    model: String,
    temperature_bits: u32,
    system: String,
    user: String,
}

/// Replies keyed by request, evicting the oldest entry once full.
#[derive(Debug)]
struct ResponseCache {
    entries: HashMap<CacheKey, String>,
    order: VecDeque<CacheKey>,
    capacity: usize,
}

impl ResponseCache {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    fn get(&self, key: &CacheKey) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn insert(&mut self, key: CacheKey, text: String) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.insert(key.clone(), text).is_some() {
            return;
        }
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

/// Process-wide handle to the LLM provider.
///
/// Stateless per call apart from the optional response cache, so one
/// gateway may serve concurrent flow runs. The cache holds at most
/// [`DEFAULT_CACHE_CAPACITY`] replies unless the builder sets another cap.
pub struct LlmGateway {
    client: Client,
    base_url: String,
    backend: Arc<dyn Backend>,
    max_chars: usize,
    cache: Mutex<ResponseCache>,
    handler: Option<Arc<dyn EventHandler>>,
}

impl std::fmt::Debug for LlmGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmGateway")
            .field("base_url", &self.base_url)
            .field("backend", &self.backend.name())
            .field("max_chars", &self.max_chars)
            .field("cached_responses", &self.cache_len())
            .field("has_event_handler", &self.handler.is_some())
            .finish()
    }
}

impl LlmGateway {
    pub fn builder() -> LlmGatewayBuilder {
        LlmGatewayBuilder::default()
    }

    /// Gateway over `backend` with default settings.
    pub fn with_backend(backend: Arc<dyn Backend>) -> Self {
        Self {
            client: Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            backend,
            max_chars: MAX_CHARS,
            cache: Mutex::new(ResponseCache::new(DEFAULT_CACHE_CAPACITY)),
            handler: None,
        }
    }

    /// OpenAI-compatible gateway configured from `config`.
    ///
    /// The API key is read from the environment variable the config names.
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let key = config.api_key().ok_or_else(|| {
            FlowError::InvalidConfig(format!(
                "environment variable {} is not set",
                config.api_key_env
            ))
        })?;
        Self::builder()
            .backend(Arc::new(OpenAiBackend::new().with_api_key(key)))
            .base_url(config.base_url.clone())
            .max_chars(config.max_chars)
            .cache_capacity(config.cache_capacity)
            .timeout(config.timeout())
            .build()
    }

    /// Character budget applied to every request.
    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    /// Send one request and return the provider's full reply text.
    ///
    /// Both prompts must be non-blank and `temperature` must lie in `[0, 1]`.
    /// The combined input is cut to the character budget before sending.
    /// The reply may be empty; judging it is the caller's job.
    pub async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        model: &str,
        temperature: f32,
    ) -> Result<String> {
        Self::validate(system_prompt, user_prompt, model, temperature)?;
        let (system, user, truncated) = fit_budget(system_prompt, user_prompt, self.max_chars);

        let request = LlmRequest {
            model: model.to_string(),
            system_prompt: system.to_string(),
            prompt: user.to_string(),
            temperature,
        };
        emit(
            &self.handler,
            Event::LlmRequest {
                model: request.model.clone(),
                chars: request.char_count(),
                truncated,
            },
        );

        let response = self
            .backend
            .complete(&self.client, &self.base_url, &request)
            .await?;

        emit(
            &self.handler,
            Event::LlmResponse {
                model: request.model,
                chars: response.text.chars().count(),
                cached: false,
            },
        );
        Ok(response.text)
    }

    /// Like [`complete`](Self::complete), but serves repeated identical
    /// requests from memory. Only successful replies are stored, and the
    /// oldest one is dropped once the cache is full.
    pub async fn complete_cached(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        model: &str,
        temperature: f32,
    ) -> Result<String> {
        Self::validate(system_prompt, user_prompt, model, temperature)?;
        let key = CacheKey {
            model: model.to_string(),
            temperature_bits: temperature.to_bits(),
            system: system_prompt.to_string(),
            user: user_prompt.to_string(),
        };

        let hit = self
            .cache
            .lock()
            .ok()
            .and_then(|cache| cache.get(&key));
        if let Some(text) = hit {
            emit(
                &self.handler,
                Event::LlmResponse {
                    model: key.model,
                    chars: text.chars().count(),
                    cached: true,
                },
            );
            return Ok(text);
        }

        let text = self
            .complete(system_prompt, user_prompt, model, temperature)
            .await?;
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(key, text.clone());
        }
        Ok(text)
    }

    /// Call with a stage's settings, through the cache when they ask for it.
    pub async fn call(
        &self,
        settings: &LlmSettings,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String> {
        if settings.use_cache {
            self.complete_cached(
                system_prompt,
                user_prompt,
                &settings.model,
                settings.temperature,
            )
            .await
        } else {
            self.complete(
                system_prompt,
                user_prompt,
                &settings.model,
                settings.temperature,
            )
            .await
        }
    }

    /// Forward an event to this gateway's handler, if any.
    pub(crate) fn notify(&self, event: Event) {
        emit(&self.handler, event);
    }

    pub fn cache_len(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn clear_cache(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }

    fn validate(system: &str, user: &str, model: &str, temperature: f32) -> Result<()> {
        if system.trim().is_empty() {
            return Err(FlowError::InvalidInput("system prompt is empty".into()));
        }
        if user.trim().is_empty() {
            return Err(FlowError::InvalidInput("user prompt is empty".into()));
        }
        if model.trim().is_empty() {
            return Err(FlowError::InvalidInput("model is empty".into()));
        }
        if !(0.0..=1.0).contains(&temperature) {
            return Err(FlowError::InvalidInput(format!(
                "temperature must be in [0, 1], got {}",
                temperature
            )));
        }
        Ok(())
    }
}

/// Builder for [`LlmGateway`].
#[derive(Default)]
pub struct LlmGatewayBuilder {
    backend: Option<Arc<dyn Backend>>,
    base_url: Option<String>,
    max_chars: Option<usize>,
    cache_capacity: Option<usize>,
    timeout: Option<Duration>,
    handler: Option<Arc<dyn EventHandler>>,
}

impl LlmGatewayBuilder {
    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn max_chars(mut self, max: usize) -> Self {
        self.max_chars = Some(max);
        self
    }

    /// Most replies kept by the response cache. Zero disables caching.
    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = Some(capacity);
        self
    }

    /// HTTP timeout for one provider call.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn build(self) -> Result<LlmGateway> {
        let backend = self
            .backend
            .ok_or_else(|| FlowError::InvalidConfig("gateway needs a backend".into()))?;
        let max_chars = self.max_chars.unwrap_or(MAX_CHARS);
        if max_chars == 0 {
            return Err(FlowError::InvalidConfig("max_chars must be positive".into()));
        }

        let mut client = Client::builder();
        if let Some(timeout) = self.timeout {
            client = client.timeout(timeout);
        }

        Ok(LlmGateway {
            client: client.build()?,
            base_url: self
                .base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            backend,
            max_chars,
            cache: Mutex::new(ResponseCache::new(
                self.cache_capacity.unwrap_or(DEFAULT_CACHE_CAPACITY),
            )),
            handler: self.handler,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockBackend, MockReply};
    use crate::events::FnEventHandler;

    fn gateway(mock: &Arc<MockBackend>, max_chars: usize) -> LlmGateway {
        LlmGateway::builder()
            .backend(mock.clone())
            .max_chars(max_chars)
            .build()
            .unwrap()
    }

    #[test]
    fn test_fit_budget_keeps_system_and_cuts_user() {
        let (s, u, cut) = fit_budget("sys", "abcdefgh", 6);
        assert_eq!((s, u, cut), ("sys", "abc", true));

        let (s, u, cut) = fit_budget("sys", "ab", 6);
        assert_eq!((s, u, cut), ("sys", "ab", false));
    }

    #[test]
    fn test_fit_budget_oversized_system_drops_user() {
        let (s, u, cut) = fit_budget("systemprompt", "user", 6);
        assert_eq!((s, u, cut), ("system", "", true));
    }

    #[tokio::test]
    async fn test_complete_returns_full_text_and_truncates_input() {
        let mock = Arc::new(MockBackend::fixed("  raw reply  "));
        let gw = gateway(&mock, 10);

        let text = gw.complete("sys", "0123456789", "gpt-4o-mini", 0.2).await.unwrap();
        assert_eq!(text, "  raw reply  ");

        let sent = &mock.requests()[0];
        assert_eq!(sent.system_prompt, "sys");
        assert_eq!(sent.prompt, "0123456");
        assert_eq!(sent.char_count(), 10);
    }

    #[tokio::test]
    async fn test_complete_may_return_empty_text() {
        let mock = Arc::new(MockBackend::fixed(""));
        let gw = gateway(&mock, MAX_CHARS);
        assert_eq!(gw.complete("s", "u", "m", 0.0).await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_invalid_input_never_reaches_backend() {
        let mock = Arc::new(MockBackend::fixed("x"));
        let gw = gateway(&mock, MAX_CHARS);

        for (s, u, t) in [(" ", "u", 0.2), ("s", "", 0.2), ("s", "u", 1.5), ("s", "u", -0.1)] {
            let err = gw.complete(s, u, "m", t).await.unwrap_err();
            assert!(matches!(err, FlowError::InvalidInput(_)));
        }
        assert_eq!(mock.calls(), 0);
    }

    #[tokio::test]
    async fn test_provider_failure_surfaces_unchanged() {
        let mock = Arc::new(MockBackend::scripted(vec![MockReply::http(503)]));
        let gw = gateway(&mock, MAX_CHARS);
        let err = gw.complete("s", "u", "m", 0.2).await.unwrap_err();
        assert!(matches!(err, FlowError::HttpError { status: 503, .. }));
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_cache_serves_repeat_requests() {
        let mock = Arc::new(MockBackend::new(vec!["first".into(), "second".into()]));
        let gw = gateway(&mock, MAX_CHARS);

        let a = gw.complete_cached("s", "u", "m", 0.2).await.unwrap();
        let b = gw.complete_cached("s", "u", "m", 0.2).await.unwrap();
        let c = gw.complete_cached("s", "other", "m", 0.2).await.unwrap();

        assert_eq!((a.as_str(), b.as_str(), c.as_str()), ("first", "first", "second"));
        assert_eq!(mock.calls(), 2);
        assert_eq!(gw.cache_len(), 2);

        gw.clear_cache();
        assert_eq!(gw.cache_len(), 0);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let mock = Arc::new(MockBackend::scripted(vec![
            MockReply::http(500),
            MockReply::text("ok"),
        ]));
        let gw = gateway(&mock, MAX_CHARS);

        assert!(gw.complete_cached("s", "u", "m", 0.2).await.is_err());
        assert_eq!(gw.complete_cached("s", "u", "m", 0.2).await.unwrap(), "ok");
        assert_eq!(gw.cache_len(), 1);
    }

    #[tokio::test]
    async fn test_cache_evicts_oldest_when_full() {
        let mock = Arc::new(MockBackend::new(vec![
            "one".into(),
            "two".into(),
            "three".into(),
            "one again".into(),
        ]));
        let gw = LlmGateway::builder()
            .backend(mock.clone())
            .cache_capacity(2)
            .build()
            .unwrap();

        for user in ["a", "b", "c"] {
            gw.complete_cached("s", user, "m", 0.2).await.unwrap();
        }
        assert_eq!(gw.cache_len(), 2);

        // "a" was evicted; "c" is still served from memory.
        assert_eq!(gw.complete_cached("s", "c", "m", 0.2).await.unwrap(), "three");
        assert_eq!(mock.calls(), 3);
        assert_eq!(gw.complete_cached("s", "a", "m", 0.2).await.unwrap(), "one again");
        assert_eq!(mock.calls(), 4);
        assert_eq!(gw.cache_len(), 2);
    }

    #[tokio::test]
    async fn test_zero_capacity_disables_cache() {
        let mock = Arc::new(MockBackend::new(vec!["x".into(), "y".into()]));
        let gw = LlmGateway::builder()
            .backend(mock.clone())
            .cache_capacity(0)
            .build()
            .unwrap();

        assert_eq!(gw.complete_cached("s", "u", "m", 0.2).await.unwrap(), "x");
        assert_eq!(gw.complete_cached("s", "u", "m", 0.2).await.unwrap(), "y");
        assert_eq!(gw.cache_len(), 0);
    }

    #[tokio::test]
    async fn test_call_bypasses_cache_on_retry() {
        let mock = Arc::new(MockBackend::new(vec!["bad".into(), "good".into()]));
        let gw = gateway(&mock, MAX_CHARS);
        let settings = LlmSettings::new("m", 0.2).with_cache(true);

        let first = settings.for_attempt(1);
        let retry = settings.for_attempt(2);
        assert!(first.use_cache);
        assert!(!retry.use_cache);

        assert_eq!(gw.call(&first, "s", "u").await.unwrap(), "bad");
        assert_eq!(gw.call(&retry, "s", "u").await.unwrap(), "good");
        assert_eq!(gw.call(&first, "s", "u").await.unwrap(), "bad");
        assert_eq!(mock.calls(), 2);
    }

    #[tokio::test]
    async fn test_events_are_payload_free() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mock = Arc::new(MockBackend::fixed("reply"));
        let gw = LlmGateway::builder()
            .backend(mock)
            .max_chars(5)
            .event_handler(Arc::new(FnEventHandler(move |e: Event| {
                sink.lock().unwrap().push(e);
            })))
            .build()
            .unwrap();

        gw.complete("sys", "secret prompt", "m", 0.2).await.unwrap();

        let events = seen.lock().unwrap();
        assert_eq!(
            events[0],
            Event::LlmRequest {
                model: "m".into(),
                chars: 5,
                truncated: true
            }
        );
        assert_eq!(
            events[1],
            Event::LlmResponse {
                model: "m".into(),
                chars: 5,
                cached: false
            }
        );
        assert!(!format!("{:?}", *events).contains("secret"));
    }

    #[test]
    fn test_builder_requires_backend() {
        assert!(matches!(
            LlmGateway::builder().build(),
            Err(FlowError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_from_config_requires_key() {
        let config = PipelineConfig {
            api_key_env: "MANUAL_FLOW_GATEWAY_TEST_UNSET".into(),
            ..PipelineConfig::default()
        };
        let err = LlmGateway::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("MANUAL_FLOW_GATEWAY_TEST_UNSET"));
    }
}
