//! Execute-phase retry policy for nodes and batch items.
//!
//! [`RetryPolicy`] decides how many times a node's execute phase is attempted,
//! how long to wait between attempts, and which failures are worth another
//! attempt at all. Only the execute phase is ever retried; prepare and
//! finalize run once.

use crate::error::{FlowError, Result};
use crate::events::{emit, Event, EventHandler};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Longest provider `Retry-After` hint a policy will honor by default.
pub const DEFAULT_MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

/// How long to wait between two execute attempts.
///
/// # Example
///
/// ```
/// use manual_flow::retry::Wait;
/// use std::time::Duration;
///
/// let fixed = Wait::Fixed(Duration::from_secs(20));
/// assert_eq!(fixed.delay_for_attempt(3), Duration::from_secs(20));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Wait {
    /// Same delay before every retry.
    Fixed(Duration),

    /// Exponential backoff: `initial * multiplier^n`, capped at `max`, then
    /// jittered. Build it with [`Wait::exponential`] to have the multiplier
    /// checked.
    Exponential {
        initial: Duration,
        multiplier: f64,
        max: Duration,
        jitter: JitterStrategy,
    },
}

/// Jitter strategy to prevent thundering herd on shared rate limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JitterStrategy {
    /// No jitter. Delay is exactly the calculated value.
    None,

    /// Full jitter: random value in `[0, calculated_delay]`.
    Full,

    /// Equal jitter: `calculated_delay/2 + random in [0, calculated_delay/2]`.
    Equal,
}

impl Wait {
    /// No delay at all. Mostly useful in tests.
    pub fn none() -> Self {
        Wait::Fixed(Duration::ZERO)
    }

    /// Exponential backoff with full jitter.
    ///
    /// `multiplier` must be finite and at least 1.
    pub fn exponential(initial: Duration, multiplier: f64, max: Duration) -> Result<Self> {
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(FlowError::InvalidConfig(format!(
                "backoff multiplier must be finite and at least 1, got {}",
                multiplier
            )));
        }
        Ok(Wait::Exponential {
            initial,
            multiplier,
            max,
            jitter: JitterStrategy::Full,
        })
    }

    /// Replace the jitter strategy of an exponential wait.
    pub fn with_jitter(self, jitter: JitterStrategy) -> Self {
        match self {
            Wait::Exponential {
                initial,
                multiplier,
                max,
                ..
            } => Wait::Exponential {
                initial,
                multiplier,
                max,
                jitter,
            },
            fixed => fixed,
        }
    }

    /// Calculate the delay before retry N (0-indexed).
    ///
    /// Never panics: a delay that cannot be represented falls back to `max`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self {
            Wait::Fixed(d) => *d,
            Wait::Exponential {
                initial,
                multiplier,
                max,
                jitter,
            } => {
                let base = initial.as_secs_f64() * multiplier.powi(attempt as i32);
                // f64::min also maps NaN and infinity to the cap.
                let capped = base.min(max.as_secs_f64()).max(0.0);
                let jittered = match jitter {
                    JitterStrategy::None => capped,
                    JitterStrategy::Full => fastrand::f64() * capped,
                    JitterStrategy::Equal => capped / 2.0 + fastrand::f64() * (capped / 2.0),
                };
                Duration::try_from_secs_f64(jittered).unwrap_or(*max)
            }
        }
    }
}

/// Which failure classes earn another execute attempt.
///
/// `Validation`, `MissingKey`, `InvalidInput` and config errors are never
/// retried regardless of these flags: the same input reproduces them.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOn {
    /// Connection failures and HTTP statuses listed in `retryable_statuses`.
    pub transport: bool,

    /// `EmptyResponse` and `MalformedResponse`. A repeat call may come back
    /// cleanly formatted.
    pub malformed: bool,

    /// Untyped `Other` failures raised by node implementations.
    pub other: bool,

    /// HTTP status codes treated as transient. Default: `[429, 500, 502, 503, 504]`.
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetryOn {
    fn default() -> Self {
        Self {
            transport: true,
            malformed: true,
            other: true,
            retryable_statuses: vec![429, 500, 502, 503, 504],
        }
    }
}

/// Retry budget and wait strategy for a node's execute phase.
///
/// # Example
///
/// ```
/// use manual_flow::retry::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::new(5, Duration::from_secs(20)).no_malformed_retry();
/// assert_eq!(policy.max_retries, 5);
/// assert!(!policy.retry_on.malformed);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total execute attempts, including the first. Always at least 1.
    pub max_retries: u32,

    /// Delay between attempts.
    pub wait: Wait,

    /// Failure classes that are retried.
    pub retry_on: RetryOn,

    /// Use a provider `Retry-After` hint instead of `wait` when present.
    pub respect_retry_after: bool,

    /// Upper bound on an honored `Retry-After` hint.
    pub max_retry_after: Duration,
}

impl RetryPolicy {
    /// `max_retries` attempts with a fixed wait between them.
    pub fn new(max_retries: u32, wait: Duration) -> Self {
        Self {
            max_retries: max_retries.max(1),
            wait: Wait::Fixed(wait),
            retry_on: RetryOn::default(),
            respect_retry_after: true,
            max_retry_after: DEFAULT_MAX_RETRY_AFTER,
        }
    }

    /// Single attempt, no retry.
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Replace the wait strategy.
    pub fn with_wait(mut self, wait: Wait) -> Self {
        self.wait = wait;
        self
    }

    /// Replace the retryable failure classes.
    pub fn with_retry_on(mut self, retry_on: RetryOn) -> Self {
        self.retry_on = retry_on;
        self
    }

    /// Treat malformed or empty responses as fatal.
    pub fn no_malformed_retry(mut self) -> Self {
        self.retry_on.malformed = false;
        self
    }

    /// Ignore `Retry-After` hints and always use `wait`.
    pub fn ignore_retry_after(mut self) -> Self {
        self.respect_retry_after = false;
        self
    }

    /// Cap `Retry-After` hints at `max`.
    pub fn with_max_retry_after(mut self, max: Duration) -> Self {
        self.max_retry_after = max;
        self
    }

    /// Whether another attempt could plausibly succeed after `error`.
    pub fn is_retryable(&self, error: &FlowError) -> bool {
        match error {
            FlowError::Transport(_) => self.retry_on.transport,
            FlowError::HttpError { status, .. } => {
                self.retry_on.transport && self.retry_on.retryable_statuses.contains(status)
            }
            FlowError::EmptyResponse { .. } | FlowError::MalformedResponse { .. } => {
                self.retry_on.malformed
            }
            FlowError::Other(_) => self.retry_on.other,
            FlowError::Validation(_)
            | FlowError::ExecutionExhausted { .. }
            | FlowError::FlowAborted { .. }
            | FlowError::MissingKey(_)
            | FlowError::InvalidInput(_)
            | FlowError::InvalidConfig(_)
            | FlowError::Json(_) => false,
        }
    }

    /// Delay before the retry that follows `error` (`retry` is 0-indexed).
    /// A `Retry-After` hint is capped at `max_retry_after`.
    fn delay_after(&self, error: &FlowError, retry: u32) -> Duration {
        if self.respect_retry_after {
            if let FlowError::HttpError {
                retry_after: Some(ra),
                ..
            } = error
            {
                return (*ra).min(self.max_retry_after);
            }
        }
        self.wait.delay_for_attempt(retry)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::once()
    }
}

/// Run `attempt_fn` until it succeeds, fails fatally, or the budget runs out.
///
/// `attempt_fn` receives the 1-indexed attempt number. A non-retryable error
/// is returned unchanged after the attempt that produced it. When every
/// permitted attempt fails, the result is [`FlowError::ExecutionExhausted`]
/// carrying the last error.
pub(crate) async fn run_with_retry<T, F, Fut>(
    label: &str,
    policy: &RetryPolicy,
    handler: &Option<Arc<dyn EventHandler>>,
    mut attempt_fn: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max = policy.max_retries.max(1);
    let mut attempt = 1;

    loop {
        let err = match attempt_fn(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if !policy.is_retryable(&err) {
            return Err(err);
        }

        if attempt >= max {
            emit(
                handler,
                Event::ExecutionExhausted {
                    node: label.to_string(),
                    attempts: attempt,
                },
            );
            return Err(FlowError::ExecutionExhausted {
                node: label.to_string(),
                attempts: attempt,
                source: Box::new(err),
            });
        }

        let delay = policy.delay_after(&err, attempt - 1);
        emit(
            handler,
            Event::RetryScheduled {
                node: label.to_string(),
                attempt: attempt + 1,
                delay_ms: delay.as_millis() as u64,
                reason: error_kind(&err),
            },
        );
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        attempt += 1;
    }
}

/// Short, payload-free label for an error, safe to log.
pub(crate) fn error_kind(error: &FlowError) -> String {
    match error {
        FlowError::Transport(_) => "transport".to_string(),
        FlowError::HttpError { status, .. } => format!("http {}", status),
        FlowError::EmptyResponse { .. } => "empty response".to_string(),
        FlowError::MalformedResponse { .. } => "malformed response".to_string(),
        FlowError::Validation(_) => "validation".to_string(),
        FlowError::ExecutionExhausted { .. } => "execution exhausted".to_string(),
        FlowError::FlowAborted { .. } => "flow aborted".to_string(),
        FlowError::MissingKey(k) => format!("missing key {}", k),
        FlowError::InvalidInput(_) => "invalid input".to_string(),
        FlowError::InvalidConfig(_) => "invalid config".to_string(),
        FlowError::Json(_) => "json".to_string(),
        FlowError::Other(_) => "other".to_string(),
    }
}
