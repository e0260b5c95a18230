//! Event system for node lifecycle, retries and LLM calls.
//!
//! The engine never logs directly. It emits [`Event`]s to an optional
//! [`EventHandler`]; [`TracingEventHandler`] forwards them to `tracing`.
//! Events carry names, counters and error kinds only: prompts, responses and
//! credentials are never part of an event.

use std::sync::Arc;

/// Events emitted while a flow runs.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A flow run has started.
    FlowStart {
        /// Id of the start node.
        start: String,
    },
    /// A node has started its prepare phase.
    NodeStart {
        /// Node id within the flow.
        node: String,
        /// Stable type identifier (`"node"`, `"batch"`, `"flow"`).
        kind: &'static str,
    },
    /// A node has finished (successfully or not).
    NodeEnd {
        /// Node id within the flow.
        node: String,
        /// Action label returned by finalize, when it succeeded.
        action: Option<String>,
        /// Whether the node succeeded.
        ok: bool,
    },
    /// The flow followed an edge.
    Transition {
        from: String,
        action: String,
        to: String,
    },
    /// A batch node prepared its items.
    BatchPrepared {
        node: String,
        items: usize,
    },
    /// A failed execute attempt will be retried.
    RetryScheduled {
        /// Node id, or `node[item]` for batch items.
        node: String,
        /// The attempt about to run (1-indexed).
        attempt: u32,
        /// Delay before that attempt in milliseconds.
        delay_ms: u64,
        /// Error kind of the failed attempt.
        reason: String,
    },
    /// The retry budget ran out.
    ExecutionExhausted {
        node: String,
        attempts: u32,
    },
    /// A request is about to be sent to the LLM provider.
    LlmRequest {
        model: String,
        /// Characters sent (system + user) after truncation.
        chars: usize,
        /// Whether the character budget cut the input.
        truncated: bool,
    },
    /// The provider answered.
    LlmResponse {
        model: String,
        chars: usize,
        /// Served from the in-memory cache.
        cached: bool,
    },
    /// The sanitizer removed wrapping noise before parsing.
    Sanitized {
        /// Stage whose output was cleaned.
        stage: String,
        stripped_quotes: bool,
        stripped_fence: bool,
    },
    /// A flow run has finished.
    FlowEnd {
        /// Number of node invocations in the run.
        steps: usize,
        ok: bool,
    },
}

impl Event {
    /// Short event-kind label used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::FlowStart { .. } => "flow_start",
            Event::NodeStart { .. } => "node_start",
            Event::NodeEnd { .. } => "node_end",
            Event::Transition { .. } => "transition",
            Event::BatchPrepared { .. } => "batch_prepared",
            Event::RetryScheduled { .. } => "retry_scheduled",
            Event::ExecutionExhausted { .. } => "execution_exhausted",
            Event::LlmRequest { .. } => "llm_request",
            Event::LlmResponse { .. } => "llm_response",
            Event::Sanitized { .. } => "sanitized",
            Event::FlowEnd { .. } => "flow_end",
        }
    }
}

/// Handler for flow lifecycle events.
///
/// This is entirely optional -- flows run without an event handler.
///
/// # Example
///
/// ```
/// use manual_flow::events::{Event, EventHandler};
///
/// struct PrintHandler;
///
/// impl EventHandler for PrintHandler {
///     fn on_event(&self, event: Event) {
///         if let Event::NodeEnd { node, ok, .. } = event {
///             println!("[end] {} ok={}", node, ok);
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    /// Called when the engine emits an event.
    fn on_event(&self, event: Event);
}

/// Emit an event if a handler is present. No-op otherwise.
pub(crate) fn emit(handler: &Option<Arc<dyn EventHandler>>, event: Event) {
    if let Some(ref h) = handler {
        h.on_event(event);
    }
}

/// An [`EventHandler`] backed by a closure.
///
/// # Example
///
/// ```
/// use manual_flow::events::{Event, FnEventHandler};
/// use std::sync::Arc;
///
/// let handler = Arc::new(FnEventHandler(|event: Event| {
///     println!("{}", event.kind());
/// }));
/// ```
pub struct FnEventHandler<F: Fn(Event) + Send + Sync>(pub F);

impl<F: Fn(Event) + Send + Sync> EventHandler for FnEventHandler<F> {
    fn on_event(&self, event: Event) {
        (self.0)(event);
    }
}

/// Forwards events to the `tracing` crate as structured records.
///
/// Failures and exhausted retries log at `warn`, LLM traffic at `debug`,
/// everything else at `info`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventHandler;

impl EventHandler for TracingEventHandler {
    fn on_event(&self, event: Event) {
        let kind = event.kind();
        match event {
            Event::FlowStart { start } => {
                tracing::info!(event = kind, start = %start, "flow started");
            }
            Event::NodeStart { node, kind: node_kind } => {
                tracing::info!(event = kind, stage = %node, node_kind, "node started");
            }
            Event::NodeEnd { node, action, ok } => {
                if ok {
                    tracing::info!(event = kind, stage = %node, action = ?action, "node finished");
                } else {
                    tracing::warn!(event = kind, stage = %node, "node failed");
                }
            }
            Event::Transition { from, action, to } => {
                tracing::debug!(event = kind, stage = %from, action = %action, to = %to, "transition");
            }
            Event::BatchPrepared { node, items } => {
                tracing::info!(event = kind, stage = %node, items, "batch prepared");
            }
            Event::RetryScheduled {
                node,
                attempt,
                delay_ms,
                reason,
            } => {
                tracing::warn!(event = kind, stage = %node, attempt, delay_ms, reason = %reason, "retrying execute");
            }
            Event::ExecutionExhausted { node, attempts } => {
                tracing::warn!(event = kind, stage = %node, attempts, "retries exhausted");
            }
            Event::LlmRequest {
                model,
                chars,
                truncated,
            } => {
                tracing::debug!(event = kind, model = %model, chars, truncated, "llm request");
            }
            Event::LlmResponse {
                model,
                chars,
                cached,
            } => {
                tracing::debug!(event = kind, model = %model, chars, cached, "llm response");
            }
            Event::Sanitized {
                stage,
                stripped_quotes,
                stripped_fence,
            } => {
                tracing::debug!(event = kind, stage = %stage, stripped_quotes, stripped_fence, "sanitized llm output");
            }
            Event::FlowEnd { steps, ok } => {
                if ok {
                    tracing::info!(event = kind, steps, "flow finished");
                } else {
                    tracing::warn!(event = kind, steps, "flow aborted");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_emit_without_handler_is_noop() {
        emit(&None, Event::FlowEnd { steps: 0, ok: true });
    }

    #[test]
    fn test_fn_handler_receives_events() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler: Option<Arc<dyn EventHandler>> =
            Some(Arc::new(FnEventHandler(move |e: Event| {
                sink.lock().unwrap().push(e.kind());
            })));

        emit(
            &handler,
            Event::NodeStart {
                node: "a".into(),
                kind: "node",
            },
        );
        emit(&handler, Event::FlowEnd { steps: 1, ok: true });

        assert_eq!(*seen.lock().unwrap(), vec!["node_start", "flow_end"]);
    }

    #[test]
    fn test_tracing_handler_accepts_every_event() {
        let handler = TracingEventHandler;
        handler.on_event(Event::RetryScheduled {
            node: "n".into(),
            attempt: 2,
            delay_ms: 0,
            reason: "http 503".into(),
        });
        handler.on_event(Event::NodeEnd {
            node: "n".into(),
            action: None,
            ok: false,
        });
    }
}
