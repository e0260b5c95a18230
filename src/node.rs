//! Node and batch-node traits plus the type-erased [`Executable`] seam.
//!
//! A [`Node`] runs in three phases. `prep` reads the [`SharedStore`] and
//! builds a self-contained input; `exec` does the (possibly LLM-backed) work
//! and is the only phase retried; `post` writes results back and picks the
//! [`Action`] that selects the next edge.
//!
//! A [`BatchNode`] maps `exec_item` over the items returned by `prep`, retrying
//! each item independently. Output order always matches item order.
//!
//! Flows store nodes as `Arc<dyn Executable>`; [`NodeStep`] and [`BatchStep`]
//! adapt the typed traits to that seam.

use crate::{
    error::{FlowError, Result},
    events::{emit, Event, EventHandler},
    retry::{run_with_retry, RetryPolicy},
    store::SharedStore,
};
use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A boxed, pinned, Send future -- the return type of [`Executable::run`].
pub type BoxFut<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Label a node returns from `post` to choose its outgoing edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Action(String);

impl Action {
    /// The sentinel label used when a node does not choose one.
    pub const DEFAULT: &'static str = "default";

    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_default(&self) -> bool {
        self.0 == Self::DEFAULT
    }
}

impl Default for Action {
    fn default() -> Self {
        Self(Self::DEFAULT.to_string())
    }
}

impl From<&str> for Action {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Action {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A retry-capable unit of pipeline work.
///
/// # Example
///
/// ```
/// use async_trait::async_trait;
/// use manual_flow::{Action, Node, SharedStore};
/// use manual_flow::error::Result;
///
/// struct Shout;
///
/// #[async_trait]
/// impl Node for Shout {
///     type Prep = String;
///     type Exec = String;
///
///     fn name(&self) -> &str { "shout" }
///
///     async fn prep(&self, store: &SharedStore) -> Result<String> {
///         store.get_as("prompt")
///     }
///
///     async fn exec(&self, input: &String, _attempt: u32) -> Result<String> {
///         Ok(input.to_uppercase())
///     }
///
///     async fn post(&self, store: &mut SharedStore, _prep: String, exec: String) -> Result<Action> {
///         store.insert("manual", exec)?;
///         Ok(Action::default())
///     }
/// }
/// ```
#[async_trait]
pub trait Node: Send + Sync {
    /// Self-contained execute input derived from the store.
    type Prep: Send + Sync;
    /// Execute result handed to `post`.
    type Exec: Send;

    /// Instance name (for events and error context).
    fn name(&self) -> &str;

    /// Retry policy for the execute phase. Default: a single attempt.
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::once()
    }

    /// Read inputs from the store.
    async fn prep(&self, store: &SharedStore) -> Result<Self::Prep>;

    /// Do the work. `attempt` is 1 on the first try.
    async fn exec(&self, input: &Self::Prep, attempt: u32) -> Result<Self::Exec>;

    /// Called once execute has failed for good. Default: propagate.
    ///
    /// Override to turn a final failure into a placeholder result.
    async fn exec_fallback(&self, _input: &Self::Prep, error: FlowError) -> Result<Self::Exec> {
        Err(error)
    }

    /// Write results into the store and choose the next edge.
    async fn post(
        &self,
        store: &mut SharedStore,
        prep: Self::Prep,
        exec: Self::Exec,
    ) -> Result<Action>;
}

/// A node whose execute phase runs once per prepared item.
#[async_trait]
pub trait BatchNode: Send + Sync {
    /// One unit of batch input.
    type Item: Send + Sync;
    /// Result for one item.
    type Output: Send;

    /// Instance name (for events and error context).
    fn name(&self) -> &str;

    /// Retry policy applied to each item independently.
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::once()
    }

    /// Maximum items in flight at once. Default: 1 (strictly sequential).
    fn concurrency(&self) -> usize {
        1
    }

    /// Derive the item collection from the store.
    async fn prep(&self, store: &SharedStore) -> Result<Vec<Self::Item>>;

    /// Process one item. `index` is its position in the prepared collection.
    async fn exec_item(&self, index: usize, item: &Self::Item, attempt: u32)
        -> Result<Self::Output>;

    /// Called when one item has failed for good. Default: propagate, which
    /// fails the whole batch.
    async fn exec_item_fallback(
        &self,
        _index: usize,
        _item: &Self::Item,
        error: FlowError,
    ) -> Result<Self::Output> {
        Err(error)
    }

    /// Receives every item output, in item order.
    async fn post(
        &self,
        store: &mut SharedStore,
        items: Vec<Self::Item>,
        outputs: Vec<Self::Output>,
    ) -> Result<Action>;
}

/// Object-safe seam the flow drives. Implemented by [`NodeStep`],
/// [`BatchStep`] and [`Flow`](crate::flow::Flow).
pub trait Executable: Send + Sync {
    /// Stable type identifier (`"node"`, `"batch"`, `"flow"`).
    fn kind(&self) -> &'static str;

    /// Instance name.
    fn name(&self) -> &str;

    /// Run prepare, execute (with retry) and finalize against `store`.
    fn run<'a>(
        &'a self,
        store: &'a mut SharedStore,
        handler: &'a Option<Arc<dyn EventHandler>>,
    ) -> BoxFut<'a, Result<Action>>;
}

/// Adapts a [`Node`] to [`Executable`].
pub struct NodeStep<N: Node>(pub N);

impl<N: Node> NodeStep<N> {
    async fn run_phases(
        &self,
        store: &mut SharedStore,
        handler: &Option<Arc<dyn EventHandler>>,
    ) -> Result<Action> {
        let node = &self.0;
        let prep = node.prep(store).await?;
        let policy = node.retry_policy();

        let input = &prep;
        let exec = match run_with_retry(node.name(), &policy, handler, move |attempt| {
            node.exec(input, attempt)
        })
        .await
        {
            Ok(v) => v,
            Err(e) => node.exec_fallback(input, e).await?,
        };

        node.post(store, prep, exec).await
    }
}

impl<N: Node> Executable for NodeStep<N> {
    fn kind(&self) -> &'static str {
        "node"
    }

    fn name(&self) -> &str {
        self.0.name()
    }

    fn run<'a>(
        &'a self,
        store: &'a mut SharedStore,
        handler: &'a Option<Arc<dyn EventHandler>>,
    ) -> BoxFut<'a, Result<Action>> {
        Box::pin(self.run_phases(store, handler))
    }
}

/// Adapts a [`BatchNode`] to [`Executable`].
pub struct BatchStep<B: BatchNode>(pub B);

impl<B: BatchNode> BatchStep<B> {
    async fn run_item(
        &self,
        index: usize,
        item: &B::Item,
        policy: &RetryPolicy,
        handler: &Option<Arc<dyn EventHandler>>,
    ) -> Result<B::Output> {
        let batch = &self.0;
        let label = format!("{}[{}]", batch.name(), index);
        match run_with_retry(&label, policy, handler, move |attempt| {
            batch.exec_item(index, item, attempt)
        })
        .await
        {
            Ok(out) => Ok(out),
            Err(e) => batch.exec_item_fallback(index, item, e).await,
        }
    }

    async fn run_phases(
        &self,
        store: &mut SharedStore,
        handler: &Option<Arc<dyn EventHandler>>,
    ) -> Result<Action> {
        let batch = &self.0;
        let items = batch.prep(store).await?;
        emit(
            handler,
            Event::BatchPrepared {
                node: batch.name().to_string(),
                items: items.len(),
            },
        );

        let policy = batch.retry_policy();
        let policy = &policy;
        let width = batch.concurrency().max(1);

        // Built up front: the stream owns the futures, not a borrowing closure.
        let pending: Vec<_> = items
            .iter()
            .enumerate()
            .map(|(index, item)| self.run_item(index, item, policy, handler))
            .collect();

        // `buffered` yields in submission order, so outputs line up with items.
        let outputs: Vec<B::Output> = stream::iter(pending)
            .buffered(width)
            .try_collect()
            .await?;

        batch.post(store, items, outputs).await
    }
}

impl<B: BatchNode> Executable for BatchStep<B> {
    fn kind(&self) -> &'static str {
        "batch"
    }

    fn name(&self) -> &str {
        self.0.name()
    }

    fn run<'a>(
        &'a self,
        store: &'a mut SharedStore,
        handler: &'a Option<Arc<dyn EventHandler>>,
    ) -> BoxFut<'a, Result<Action>> {
        Box::pin(self.run_phases(store, handler))
    }
}
