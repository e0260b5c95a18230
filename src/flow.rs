//! Flow: an explicit edge table over nodes, driven sequentially.
//!
//! A [`Flow`] owns its nodes and a table mapping `(node id, action label)` to
//! the next node id. It does not own the [`SharedStore`]: the caller passes
//! one in per run. The table is validated once by [`FlowBuilder::build`]:
//! every endpoint must exist, every node must be reachable from the start,
//! and every cycle must pass through a bounded edge so traversal terminates.
//!
//! `Flow` itself implements [`Executable`], so flows nest.

use crate::{
    error::{FlowError, Result},
    events::{emit, Event, EventHandler},
    node::{Action, BatchNode, BatchStep, BoxFut, Executable, Node, NodeStep},
    store::SharedStore,
};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Error when building a flow's edge table.
#[derive(Debug, Error, PartialEq)]
pub enum FlowBuildError {
    /// The flow has no nodes at all.
    #[error("flow '{0}' has no nodes")]
    Empty(String),

    /// Two nodes were registered under the same id.
    #[error("duplicate node id: {0}")]
    DuplicateNode(String),

    /// An edge or the start refers to an id that was never registered.
    #[error("node not found: {0}")]
    NodeNotFound(String),

    /// The same `(node, action)` pair was routed twice.
    #[error("duplicate edge from '{from}' on action '{action}'")]
    DuplicateEdge { from: String, action: String },

    /// A registered node can never run.
    #[error("node '{0}' is not reachable from the start node")]
    Unreachable(String),

    /// A cycle with no bounded edge would never terminate.
    #[error("cycle without a bounded edge through: {0}")]
    UnboundedCycle(String),
}

#[derive(Debug, Clone)]
struct Edge {
    to: String,
    /// `Some(n)`: the run aborts when this edge is taken more than `n` times.
    max_traversals: Option<u32>,
}

/// Result of a successful flow run.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowOutcome {
    /// Node ids in the order they ran.
    pub trail: Vec<String>,
    /// Action returned by the last node (no edge matched it).
    pub last_action: Action,
}

/// Orchestrator sequencing nodes through an action-labelled edge table.
///
/// # Example
///
/// ```ignore
/// let stage = LlmStage::new(gateway).with_retry(config.retry_policy());
/// let flow = Flow::builder("manual")
///     .node("summarize", SummarizeDocuments::new(stage.clone()))
///     .node("quiz", GenerateQuiz::new(stage))
///     .then("summarize", "quiz")
///     .build()?;
///
/// let mut store = SharedStore::new().with("prompt", "Write a manual")?;
/// flow.run(&mut store).await?;
/// ```
pub struct Flow {
    name: String,
    start: String,
    nodes: HashMap<String, Arc<dyn Executable>>,
    edges: HashMap<String, HashMap<String, Edge>>,
    handler: Option<Arc<dyn EventHandler>>,
}

impl std::fmt::Debug for Flow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut node_ids: Vec<&String> = self.nodes.keys().collect();
        node_ids.sort();
        f.debug_struct("Flow")
            .field("name", &self.name)
            .field("start", &self.start)
            .field("nodes", &node_ids)
            .field("edge_count", &self.edges.values().map(|m| m.len()).sum::<usize>())
            .field("has_event_handler", &self.handler.is_some())
            .finish()
    }
}

impl Flow {
    /// Create a new builder.
    pub fn builder(name: impl Into<String>) -> FlowBuilder {
        FlowBuilder {
            name: name.into(),
            start: None,
            nodes: Vec::new(),
            edges: Vec::new(),
            handler: None,
        }
    }

    /// Replace the event handler used by [`Flow::run`].
    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Flow name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Id of the start node.
    pub fn start(&self) -> &str {
        &self.start
    }

    /// Where `(from, action)` leads, if anywhere.
    pub fn successor(&self, from: &str, action: &str) -> Option<&str> {
        self.edges
            .get(from)
            .and_then(|m| m.get(action))
            .map(|e| e.to.as_str())
    }

    /// Run the flow against `store`.
    ///
    /// On failure the store keeps whatever earlier nodes wrote; nothing is
    /// rolled back. The error is [`FlowError::FlowAborted`] wrapping the
    /// failing node's error unchanged.
    pub async fn run(&self, store: &mut SharedStore) -> Result<FlowOutcome> {
        self.traverse(store, &self.handler).await
    }

    async fn traverse(
        &self,
        store: &mut SharedStore,
        handler: &Option<Arc<dyn EventHandler>>,
    ) -> Result<FlowOutcome> {
        emit(
            handler,
            Event::FlowStart {
                start: self.start.clone(),
            },
        );

        let mut current = self.start.clone();
        let mut trail: Vec<String> = Vec::new();
        let mut traversals: HashMap<(String, String), u32> = HashMap::new();

        loop {
            let node = self.nodes.get(&current).ok_or_else(|| {
                FlowError::InvalidConfig(format!("flow '{}' has no node '{}'", self.name, current))
            })?;

            emit(
                handler,
                Event::NodeStart {
                    node: current.clone(),
                    kind: node.kind(),
                },
            );

            let action = match node.run(store, handler).await {
                Ok(action) => action,
                Err(e) => {
                    emit(
                        handler,
                        Event::NodeEnd {
                            node: current.clone(),
                            action: None,
                            ok: false,
                        },
                    );
                    emit(
                        handler,
                        Event::FlowEnd {
                            steps: trail.len() + 1,
                            ok: false,
                        },
                    );
                    return Err(FlowError::FlowAborted {
                        node: current,
                        source: Box::new(e),
                    });
                }
            };

            emit(
                handler,
                Event::NodeEnd {
                    node: current.clone(),
                    action: Some(action.to_string()),
                    ok: true,
                },
            );
            trail.push(current.clone());

            let edge = match self.edges.get(&current).and_then(|m| m.get(action.as_str())) {
                Some(edge) => edge,
                None => {
                    emit(
                        handler,
                        Event::FlowEnd {
                            steps: trail.len(),
                            ok: true,
                        },
                    );
                    return Ok(FlowOutcome {
                        trail,
                        last_action: action,
                    });
                }
            };

            if let Some(max) = edge.max_traversals {
                let count = traversals
                    .entry((current.clone(), action.to_string()))
                    .or_insert(0);
                *count += 1;
                if *count > max {
                    emit(
                        handler,
                        Event::FlowEnd {
                            steps: trail.len(),
                            ok: false,
                        },
                    );
                    return Err(FlowError::FlowAborted {
                        node: current.clone(),
                        source: Box::new(FlowError::Other(format!(
                            "edge '{}' --{}--> '{}' taken more than {} time(s)",
                            current, action, edge.to, max
                        ))),
                    });
                }
            }

            emit(
                handler,
                Event::Transition {
                    from: current.clone(),
                    action: action.to_string(),
                    to: edge.to.clone(),
                },
            );
            current = edge.to.clone();
        }
    }
}

impl Executable for Flow {
    fn kind(&self) -> &'static str {
        "flow"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn run<'a>(
        &'a self,
        store: &'a mut SharedStore,
        handler: &'a Option<Arc<dyn EventHandler>>,
    ) -> BoxFut<'a, Result<Action>> {
        Box::pin(async move {
            let handler = if self.handler.is_some() {
                &self.handler
            } else {
                handler
            };
            let outcome = self.traverse(store, handler).await?;
            Ok(outcome.last_action)
        })
    }
}

/// Builder for [`Flow`].
pub struct FlowBuilder {
    name: String,
    start: Option<String>,
    nodes: Vec<(String, Arc<dyn Executable>)>,
    edges: Vec<(String, String, Edge)>,
    handler: Option<Arc<dyn EventHandler>>,
}

impl FlowBuilder {
    /// Register a [`Node`] under `id`.
    pub fn node<N: Node + 'static>(self, id: impl Into<String>, node: N) -> Self {
        self.step(id, Arc::new(NodeStep(node)))
    }

    /// Register a [`BatchNode`] under `id`.
    pub fn batch<B: BatchNode + 'static>(self, id: impl Into<String>, batch: B) -> Self {
        self.step(id, Arc::new(BatchStep(batch)))
    }

    /// Register a nested flow under `id`.
    pub fn flow(self, id: impl Into<String>, flow: Flow) -> Self {
        self.step(id, Arc::new(flow))
    }

    /// Register any [`Executable`] under `id`.
    pub fn step(mut self, id: impl Into<String>, step: Arc<dyn Executable>) -> Self {
        self.nodes.push((id.into(), step));
        self
    }

    /// Route `(from, action)` to `to`.
    pub fn edge(
        mut self,
        from: impl Into<String>,
        action: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        self.edges.push((
            from.into(),
            action.into(),
            Edge {
                to: to.into(),
                max_traversals: None,
            },
        ));
        self
    }

    /// Route `from`'s default action to `to`.
    pub fn then(self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edge(from, Action::DEFAULT, to)
    }

    /// Route `(from, action)` to `to`, allowing the edge at most
    /// `max_traversals` times per run. Cycles must contain such an edge.
    pub fn bounded_edge(
        mut self,
        from: impl Into<String>,
        action: impl Into<String>,
        to: impl Into<String>,
        max_traversals: u32,
    ) -> Self {
        self.edges.push((
            from.into(),
            action.into(),
            Edge {
                to: to.into(),
                max_traversals: Some(max_traversals),
            },
        ));
        self
    }

    /// Set the start node. Default: the first node registered.
    pub fn start(mut self, id: impl Into<String>) -> Self {
        self.start = Some(id.into());
        self
    }

    /// Set the event handler for runs started with [`Flow::run`].
    pub fn event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Validate the edge table and build the flow.
    pub fn build(self) -> std::result::Result<Flow, FlowBuildError> {
        let FlowBuilder {
            name,
            start,
            nodes: node_list,
            edges: edge_list,
            handler,
        } = self;

        let mut graph: DiGraph<String, bool> = DiGraph::new();
        let mut index: HashMap<String, NodeIndex> = HashMap::new();
        let mut nodes: HashMap<String, Arc<dyn Executable>> = HashMap::new();
        let mut order: Vec<String> = Vec::new();

        for (id, step) in node_list {
            if nodes.contains_key(&id) {
                return Err(FlowBuildError::DuplicateNode(id));
            }
            index.insert(id.clone(), graph.add_node(id.clone()));
            order.push(id.clone());
            nodes.insert(id, step);
        }

        let start = match start.or_else(|| order.first().cloned()) {
            Some(s) => s,
            None => return Err(FlowBuildError::Empty(name)),
        };
        let start_idx = *index
            .get(&start)
            .ok_or_else(|| FlowBuildError::NodeNotFound(start.clone()))?;

        let mut edges: HashMap<String, HashMap<String, Edge>> = HashMap::new();
        for (from, action, edge) in edge_list {
            let from_idx = *index
                .get(&from)
                .ok_or_else(|| FlowBuildError::NodeNotFound(from.clone()))?;
            let to_idx = *index
                .get(&edge.to)
                .ok_or_else(|| FlowBuildError::NodeNotFound(edge.to.clone()))?;
            graph.add_edge(from_idx, to_idx, edge.max_traversals.is_some());

            let by_action = edges.entry(from.clone()).or_default();
            if by_action.contains_key(&action) {
                return Err(FlowBuildError::DuplicateEdge { from, action });
            }
            by_action.insert(action, edge);
        }

        // Reachability from start.
        let mut dfs = Dfs::new(&graph, start_idx);
        let mut reached = vec![false; graph.node_count()];
        while let Some(nx) = dfs.next(&graph) {
            reached[nx.index()] = true;
        }
        if let Some(id) = order.iter().find(|id| !reached[index[*id].index()]) {
            return Err(FlowBuildError::Unreachable(id.clone()));
        }

        // Every cycle must cross a bounded edge: drop bounded edges, then no
        // strongly connected component may loop.
        let unbounded = graph.filter_map(|_, n| Some(n.clone()), |_, bounded| {
            if *bounded {
                None
            } else {
                Some(())
            }
        });
        for scc in tarjan_scc(&unbounded) {
            let loops = scc.len() > 1 || unbounded.contains_edge(scc[0], scc[0]);
            if loops {
                let mut names: Vec<&str> = scc.iter().map(|i| unbounded[*i].as_str()).collect();
                names.sort_unstable();
                return Err(FlowBuildError::UnboundedCycle(names.join(" -> ")));
            }
        }

        Ok(Flow {
            name,
            start,
            nodes,
            edges,
            handler,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::FnEventHandler;
    use crate::retry::RetryPolicy;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Appends its tag to the `visited` list and returns a fixed action.
    struct Mark {
        tag: &'static str,
        action: &'static str,
    }

    fn mark(tag: &'static str) -> Mark {
        Mark {
            tag,
            action: Action::DEFAULT,
        }
    }

    #[async_trait]
    impl Node for Mark {
        type Prep = Vec<String>;
        type Exec = ();

        fn name(&self) -> &str {
            self.tag
        }

        async fn prep(&self, store: &SharedStore) -> Result<Vec<String>> {
            store.get_or("visited", Vec::new())
        }

        async fn exec(&self, _input: &Vec<String>, _attempt: u32) -> Result<()> {
            Ok(())
        }

        async fn post(
            &self,
            store: &mut SharedStore,
            mut visited: Vec<String>,
            _exec: (),
        ) -> Result<Action> {
            visited.push(self.tag.to_string());
            store.insert("visited", visited)?;
            Ok(Action::from(self.action))
        }
    }

    /// Always fails with a transient error.
    struct Broken;

    #[async_trait]
    impl Node for Broken {
        type Prep = ();
        type Exec = ();

        fn name(&self) -> &str {
            "broken"
        }

        fn retry_policy(&self) -> RetryPolicy {
            RetryPolicy::new(2, Duration::ZERO)
        }

        async fn prep(&self, _store: &SharedStore) -> Result<()> {
            Ok(())
        }

        async fn exec(&self, _input: &(), _attempt: u32) -> Result<()> {
            Err(FlowError::HttpError {
                status: 500,
                body: "boom".into(),
                retry_after: None,
            })
        }

        async fn post(&self, _store: &mut SharedStore, _p: (), _e: ()) -> Result<Action> {
            Ok(Action::default())
        }
    }

    /// Returns "again" until it has run `loops` times, then "done".
    struct Counter {
        loops: usize,
    }

    #[async_trait]
    impl Node for Counter {
        type Prep = usize;
        type Exec = ();

        fn name(&self) -> &str {
            "counter"
        }

        async fn prep(&self, store: &SharedStore) -> Result<usize> {
            store.get_or("count", 0usize)
        }

        async fn exec(&self, _input: &usize, _attempt: u32) -> Result<()> {
            Ok(())
        }

        async fn post(&self, store: &mut SharedStore, count: usize, _e: ()) -> Result<Action> {
            store.insert("count", count + 1)?;
            if count + 1 < self.loops {
                Ok(Action::new("again"))
            } else {
                Ok(Action::new("done"))
            }
        }
    }

    fn chain() -> Flow {
        Flow::builder("chain")
            .node("a", mark("a"))
            .node("b", mark("b"))
            .node("c", mark("c"))
            .then("a", "b")
            .then("b", "c")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_three_node_chain_visits_each_once() {
        let flow = chain();
        let mut store = SharedStore::new();
        let outcome = flow.run(&mut store).await.unwrap();

        assert_eq!(outcome.trail, vec!["a", "b", "c"]);
        assert!(outcome.last_action.is_default());
        assert_eq!(store.get("visited"), Some(&json!(["a", "b", "c"])));
    }

    #[tokio::test]
    async fn test_action_routes_to_branch() {
        let flow = Flow::builder("branch")
            .node(
                "decide",
                Mark {
                    tag: "decide",
                    action: "skip",
                },
            )
            .node("slow", mark("slow"))
            .node("fast", mark("fast"))
            .then("decide", "slow")
            .edge("decide", "skip", "fast")
            .build()
            .unwrap();

        let mut store = SharedStore::new();
        let outcome = flow.run(&mut store).await.unwrap();
        assert_eq!(outcome.trail, vec!["decide", "fast"]);
    }

    #[tokio::test]
    async fn test_failure_aborts_and_keeps_earlier_writes() {
        let flow = Flow::builder("abort")
            .node("a", mark("a"))
            .node("broken", Broken)
            .node("c", mark("c"))
            .then("a", "broken")
            .then("broken", "c")
            .build()
            .unwrap();

        let mut store = SharedStore::new();
        let err = flow.run(&mut store).await.unwrap_err();

        match &err {
            FlowError::FlowAborted { node, source } => {
                assert_eq!(node, "broken");
                assert!(matches!(
                    **source,
                    FlowError::ExecutionExhausted { attempts: 2, .. }
                ));
            }
            other => panic!("expected FlowAborted, got {:?}", other),
        }
        assert_eq!(store.get("visited"), Some(&json!(["a"])));
    }

    #[tokio::test]
    async fn test_bounded_loop_runs_until_exit() {
        let flow = Flow::builder("loop")
            .node("counter", Counter { loops: 3 })
            .node("end", mark("end"))
            .bounded_edge("counter", "again", "counter", 5)
            .edge("counter", "done", "end")
            .build()
            .unwrap();

        let mut store = SharedStore::new();
        let outcome = flow.run(&mut store).await.unwrap();
        assert_eq!(outcome.trail, vec!["counter", "counter", "counter", "end"]);
    }

    #[tokio::test]
    async fn test_bounded_loop_limit_aborts() {
        let flow = Flow::builder("loop")
            .node("counter", Counter { loops: 10 })
            .node("end", mark("end"))
            .bounded_edge("counter", "again", "counter", 2)
            .edge("counter", "done", "end")
            .build()
            .unwrap();

        let mut store = SharedStore::new();
        let err = flow.run(&mut store).await.unwrap_err();
        assert_eq!(err.failed_node(), Some("counter"));
        assert_eq!(store.get("count"), Some(&json!(3)));
    }

    #[tokio::test]
    async fn test_nested_flow_runs_inline() {
        let outer = Flow::builder("outer")
            .flow("inner", chain())
            .node("after", mark("after"))
            .then("inner", "after")
            .build()
            .unwrap();

        let mut store = SharedStore::new();
        let outcome = outer.run(&mut store).await.unwrap();
        assert_eq!(outcome.trail, vec!["inner", "after"]);
        assert_eq!(store.get("visited"), Some(&json!(["a", "b", "c", "after"])));
    }

    #[tokio::test]
    async fn test_events_follow_traversal() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let flow = Flow::builder("chain")
            .node("a", mark("a"))
            .node("b", mark("b"))
            .then("a", "b")
            .event_handler(Arc::new(FnEventHandler(move |e: Event| {
                sink.lock().unwrap().push(e.kind());
            })))
            .build()
            .unwrap();

        flow.run(&mut SharedStore::new()).await.unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                "flow_start",
                "node_start",
                "node_end",
                "transition",
                "node_start",
                "node_end",
                "flow_end"
            ]
        );
    }

    #[test]
    fn test_build_rejects_unknown_target() {
        let err = Flow::builder("bad")
            .node("a", mark("a"))
            .then("a", "ghost")
            .build()
            .unwrap_err();
        assert_eq!(err, FlowBuildError::NodeNotFound("ghost".into()));
    }

    #[test]
    fn test_build_rejects_unreachable_node() {
        let err = Flow::builder("bad")
            .node("a", mark("a"))
            .node("island", mark("island"))
            .build()
            .unwrap_err();
        assert_eq!(err, FlowBuildError::Unreachable("island".into()));
    }

    #[test]
    fn test_build_rejects_unbounded_cycle() {
        let err = Flow::builder("bad")
            .node("a", mark("a"))
            .node("b", mark("b"))
            .then("a", "b")
            .then("b", "a")
            .build()
            .unwrap_err();
        assert_eq!(err, FlowBuildError::UnboundedCycle("a -> b".into()));
    }

    #[test]
    fn test_build_rejects_duplicate_edge_and_node() {
        let err = Flow::builder("bad")
            .node("a", mark("a"))
            .node("b", mark("b"))
            .then("a", "b")
            .then("a", "b")
            .build()
            .unwrap_err();
        assert!(matches!(err, FlowBuildError::DuplicateEdge { .. }));

        let err = Flow::builder("bad")
            .node("a", mark("a"))
            .node("a", mark("a"))
            .build()
            .unwrap_err();
        assert_eq!(err, FlowBuildError::DuplicateNode("a".into()));
    }

    #[test]
    fn test_build_rejects_empty_flow() {
        let err = Flow::builder("empty").build().unwrap_err();
        assert_eq!(err, FlowBuildError::Empty("empty".into()));
    }

    #[test]
    fn test_successor_lookup() {
        let flow = chain();
        assert_eq!(flow.start(), "a");
        assert_eq!(flow.successor("a", "default"), Some("b"));
        assert_eq!(flow.successor("c", "default"), None);
    }
}
