//! # Manual Flow
//!
//! A node/flow engine for staged LLM work, and the pipelines built on it that
//! turn uploaded documents into a training manual, a chaptered tutorial and a
//! quiz.
//!
//! ## Core Concepts
//!
//! - **[`Node`]**: one unit of work with `prep`, `exec` (retried per its
//!   [`RetryPolicy`]) and `post` phases over a [`SharedStore`].
//! - **[`BatchNode`]**: a node whose execute phase fans out over items and
//!   fans back in, preserving item order.
//! - **[`Flow`]**: an edge table keyed by `(node, action)`, validated when
//!   built and driven sequentially. Flows nest.
//! - **[`LlmGateway`]**: the single seam to the provider. Truncates to the
//!   character budget, optionally caches, never retries.
//! - **[`sanitizer`]**: turns raw model text into typed values, stripping
//!   stray quotes and code fences and validating shapes.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use manual_flow::{pipelines, FileSet, LlmGateway, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::default();
//!     let gateway = Arc::new(LlmGateway::from_config(&config)?);
//!     let flow = pipelines::manual_flow(gateway, &config)?;
//!
//!     let files = FileSet::new().with("ppe.txt", "Wear gloves and goggles.");
//!     let mut store = pipelines::initial_store(&files, "Write a PPE manual", true, None)?;
//!     flow.run(&mut store).await?;
//!
//!     let manual: String = store.get_as("manual")?;
//!     println!("{}", manual);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod events;
pub mod flow;
pub mod gateway;
pub mod ingest;
pub mod model;
pub mod node;
pub mod nodes;
pub mod pipelines;
pub mod prompt;
pub mod retry;
pub mod sanitizer;
pub mod stages;
pub mod store;

pub use backend::{Backend, MockBackend, MockReply, OpenAiBackend};
pub use config::PipelineConfig;
pub use error::{FlowError, Result};
pub use events::{Event, EventHandler, FnEventHandler, TracingEventHandler};
pub use flow::{Flow, FlowBuildError, FlowBuilder, FlowOutcome};
pub use gateway::{LlmGateway, LlmGatewayBuilder, LlmSettings};
pub use ingest::FileSet;
pub use model::{Abstraction, Chapter, QuizQuestion, Relationship, RelationshipMap};
pub use node::{Action, BatchNode, BatchStep, BoxFut, Executable, Node, NodeStep};
pub use nodes::LlmStage;
pub use retry::{RetryOn, RetryPolicy, Wait};
pub use store::SharedStore;
