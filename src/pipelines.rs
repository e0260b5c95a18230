//! The two shipped pipelines, wired from a [`PipelineConfig`].
//!
//! ```text
//! manual:   summarize -> quiz
//! tutorial: identify -> relationships -> order -> write (batch) -> combine -> quiz
//! ```
//!
//! Both read their inputs from the keys [`initial_store`] sets up and leave
//! every intermediate result in the store, so a caller can read `manual` and
//! `quiz` (and, for the tutorial, `abstractions` and `chapters`) afterwards.

use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::flow::{Flow, FlowBuildError};
use crate::gateway::{LlmGateway, LlmSettings};
use crate::ingest::FileSet;
use crate::nodes::{
    AnalyzeRelationships, CombineTutorial, GenerateQuiz, IdentifyAbstractions, LlmStage,
    OrderChapters, SummarizeDocuments, WriteChapters,
};
use crate::store::{keys, SharedStore};

/// Stage shared by every LLM-backed node: configured model, temperature and
/// retry policy.
pub fn stage_from_config(gateway: Arc<LlmGateway>, config: &PipelineConfig) -> LlmStage {
    LlmStage::new(gateway)
        .with_settings(LlmSettings::from_config(config))
        .with_retry(config.retry_policy())
}

/// Documents to manual to quiz.
pub fn manual_flow(
    gateway: Arc<LlmGateway>,
    config: &PipelineConfig,
) -> std::result::Result<Flow, FlowBuildError> {
    let stage = stage_from_config(gateway, config);
    Flow::builder("manual")
        .node("summarize", SummarizeDocuments::new(stage.clone()))
        .node("quiz", GenerateQuiz::new(stage))
        .then("summarize", "quiz")
        .build()
}

/// Documents to abstractions to a chaptered tutorial, then a quiz over it.
pub fn tutorial_flow(
    gateway: Arc<LlmGateway>,
    config: &PipelineConfig,
) -> std::result::Result<Flow, FlowBuildError> {
    let stage = stage_from_config(gateway, config);
    Flow::builder("tutorial")
        .node(
            "identify",
            IdentifyAbstractions::new(stage.clone())
                .with_default_max(config.tutorial.max_abstraction_num),
        )
        .node("relationships", AnalyzeRelationships::new(stage.clone()))
        .node("order", OrderChapters::new(stage.clone()))
        .batch(
            "write",
            WriteChapters::new(stage.clone()).with_concurrency(config.tutorial.chapter_concurrency),
        )
        .node("combine", CombineTutorial::new())
        .node("quiz", GenerateQuiz::new(stage))
        .then("identify", "relationships")
        .then("relationships", "order")
        .then("order", "write")
        .then("write", "combine")
        .then("combine", "quiz")
        .build()
}

/// Store holding a run's inputs: files, prompt, cache flag and, when given,
/// the abstraction limit.
pub fn initial_store(
    files: &FileSet,
    prompt: &str,
    use_cache: bool,
    max_abstraction_num: Option<usize>,
) -> Result<SharedStore> {
    let mut store = SharedStore::new()
        .with(keys::FILES_CONTENT, files)?
        .with(keys::PROMPT, prompt)?
        .with(keys::USE_CACHE, use_cache)?;
    if let Some(max) = max_abstraction_num {
        store.insert(keys::MAX_ABSTRACTION_NUM, max)?;
    }
    Ok(store)
}
