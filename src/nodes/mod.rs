//! Concrete nodes for the manual and tutorial pipelines.
//!
//! | Node | Reads | Writes |
//! |------|-------|--------|
//! | [`SummarizeDocuments`] | `files_content`, `prompt` | `manual` |
//! | [`GenerateQuiz`] | `manual` | `quiz` |
//! | [`IdentifyAbstractions`] | `files_content`, `prompt`, `max_abstraction_num` | `abstractions` |
//! | [`AnalyzeRelationships`] | `abstractions`, `files_content` | `relationships` |
//! | [`OrderChapters`] | `abstractions`, `relationships` | `chapter_order` |
//! | [`WriteChapters`] (batch) | the above | `chapters` |
//! | [`CombineTutorial`] | `chapters`, `relationships` | `manual` |
//!
//! Every LLM-backed node also honors the `use_cache` flag.

pub mod analysis;
pub mod chapters;
pub mod combine;
pub mod manual;

pub use analysis::{AnalyzeRelationships, IdentifyAbstractions, OrderChapters};
pub use chapters::{ChapterJob, WriteChapters};
pub use combine::CombineTutorial;
pub use manual::{GenerateQuiz, SummarizeDocuments};

use std::sync::Arc;

use serde_json::Value;

use crate::error::{FlowError, Result};
use crate::gateway::{LlmGateway, LlmSettings};
use crate::ingest::FileSet;
use crate::retry::RetryPolicy;
use crate::store::{keys, SharedStore};

/// What every LLM-backed node needs: the gateway, model settings and the
/// execute retry policy.
#[derive(Debug, Clone)]
pub struct LlmStage {
    pub gateway: Arc<LlmGateway>,
    pub settings: LlmSettings,
    pub retry: RetryPolicy,
}

impl LlmStage {
    /// Default settings, single attempt.
    pub fn new(gateway: Arc<LlmGateway>) -> Self {
        Self {
            gateway,
            settings: LlmSettings::default(),
            retry: RetryPolicy::once(),
        }
    }

    pub fn with_settings(mut self, settings: LlmSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Settings for one attempt, with the run's cache flag applied.
    pub(crate) fn settings_for(&self, use_cache: bool, attempt: u32) -> LlmSettings {
        self.settings
            .clone()
            .with_cache(use_cache)
            .for_attempt(attempt)
    }
}

/// Read `files_content`, either as `[[name, text], ...]` or as a
/// `{name: text}` object.
pub fn files_from_store(store: &SharedStore) -> Result<FileSet> {
    match store.get(keys::FILES_CONTENT) {
        None => Err(FlowError::MissingKey(keys::FILES_CONTENT.to_string())),
        Some(Value::Object(map)) => Ok(map
            .iter()
            .map(|(name, text)| {
                let text = text.as_str().map(str::to_string).ok_or_else(|| {
                    FlowError::Validation(format!("file '{}' content is not a string", name))
                })?;
                Ok((name.clone(), text))
            })
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .collect()),
        Some(_) => store.get_as(keys::FILES_CONTENT),
    }
}

/// The run's `use_cache` flag, off when absent.
pub(crate) fn use_cache(store: &SharedStore) -> Result<bool> {
    store.get_or(keys::USE_CACHE, false)
}

/// Per-file character allowance when `count` files share `budget`.
pub(crate) fn per_file_budget(budget: usize, count: usize) -> usize {
    (budget / count.max(1)).max(1)
}

/// Render the files at `indices` so that, with `fixed` (the system prompt
/// and the user prompt up to its trailing documents), the request fits in
/// `max_chars`. File headers are paid for before the texts are shared out.
pub(crate) fn fit_files(
    max_chars: usize,
    fixed: &[&str],
    files: &FileSet,
    indices: &[usize],
) -> String {
    let fixed: usize = fixed.iter().map(|s| s.chars().count()).sum();
    let headers = files.render_context(indices, 0).chars().count();
    let room = max_chars.saturating_sub(fixed + headers);
    files.render_context(indices, per_file_budget(room, indices.len()))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::backend::MockBackend;

    /// Gateway over a shared mock so tests can inspect calls afterwards.
    pub fn mock_stage(mock: &Arc<MockBackend>) -> LlmStage {
        let gateway = LlmGateway::builder()
            .backend(mock.clone())
            .build()
            .unwrap();
        LlmStage::new(Arc::new(gateway))
    }
}
