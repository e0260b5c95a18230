//! Chapter writing: one LLM call per abstraction, in chapter order.

use async_trait::async_trait;

use super::{files_from_store, per_file_budget, use_cache, LlmStage};
use crate::error::{FlowError, Result};
use crate::model::{Abstraction, Chapter, RelationshipMap};
use crate::node::{Action, BatchNode};
use crate::prompt::{numbered_list, render, CHAPTER_SYSTEM, WRITE_CHAPTER};
use crate::retry::RetryPolicy;
use crate::sanitizer::extract::extract_fenced;
use crate::store::{keys, SharedStore};

/// Body used in place of a chapter that could not be written.
pub const PLACEHOLDER_BODY: &str =
    "<p class=\"chapter-unavailable\">This chapter could not be generated.</p>";

/// Everything needed to write one chapter, resolved up front.
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterJob {
    /// 1-based chapter number.
    pub number: usize,
    pub total: usize,
    /// Index of the abstraction the chapter explains.
    pub abstraction: usize,
    pub name: String,
    pub description: String,
    /// One line per related abstraction, with its chapter number.
    pub related: String,
    /// Numbered list of every chapter title.
    pub outline: String,
    /// Source text of the files the abstraction was found in.
    pub files: String,
    pub use_cache: bool,
}

impl ChapterJob {
    fn prompt(&self) -> String {
        let number = self.number.to_string();
        let total = self.total.to_string();
        render(
            WRITE_CHAPTER,
            &[
                ("number", &number),
                ("total", &total),
                ("name", &self.name),
                ("description", &self.description),
                ("related", &self.related),
                ("outline", &self.outline),
                ("files", &self.files),
            ],
        )
    }
}

/// Writes `chapters` following `chapter_order`.
///
/// A chapter that exhausts its retries fails the whole batch unless
/// [`tolerate_failures`](Self::tolerate_failures) is set, in which case it
/// is recorded with [`PLACEHOLDER_BODY`].
#[derive(Debug, Clone)]
pub struct WriteChapters {
    stage: LlmStage,
    concurrency: usize,
    tolerate_failures: bool,
}

impl WriteChapters {
    pub fn new(stage: LlmStage) -> Self {
        Self {
            stage,
            concurrency: 1,
            tolerate_failures: false,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn tolerate_failures(mut self) -> Self {
        self.tolerate_failures = true;
        self
    }
}

#[async_trait]
impl BatchNode for WriteChapters {
    type Item = ChapterJob;
    type Output = Chapter;

    fn name(&self) -> &str {
        "write_chapters"
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.stage.retry.clone()
    }

    fn concurrency(&self) -> usize {
        self.concurrency
    }

    async fn prep(&self, store: &SharedStore) -> Result<Vec<ChapterJob>> {
        let abstractions: Vec<Abstraction> = store.get_as(keys::ABSTRACTIONS)?;
        let relationships: RelationshipMap = store.get_as(keys::RELATIONSHIPS)?;
        let order: Vec<usize> = store.get_as(keys::CHAPTER_ORDER)?;
        let files = files_from_store(store)?;
        let use_cache = use_cache(store)?;

        let ordered = order
            .iter()
            .map(|&i| {
                abstractions.get(i).ok_or_else(|| {
                    FlowError::Validation(format!(
                        "chapter order names abstraction {} but only {} exist",
                        i,
                        abstractions.len()
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        // Abstraction index -> chapter number.
        let mut chapter_of = vec![0; abstractions.len()];
        for (position, &index) in order.iter().enumerate() {
            chapter_of[index] = position + 1;
        }

        let outline = numbered_list(&ordered.iter().map(|a| a.name.clone()).collect::<Vec<_>>());
        let total = order.len();

        let jobs = order
            .iter()
            .zip(ordered)
            .enumerate()
            .map(|(position, (&index, abstraction))| {
                let related = relationships
                    .related_to(index)
                    .into_iter()
                    .filter_map(|r| abstractions.get(r).map(|a| (r, a)))
                    .map(|(r, a)| format!("- Chapter {}: {}", chapter_of[r], a.name))
                    .collect::<Vec<_>>();
                let related = if related.is_empty() {
                    "(none)".to_string()
                } else {
                    related.join("\n")
                };
                let budget =
                    per_file_budget(self.stage.gateway.max_chars() / 2, abstraction.files.len());

                ChapterJob {
                    number: position + 1,
                    total,
                    abstraction: index,
                    name: abstraction.name.clone(),
                    description: abstraction.description.clone(),
                    related,
                    outline: outline.clone(),
                    files: files.render_context(&abstraction.files, budget),
                    use_cache,
                }
            })
            .collect();
        Ok(jobs)
    }

    async fn exec_item(&self, _index: usize, job: &ChapterJob, attempt: u32) -> Result<Chapter> {
        let settings = self.stage.settings_for(job.use_cache, attempt);
        let raw = self
            .stage
            .gateway
            .call(&settings, CHAPTER_SYSTEM, &job.prompt())
            .await?;

        let trimmed = raw.trim();
        let body = extract_fenced(trimmed).unwrap_or(trimmed).trim();
        if body.is_empty() {
            return Err(FlowError::empty_response());
        }
        Ok(Chapter {
            number: job.number,
            abstraction: job.abstraction,
            title: job.name.clone(),
            body: body.to_string(),
        })
    }

    async fn exec_item_fallback(
        &self,
        _index: usize,
        job: &ChapterJob,
        error: FlowError,
    ) -> Result<Chapter> {
        if !self.tolerate_failures {
            return Err(error);
        }
        tracing::warn!(
            chapter = job.number,
            error = %error.root_cause(),
            "chapter replaced with placeholder"
        );
        Ok(Chapter {
            number: job.number,
            abstraction: job.abstraction,
            title: job.name.clone(),
            body: PLACEHOLDER_BODY.to_string(),
        })
    }

    async fn post(
        &self,
        store: &mut SharedStore,
        _items: Vec<ChapterJob>,
        chapters: Vec<Chapter>,
    ) -> Result<Action> {
        store.insert(keys::CHAPTERS, chapters)?;
        Ok(Action::default())
    }
}
