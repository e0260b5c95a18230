//! Manual and quiz nodes.

use async_trait::async_trait;

use super::{files_from_store, use_cache, LlmStage};
use crate::error::{FlowError, Result};
use crate::model::QuizQuestion;
use crate::node::{Action, Node};
use crate::retry::RetryPolicy;
use crate::stages::{generate_quiz_from_manual, summarize_and_structure};
use crate::store::{keys, SharedStore};

/// Execute input for [`SummarizeDocuments`].
#[derive(Debug, Clone)]
pub struct SummarizeInput {
    pub texts: Vec<String>,
    pub prompt: String,
    pub use_cache: bool,
}

/// Writes `manual` from `files_content` and `prompt`.
#[derive(Debug, Clone)]
pub struct SummarizeDocuments {
    stage: LlmStage,
}

impl SummarizeDocuments {
    pub fn new(stage: LlmStage) -> Self {
        Self { stage }
    }
}

#[async_trait]
impl Node for SummarizeDocuments {
    type Prep = SummarizeInput;
    type Exec = String;

    fn name(&self) -> &str {
        "summarize_documents"
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.stage.retry.clone()
    }

    async fn prep(&self, store: &SharedStore) -> Result<SummarizeInput> {
        let files = files_from_store(store)?;
        Ok(SummarizeInput {
            texts: files.texts().into_iter().map(str::to_string).collect(),
            prompt: store.get_as(keys::PROMPT)?,
            use_cache: use_cache(store)?,
        })
    }

    async fn exec(&self, input: &SummarizeInput, attempt: u32) -> Result<String> {
        let settings = self.stage.settings_for(input.use_cache, attempt);
        let manual =
            summarize_and_structure(&self.stage.gateway, &input.texts, &input.prompt, &settings)
                .await?;
        // Nothing downstream can work from a blank manual.
        if manual.trim().is_empty() {
            return Err(FlowError::empty_response());
        }
        Ok(manual)
    }

    async fn post(
        &self,
        store: &mut SharedStore,
        _prep: SummarizeInput,
        manual: String,
    ) -> Result<Action> {
        store.insert(keys::MANUAL, manual)?;
        Ok(Action::default())
    }
}

/// Execute input for [`GenerateQuiz`].
#[derive(Debug, Clone)]
pub struct QuizInput {
    pub manual: String,
    pub use_cache: bool,
}

/// Writes `quiz` from `manual`.
#[derive(Debug, Clone)]
pub struct GenerateQuiz {
    stage: LlmStage,
}

impl GenerateQuiz {
    pub fn new(stage: LlmStage) -> Self {
        Self { stage }
    }
}

#[async_trait]
impl Node for GenerateQuiz {
    type Prep = QuizInput;
    type Exec = Vec<QuizQuestion>;

    fn name(&self) -> &str {
        "generate_quiz"
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.stage.retry.clone()
    }

    async fn prep(&self, store: &SharedStore) -> Result<QuizInput> {
        Ok(QuizInput {
            manual: store.get_as(keys::MANUAL)?,
            use_cache: use_cache(store)?,
        })
    }

    async fn exec(&self, input: &QuizInput, attempt: u32) -> Result<Vec<QuizQuestion>> {
        let settings = self.stage.settings_for(input.use_cache, attempt);
        generate_quiz_from_manual(&self.stage.gateway, &input.manual, &settings).await
    }

    async fn post(
        &self,
        store: &mut SharedStore,
        _prep: QuizInput,
        quiz: Vec<QuizQuestion>,
    ) -> Result<Action> {
        store.insert(keys::QUIZ, quiz)?;
        Ok(Action::default())
    }
}
