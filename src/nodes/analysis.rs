//! Tutorial analysis nodes: identify abstractions, relate them, order them.

use async_trait::async_trait;

use super::{files_from_store, fit_files, use_cache, LlmStage};
use crate::error::Result;
use crate::ingest::FileSet;
use crate::model::{Abstraction, RelationshipMap};
use crate::node::{Action, Node};
use crate::prompt::{
    indexed_list, render, ANALYZE_RELATIONSHIPS, IDENTIFY_ABSTRACTIONS, ORDER_CHAPTERS,
    TUTORIAL_JSON_SYSTEM,
};
use crate::retry::RetryPolicy;
use crate::sanitizer::{parse_abstractions, parse_chapter_order, parse_relationships};
use crate::stages::parse_reported;
use crate::store::{keys, SharedStore};

/// Request used when the store carries no prompt.
const DEFAULT_REQUEST: &str = "Build a beginner-friendly training tutorial from these documents.";

/// One line per abstraction: `[i] name: description`.
fn describe_abstractions(abstractions: &[Abstraction]) -> String {
    let lines: Vec<String> = abstractions
        .iter()
        .map(|a| format!("{}: {}", a.name, a.description))
        .collect();
    indexed_list(&lines)
}

/// Execute input for [`IdentifyAbstractions`].
#[derive(Debug, Clone)]
pub struct IdentifyInput {
    pub files: FileSet,
    pub request: String,
    pub max: usize,
    pub use_cache: bool,
}

/// Writes `abstractions`: the core concepts found in the uploaded files.
#[derive(Debug, Clone)]
pub struct IdentifyAbstractions {
    stage: LlmStage,
    default_max: usize,
}

impl IdentifyAbstractions {
    pub fn new(stage: LlmStage) -> Self {
        Self {
            stage,
            default_max: 10,
        }
    }

    /// Limit used when the store has no `max_abstraction_num`.
    pub fn with_default_max(mut self, max: usize) -> Self {
        self.default_max = max.max(1);
        self
    }
}

#[async_trait]
impl Node for IdentifyAbstractions {
    type Prep = IdentifyInput;
    type Exec = Vec<Abstraction>;

    fn name(&self) -> &str {
        "identify_abstractions"
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.stage.retry.clone()
    }

    async fn prep(&self, store: &SharedStore) -> Result<IdentifyInput> {
        let request: String = store.get_or(keys::PROMPT, String::new())?;
        let request = if request.trim().is_empty() {
            DEFAULT_REQUEST.to_string()
        } else {
            request
        };
        Ok(IdentifyInput {
            files: files_from_store(store)?,
            request,
            max: store
                .get_or(keys::MAX_ABSTRACTION_NUM, self.default_max)?
                .max(1),
            use_cache: use_cache(store)?,
        })
    }

    async fn exec(&self, input: &IdentifyInput, attempt: u32) -> Result<Vec<Abstraction>> {
        let max = input.max.to_string();
        // `{files}` closes the template, so the documents absorb any cut.
        let head = render(
            IDENTIFY_ABSTRACTIONS,
            &[("request", &input.request), ("max", &max), ("files", "")],
        );
        let all: Vec<usize> = (0..input.files.len()).collect();
        let files = fit_files(
            self.stage.gateway.max_chars(),
            &[TUTORIAL_JSON_SYSTEM, &head],
            &input.files,
            &all,
        );
        let prompt = head + &files;

        let settings = self.stage.settings_for(input.use_cache, attempt);
        let raw = self
            .stage
            .gateway
            .call(&settings, TUTORIAL_JSON_SYSTEM, &prompt)
            .await?;
        parse_reported(&self.stage.gateway, self.name(), &raw, |r| {
            parse_abstractions(r, input.files.len(), input.max)
        })
    }

    async fn post(
        &self,
        store: &mut SharedStore,
        _prep: IdentifyInput,
        abstractions: Vec<Abstraction>,
    ) -> Result<Action> {
        store.insert(keys::ABSTRACTIONS, abstractions)?;
        Ok(Action::default())
    }
}

/// Execute input for [`AnalyzeRelationships`].
#[derive(Debug, Clone)]
pub struct RelationshipsInput {
    pub abstractions: Vec<Abstraction>,
    pub files: FileSet,
    pub use_cache: bool,
}

/// Writes `relationships`: a project summary and the links between
/// abstractions.
#[derive(Debug, Clone)]
pub struct AnalyzeRelationships {
    stage: LlmStage,
}

impl AnalyzeRelationships {
    pub fn new(stage: LlmStage) -> Self {
        Self { stage }
    }
}

#[async_trait]
impl Node for AnalyzeRelationships {
    type Prep = RelationshipsInput;
    type Exec = RelationshipMap;

    fn name(&self) -> &str {
        "analyze_relationships"
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.stage.retry.clone()
    }

    async fn prep(&self, store: &SharedStore) -> Result<RelationshipsInput> {
        Ok(RelationshipsInput {
            abstractions: store.get_as(keys::ABSTRACTIONS)?,
            files: files_from_store(store)?,
            use_cache: use_cache(store)?,
        })
    }

    async fn exec(&self, input: &RelationshipsInput, attempt: u32) -> Result<RelationshipMap> {
        let mut referenced: Vec<usize> = input
            .abstractions
            .iter()
            .flat_map(|a| a.files.iter().copied())
            .collect();
        referenced.sort_unstable();
        referenced.dedup();

        let abstractions = describe_abstractions(&input.abstractions);
        let head = render(
            ANALYZE_RELATIONSHIPS,
            &[("abstractions", &abstractions), ("files", "")],
        );
        let files = fit_files(
            self.stage.gateway.max_chars(),
            &[TUTORIAL_JSON_SYSTEM, &head],
            &input.files,
            &referenced,
        );
        let prompt = head + &files;

        let settings = self.stage.settings_for(input.use_cache, attempt);
        let raw = self
            .stage
            .gateway
            .call(&settings, TUTORIAL_JSON_SYSTEM, &prompt)
            .await?;
        parse_reported(&self.stage.gateway, self.name(), &raw, |r| {
            parse_relationships(r, input.abstractions.len())
        })
    }

    async fn post(
        &self,
        store: &mut SharedStore,
        _prep: RelationshipsInput,
        relationships: RelationshipMap,
    ) -> Result<Action> {
        store.insert(keys::RELATIONSHIPS, relationships)?;
        Ok(Action::default())
    }
}

/// Execute input for [`OrderChapters`].
#[derive(Debug, Clone)]
pub struct OrderInput {
    pub abstractions: Vec<Abstraction>,
    pub relationships: RelationshipMap,
    pub use_cache: bool,
}

/// Writes `chapter_order`: every abstraction index once, in teaching order.
#[derive(Debug, Clone)]
pub struct OrderChapters {
    stage: LlmStage,
}

impl OrderChapters {
    pub fn new(stage: LlmStage) -> Self {
        Self { stage }
    }
}

#[async_trait]
impl Node for OrderChapters {
    type Prep = OrderInput;
    type Exec = Vec<usize>;

    fn name(&self) -> &str {
        "order_chapters"
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.stage.retry.clone()
    }

    async fn prep(&self, store: &SharedStore) -> Result<OrderInput> {
        Ok(OrderInput {
            abstractions: store.get_as(keys::ABSTRACTIONS)?,
            relationships: store.get_as(keys::RELATIONSHIPS)?,
            use_cache: use_cache(store)?,
        })
    }

    async fn exec(&self, input: &OrderInput, attempt: u32) -> Result<Vec<usize>> {
        let abstractions = describe_abstractions(&input.abstractions);
        let relationships = input
            .relationships
            .relationships
            .iter()
            .map(|r| format!("{} -> {}: {}", r.from, r.to, r.label))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = render(
            ORDER_CHAPTERS,
            &[
                ("summary", &input.relationships.summary),
                ("abstractions", &abstractions),
                ("relationships", &relationships),
            ],
        );

        let settings = self.stage.settings_for(input.use_cache, attempt);
        let raw = self
            .stage
            .gateway
            .call(&settings, TUTORIAL_JSON_SYSTEM, &prompt)
            .await?;
        parse_reported(&self.stage.gateway, self.name(), &raw, |r| {
            parse_chapter_order(r, input.abstractions.len())
        })
    }

    async fn post(
        &self,
        store: &mut SharedStore,
        _prep: OrderInput,
        order: Vec<usize>,
    ) -> Result<Action> {
        store.insert(keys::CHAPTER_ORDER, order)?;
        Ok(Action::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use crate::error::FlowError;
    use crate::node::{Executable, NodeStep};
    use crate::nodes::test_support::mock_stage;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    const ABSTRACTIONS: &str = r#"[
        {"name": "Lockout", "description": "Isolating energy.", "files": [0]},
        {"name": "Tagout", "description": "Labelling isolation.", "files": [0, 1]},
        {"name": "Audit", "description": "Checking the process.", "files": [1]}
    ]"#;

    fn files() -> serde_json::Value {
        json!([["loto.txt", "lockout text"], ["audit.txt", "audit text"]])
    }

    #[tokio::test]
    async fn test_identify_writes_bounded_abstractions() {
        let mock = Arc::new(MockBackend::fixed(ABSTRACTIONS));
        let node = NodeStep(IdentifyAbstractions::new(mock_stage(&mock)));
        let mut store = SharedStore::new()
            .with(keys::FILES_CONTENT, files())
            .unwrap()
            .with(keys::MAX_ABSTRACTION_NUM, 2)
            .unwrap();

        node.run(&mut store, &None).await.unwrap();

        let stored: Vec<Abstraction> = store.get_as(keys::ABSTRACTIONS).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[1].name, "Tagout");

        let prompt = &mock.requests()[0].prompt;
        assert!(prompt.starts_with(DEFAULT_REQUEST));
        assert!(prompt.contains("at most 2 core abstractions"));
        assert!(prompt.contains("--- File [1]: audit.txt ---\naudit text"));
    }

    #[tokio::test]
    async fn test_identify_rejects_out_of_range_files_without_retry() {
        let mock = Arc::new(MockBackend::fixed(
            r#"[{"name": "X", "description": "d", "files": [7]}]"#,
        ));
        let stage = mock_stage(&mock).with_retry(RetryPolicy::new(5, Duration::ZERO));
        let node = NodeStep(IdentifyAbstractions::new(stage));
        let mut store = SharedStore::new().with(keys::FILES_CONTENT, files()).unwrap();

        let err = node.run(&mut store, &None).await.unwrap_err();
        match err {
            FlowError::Validation(msg) => {
                assert!(msg.starts_with("identify_abstractions: "), "{}", msg)
            }
            other => panic!("expected Validation, got {:?}", other),
        }
        assert_eq!(mock.calls(), 1);
    }

    fn analysed_store() -> SharedStore {
        let abstractions: Vec<Abstraction> = serde_json::from_str(ABSTRACTIONS).unwrap();
        SharedStore::new()
            .with(keys::FILES_CONTENT, files())
            .unwrap()
            .with(keys::ABSTRACTIONS, abstractions)
            .unwrap()
    }

    #[tokio::test]
    async fn test_relationships_written() {
        let mock = Arc::new(MockBackend::fixed(
            r#"```json
{"summary": "Energy control.", "relationships": [{"from": 0, "to": 1, "label": "precedes"}, {"from": 2, "to": 0, "label": "checks"}]}
```"#,
        ));
        let node = NodeStep(AnalyzeRelationships::new(mock_stage(&mock)));
        let mut store = analysed_store();

        node.run(&mut store, &None).await.unwrap();

        let map: RelationshipMap = store.get_as(keys::RELATIONSHIPS).unwrap();
        assert_eq!(map.summary, "Energy control.");
        assert_eq!(map.related_to(0), vec![1, 2]);
        assert!(mock.requests()[0].prompt.contains("[2] Audit: Checking the process."));
    }

    #[tokio::test]
    async fn test_relationships_prompt_keeps_format_with_large_files() {
        let mock = Arc::new(MockBackend::fixed(r#"{"summary": "s", "relationships": []}"#));
        let node = NodeStep(AnalyzeRelationships::new(mock_stage(&mock)));
        let big = "lorem ipsum ".repeat(3_000);
        let abstractions: Vec<Abstraction> = serde_json::from_str(ABSTRACTIONS).unwrap();
        let mut store = SharedStore::new()
            .with(keys::FILES_CONTENT, json!([["loto.txt", big.clone()], ["audit.txt", big]]))
            .unwrap()
            .with(keys::ABSTRACTIONS, abstractions)
            .unwrap();

        node.run(&mut store, &None).await.unwrap();

        let sent = &mock.requests()[0];
        assert!(sent.char_count() <= crate::gateway::MAX_CHARS);
        assert!(sent.prompt.contains(r#""relationships""#));
        assert!(sent.prompt.contains("--- File [1]: audit.txt ---\nlorem"));
    }

    #[tokio::test]
    async fn test_relationships_require_abstractions() {
        let mock = Arc::new(MockBackend::fixed("{}"));
        let node = NodeStep(AnalyzeRelationships::new(mock_stage(&mock)));
        let mut store = SharedStore::new().with(keys::FILES_CONTENT, files()).unwrap();

        let err = node.run(&mut store, &None).await.unwrap_err();
        assert!(matches!(err, FlowError::MissingKey(ref k) if k == "abstractions"));
        assert_eq!(mock.calls(), 0);
    }

    #[tokio::test]
    async fn test_order_retries_until_permutation_is_valid_json() {
        let mock = Arc::new(MockBackend::new(vec![
            "[0, 1,".into(),
            "[2, 0, 1]".into(),
        ]));
        let stage = mock_stage(&mock).with_retry(RetryPolicy::new(3, Duration::ZERO));
        let node = NodeStep(OrderChapters::new(stage));
        let mut store = analysed_store()
            .with(
                keys::RELATIONSHIPS,
                RelationshipMap {
                    summary: "s".into(),
                    relationships: vec![],
                },
            )
            .unwrap();

        node.run(&mut store, &None).await.unwrap();
        assert_eq!(store.get(keys::CHAPTER_ORDER), Some(&json!([2, 0, 1])));
        assert_eq!(mock.calls(), 2);
    }
}
