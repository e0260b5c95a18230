//! Shared, string-keyed context threaded through one flow run.
//!
//! Stages read their inputs from the [`SharedStore`] in prepare and write
//! their outputs in finalize. Values are stored as `serde_json::Value` so
//! heterogeneous stages can share one store, and are read back with
//! [`SharedStore::get_as`] for typed access.

use crate::error::{FlowError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

/// Well-known keys used by the manual and tutorial pipelines.
pub mod keys {
    /// Uploaded files: `[[filename, text], ...]` in upload order.
    pub const FILES_CONTENT: &str = "files_content";
    /// Free-form instruction from the user.
    pub const PROMPT: &str = "prompt";
    /// Whether LLM responses may be served from the in-memory cache.
    pub const USE_CACHE: &str = "use_cache";
    /// Upper bound on the number of abstractions to identify.
    pub const MAX_ABSTRACTION_NUM: &str = "max_abstraction_num";
    /// Output of `identify_abstractions`.
    pub const ABSTRACTIONS: &str = "abstractions";
    /// Output of `analyze_relationships`.
    pub const RELATIONSHIPS: &str = "relationships";
    /// Output of `order_chapters`.
    pub const CHAPTER_ORDER: &str = "chapter_order";
    /// Output of `write_chapters`.
    pub const CHAPTERS: &str = "chapters";
    /// Rendered HTML manual.
    pub const MANUAL: &str = "manual";
    /// Validated quiz questions.
    pub const QUIZ: &str = "quiz";
}

/// Mutable key/value context owned by exactly one flow run.
///
/// Reading an absent key is the reading stage's contract violation and
/// surfaces as [`FlowError::MissingKey`].
///
/// # Example
///
/// ```
/// use manual_flow::SharedStore;
///
/// let mut store = SharedStore::new();
/// store.insert("prompt", "Write a safety manual").unwrap();
/// let prompt: String = store.get_as("prompt").unwrap();
/// assert_eq!(prompt, "Write a safety manual");
/// assert!(store.get_as::<String>("manual").is_err());
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SharedStore {
    data: HashMap<String, Value>,
}

impl SharedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize `value` and store it under `key`, replacing any prior value.
    pub fn insert<T: Serialize>(&mut self, key: impl Into<String>, value: T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.data.insert(key.into(), value);
        Ok(())
    }

    /// Store a raw JSON value under `key`.
    pub fn insert_value(&mut self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
    }

    /// Builder-style insert for seeding an initial store.
    pub fn with<T: Serialize>(mut self, key: impl Into<String>, value: T) -> Result<Self> {
        self.insert(key, value)?;
        Ok(self)
    }

    /// Raw access to a stored value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Typed read. Absent keys fail with `MissingKey`, shape mismatches with
    /// `Validation`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self
            .data
            .get(key)
            .ok_or_else(|| FlowError::MissingKey(key.to_string()))?;
        serde_json::from_value(value.clone()).map_err(|e| {
            FlowError::Validation(format!("shared store key '{}' has unexpected shape: {}", key, e))
        })
    }

    /// Typed read that falls back to `default` when the key is absent.
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T> {
        if self.contains(key) {
            self.get_as(key)
        } else {
            Ok(default)
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    /// Keys currently present, sorted for stable diagnostics.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.data.keys().map(|k| k.as_str()).collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_inner(self) -> HashMap<String, Value> {
        self.data
    }
}
