//! Domain types produced by the pipelines.
//!
//! Field names follow the JSON wire shapes the models are asked for, so the
//! same types serialize into the [`SharedStore`](crate::SharedStore) and back.

use serde::{Deserialize, Serialize};

/// A core concept identified in the uploaded files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Abstraction {
    pub name: String,
    /// Beginner-oriented explanation.
    pub description: String,
    /// Indices into the uploaded file list.
    pub files: Vec<usize>,
}

/// How one abstraction relates to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    /// Index of the source abstraction.
    pub from: usize,
    /// Index of the target abstraction.
    pub to: usize,
    /// Short description of the relation, e.g. "configures".
    pub label: String,
}

/// Project summary plus the relationships between abstractions.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RelationshipMap {
    pub summary: String,
    pub relationships: Vec<Relationship>,
}

impl RelationshipMap {
    /// Indices of abstractions linked to `index` in either direction.
    pub fn related_to(&self, index: usize) -> Vec<usize> {
        let mut related: Vec<usize> = self
            .relationships
            .iter()
            .filter_map(|r| {
                if r.from == index && r.to != index {
                    Some(r.to)
                } else if r.to == index && r.from != index {
                    Some(r.from)
                } else {
                    None
                }
            })
            .collect();
        related.sort_unstable();
        related.dedup();
        related
    }
}

/// One written tutorial chapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    /// 1-based position in the tutorial.
    pub number: usize,
    /// Abstraction the chapter explains.
    pub abstraction: usize,
    pub title: String,
    /// HTML body fragment.
    pub body: String,
}

/// One quiz question in the wire shape
/// `{ "question": string, "answers": string[], "correctAnswer": number[] }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub question: String,
    pub answers: Vec<String>,
    /// Indices into `answers`; non-empty, each in range.
    #[serde(rename = "correctAnswer")]
    pub correct_answer: Vec<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_quiz_question_wire_name() {
        let q = QuizQuestion {
            question: "Q1?".into(),
            answers: vec!["A".into(), "B".into()],
            correct_answer: vec![0],
        };
        let value = serde_json::to_value(&q).unwrap();
        assert_eq!(
            value,
            json!({"question": "Q1?", "answers": ["A", "B"], "correctAnswer": [0]})
        );
    }

    #[test]
    fn test_related_to_is_symmetric_and_deduplicated() {
        let map = RelationshipMap {
            summary: String::new(),
            relationships: vec![
                Relationship {
                    from: 0,
                    to: 1,
                    label: "uses".into(),
                },
                Relationship {
                    from: 2,
                    to: 0,
                    label: "configures".into(),
                },
                Relationship {
                    from: 1,
                    to: 0,
                    label: "calls".into(),
                },
            ],
        };
        assert_eq!(map.related_to(0), vec![1, 2]);
        assert_eq!(map.related_to(2), vec![0]);
        assert!(map.related_to(3).is_empty());
    }
}
