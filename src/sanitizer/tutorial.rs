//! Parsers for the tutorial stages: abstractions, relationships and
//! chapter order. All indices are checked against the collections they
//! point into.

use serde::Deserialize;

use crate::error::{FlowError, Result};
use crate::model::{Abstraction, RelationshipMap};

use super::{parse_array, parse_json};

/// Parse identified abstractions: a JSON array of
/// `{ "name": string, "description": string, "files": number[] }`.
///
/// File indices must be below `file_count`. At most `max` abstractions are
/// kept; extra entries are dropped in order.
pub fn parse_abstractions(raw: &str, file_count: usize, max: usize) -> Result<Vec<Abstraction>> {
    let mut abstractions: Vec<Abstraction> = parse_array(raw, "abstraction")?;
    if abstractions.is_empty() {
        return Err(FlowError::Validation("no abstractions identified".into()));
    }
    abstractions.truncate(max.max(1));

    for (i, a) in abstractions.iter_mut().enumerate() {
        if a.name.trim().is_empty() {
            return Err(FlowError::Validation(format!("abstraction {} has no name", i)));
        }
        if let Some(bad) = a.files.iter().find(|&&f| f >= file_count) {
            return Err(FlowError::Validation(format!(
                "abstraction {} ('{}') references file {} but only {} file(s) were provided",
                i, a.name, bad, file_count
            )));
        }
        a.name = a.name.trim().to_string();
        a.files.sort_unstable();
        a.files.dedup();
    }
    Ok(abstractions)
}

/// Parse `{ "summary": string, "relationships": [{ "from", "to", "label" }] }`.
///
/// Both ends of every relationship must be below `abstraction_count`.
pub fn parse_relationships(raw: &str, abstraction_count: usize) -> Result<RelationshipMap> {
    let map: RelationshipMap = parse_json(raw)?;
    for (i, r) in map.relationships.iter().enumerate() {
        for end in [r.from, r.to] {
            if end >= abstraction_count {
                return Err(FlowError::Validation(format!(
                    "relationship {} references abstraction {} but only {} exist",
                    i, end, abstraction_count
                )));
            }
        }
    }
    Ok(map)
}

/// Parse a chapter order: a JSON array that is a permutation of
/// `0..abstraction_count`.
///
/// Entries may be bare indices or `{ "index": n }` objects.
///
/// # Examples
///
/// ```
/// use manual_flow::sanitizer::parse_chapter_order;
///
/// assert_eq!(parse_chapter_order("[2, 0, 1]", 3).unwrap(), vec![2, 0, 1]);
/// assert!(parse_chapter_order("[0, 0, 1]", 3).is_err());
/// assert!(parse_chapter_order("[0, 1]", 3).is_err());
/// ```
pub fn parse_chapter_order(raw: &str, abstraction_count: usize) -> Result<Vec<usize>> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Entry {
        Index(usize),
        Object { index: usize },
    }

    let entries: Vec<Entry> = parse_array(raw, "chapter")?;
    let order: Vec<usize> = entries
        .into_iter()
        .map(|e| match e {
            Entry::Index(i) | Entry::Object { index: i } => i,
        })
        .collect();

    let mut seen = vec![false; abstraction_count];
    for &idx in &order {
        match seen.get_mut(idx) {
            None => {
                return Err(FlowError::Validation(format!(
                    "chapter order references abstraction {} but only {} exist",
                    idx, abstraction_count
                )))
            }
            Some(true) => {
                return Err(FlowError::Validation(format!(
                    "abstraction {} appears twice in chapter order",
                    idx
                )))
            }
            Some(slot) => *slot = true,
        }
    }
    if let Some(missing) = seen.iter().position(|s| !s) {
        return Err(FlowError::Validation(format!(
            "chapter order leaves out abstraction {}",
            missing
        )));
    }
    Ok(order)
}
