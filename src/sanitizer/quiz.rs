//! Quiz parsing.

use crate::error::{FlowError, Result};
use crate::model::QuizQuestion;

use super::parse_array;

/// Parse and validate a quiz: a JSON array of
/// `{ "question": string, "answers": string[], "correctAnswer": number[] }`.
///
/// Every question needs at least one answer, and `correctAnswer` must be a
/// non-empty set of distinct indices into `answers`.
///
/// # Examples
///
/// ```
/// use manual_flow::sanitizer::parse_quiz;
///
/// let raw = r#"'[{"question":"Q1?","answers":["A","B"],"correctAnswer":[0]}]'"#;
/// let quiz = parse_quiz(raw).unwrap();
/// assert_eq!(quiz[0].question, "Q1?");
/// assert_eq!(quiz[0].answers, vec!["A", "B"]);
/// assert_eq!(quiz[0].correct_answer, vec![0]);
/// ```
pub fn parse_quiz(raw: &str) -> Result<Vec<QuizQuestion>> {
    let questions: Vec<QuizQuestion> = parse_array(raw, "question")?;
    for (i, q) in questions.iter().enumerate() {
        validate_question(q).map_err(|msg| FlowError::Validation(format!("question {}: {}", i, msg)))?;
    }
    Ok(questions)
}

fn validate_question(q: &QuizQuestion) -> std::result::Result<(), String> {
    if q.question.trim().is_empty() {
        return Err("question text is empty".into());
    }
    if q.answers.is_empty() {
        return Err("no answers".into());
    }
    if q.correct_answer.is_empty() {
        return Err("correctAnswer is empty".into());
    }
    let mut seen = vec![false; q.answers.len()];
    for &idx in &q.correct_answer {
        match seen.get_mut(idx) {
            None => {
                return Err(format!(
                    "correctAnswer index {} out of range for {} answers",
                    idx,
                    q.answers.len()
                ))
            }
            Some(true) => return Err(format!("correctAnswer index {} repeated", idx)),
            Some(slot) => *slot = true,
        }
    }
    Ok(())
}
