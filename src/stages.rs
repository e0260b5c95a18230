//! Single-call stages: the manual writer and the quiz writer.
//!
//! Both are plain async functions over an [`LlmGateway`], usable on their
//! own or from the nodes in [`crate::nodes`].

use crate::error::Result;
use crate::events::Event;
use crate::gateway::{truncate_chars, LlmGateway, LlmSettings};
use crate::model::QuizQuestion;
use crate::prompt::{MANUAL_SYSTEM, QUIZ_INSTRUCTIONS, QUIZ_SYSTEM};
use crate::sanitizer::{parse_quiz, sanitize};

/// Stage name used in quiz errors and events.
pub const GENERATE_QUIZ: &str = "generate_quiz";

/// Write an HTML-fragment manual from the uploaded texts.
///
/// Texts are joined in upload order with a blank line between them and cut
/// to the gateway's character budget. The reply is returned unmodified.
pub async fn summarize_and_structure<S: AsRef<str>>(
    gateway: &LlmGateway,
    texts: &[S],
    prompt: &str,
    settings: &LlmSettings,
) -> Result<String> {
    let combined = texts
        .iter()
        .map(|t| t.as_ref())
        .collect::<Vec<_>>()
        .join("\n\n");
    let combined = truncate_chars(&combined, gateway.max_chars());
    let user = format!("{}\n\n{}", prompt, combined);
    gateway.call(settings, MANUAL_SYSTEM, &user).await
}

/// Derive a validated quiz from a manual.
///
/// The manual is cut to the gateway's character budget. Sanitizer failures
/// are tagged with the stage name; their kind is kept so the caller's retry
/// policy can still tell them apart.
pub async fn generate_quiz_from_manual(
    gateway: &LlmGateway,
    manual: &str,
    settings: &LlmSettings,
) -> Result<Vec<QuizQuestion>> {
    let snippet = truncate_chars(manual, gateway.max_chars());
    let user = format!("{}{}", QUIZ_INSTRUCTIONS, snippet);
    let raw = gateway.call(settings, QUIZ_SYSTEM, &user).await?;
    parse_reported(gateway, GENERATE_QUIZ, &raw, parse_quiz)
}

/// Run `parse` over `raw`, reporting any stripped noise and tagging errors
/// with `stage`.
pub(crate) fn parse_reported<T>(
    gateway: &LlmGateway,
    stage: &str,
    raw: &str,
    parse: impl FnOnce(&str) -> Result<T>,
) -> Result<T> {
    if let Ok(s) = sanitize(raw) {
        if s.stripped_quotes || s.stripped_fence {
            gateway.notify(Event::Sanitized {
                stage: stage.to_string(),
                stripped_quotes: s.stripped_quotes,
                stripped_fence: s.stripped_fence,
            });
        }
    }
    parse(raw).map_err(|e| e.in_stage(stage))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockBackend, MockReply};
    use crate::error::FlowError;
    use crate::events::FnEventHandler;
    use std::sync::{Arc, Mutex};

    const QUIZ: &str = r#"```json
[{"question":"What does PPE stand for?","answers":["Personal protective equipment","Paper"],"correctAnswer":[0]}]
```"#;

    fn gateway(mock: &Arc<MockBackend>, max_chars: usize) -> LlmGateway {
        LlmGateway::builder()
            .backend(mock.clone())
            .max_chars(max_chars)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_summarize_joins_texts_in_order() {
        let mock = Arc::new(MockBackend::fixed("  <h3>Safety</h3>  "));
        let gw = gateway(&mock, 100_000);

        let manual = summarize_and_structure(
            &gw,
            &["first doc", "second doc"],
            "Write a safety manual",
            &LlmSettings::default(),
        )
        .await
        .unwrap();

        assert_eq!(manual, "  <h3>Safety</h3>  ");
        let sent = &mock.requests()[0];
        assert_eq!(sent.system_prompt, MANUAL_SYSTEM);
        assert_eq!(sent.prompt, "Write a safety manual\n\nfirst doc\n\nsecond doc");
        assert_eq!(sent.model, "gpt-4o-mini");
    }

    #[tokio::test]
    async fn test_summarize_cuts_documents_to_budget() {
        let mock = Arc::new(MockBackend::fixed("<h3>x</h3>"));
        let gw = gateway(&mock, MANUAL_SYSTEM.chars().count() + 20);
        let long = "a".repeat(50);

        summarize_and_structure(&gw, &[long.as_str()], "p", &LlmSettings::default())
            .await
            .unwrap();

        let sent = &mock.requests()[0];
        assert_eq!(sent.prompt, format!("p\n\n{}", "a".repeat(17)));
    }

    #[tokio::test]
    async fn test_quiz_is_parsed_and_validated() {
        let mock = Arc::new(MockBackend::fixed(QUIZ));
        let gw = gateway(&mock, 100_000);

        let quiz = generate_quiz_from_manual(&gw, "<h3>PPE</h3>", &LlmSettings::default())
            .await
            .unwrap();
        assert_eq!(quiz.len(), 1);
        assert_eq!(quiz[0].correct_answer, vec![0]);

        let sent = &mock.requests()[0];
        assert_eq!(sent.system_prompt, QUIZ_SYSTEM);
        assert_eq!(sent.prompt, format!("{}<h3>PPE</h3>", QUIZ_INSTRUCTIONS));
    }

    #[tokio::test]
    async fn test_quiz_errors_name_the_stage() {
        let mock = Arc::new(MockBackend::fixed(r#"[{"question":"Q","answers":["A"],"correctAnswer":[3]}]"#));
        let gw = gateway(&mock, 100_000);

        let err = generate_quiz_from_manual(&gw, "m", &LlmSettings::default())
            .await
            .unwrap_err();
        match err {
            FlowError::Validation(msg) => assert!(msg.starts_with("generate_quiz: "), "{}", msg),
            other => panic!("expected Validation, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_quiz_empty_reply_names_the_stage() {
        let mock = Arc::new(MockBackend::fixed("   "));
        let gw = gateway(&mock, 100_000);
        let err = generate_quiz_from_manual(&gw, "m", &LlmSettings::default())
            .await
            .unwrap_err();
        match &err {
            FlowError::EmptyResponse { stage } => {
                assert_eq!(stage.as_deref(), Some(GENERATE_QUIZ))
            }
            other => panic!("expected EmptyResponse, got {:?}", other),
        }
        assert!(err.to_string().contains("generate_quiz"));
    }

    #[tokio::test]
    async fn test_quiz_transport_failure_passes_through() {
        let mock = Arc::new(MockBackend::scripted(vec![MockReply::http(502)]));
        let gw = gateway(&mock, 100_000);
        let err = generate_quiz_from_manual(&gw, "m", &LlmSettings::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::HttpError { status: 502, .. }));
    }

    #[tokio::test]
    async fn test_stripping_is_reported() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let gw = LlmGateway::builder()
            .backend(Arc::new(MockBackend::fixed(QUIZ)))
            .event_handler(Arc::new(FnEventHandler(move |e: Event| {
                if let Event::Sanitized { .. } = e {
                    sink.lock().unwrap().push(e);
                }
            })))
            .build()
            .unwrap();

        generate_quiz_from_manual(&gw, "m", &LlmSettings::default())
            .await
            .unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![Event::Sanitized {
                stage: GENERATE_QUIZ.into(),
                stripped_quotes: false,
                stripped_fence: true
            }]
        );
    }
}
