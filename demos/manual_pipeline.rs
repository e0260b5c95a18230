//! Example: the manual pipeline (summarize, then quiz) over a scripted backend.
//!
//! Run with: `RUST_LOG=debug cargo run --example manual_pipeline`

use manual_flow::{
    pipelines, FileSet, LlmGateway, MockBackend, PipelineConfig, QuizQuestion,
    TracingEventHandler,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const MANUAL: &str = "<h3 class=\"manual-title\">Personal Protective Equipment</h3>\
<h4 class=\"toc\">Contents</h4><h5 class=\"section\">Gloves</h5>";

const QUIZ: &str = r#"```json
[{"question": "When are gloves required?", "answers": ["Always on the floor", "Never"], "correctAnswer": [0]}]
```"#;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut config = PipelineConfig::default();
    config.retry.wait_secs = 0;

    // Replace with `LlmGateway::from_config(&config)?` to call a live provider.
    let mock = Arc::new(MockBackend::new(vec![MANUAL.into(), QUIZ.into()]));
    let gateway = LlmGateway::builder()
        .backend(mock.clone())
        .max_chars(config.max_chars)
        .event_handler(Arc::new(TracingEventHandler))
        .build()?;

    let flow = pipelines::manual_flow(Arc::new(gateway), &config)?
        .with_event_handler(Arc::new(TracingEventHandler));

    let mut files = FileSet::new();
    files.push_bytes("gloves.txt", b"Gloves must be worn on the shop floor.");
    files.push_pages("goggles.pdf", &["Goggles protect eyes.", "Replace scratched lenses."]);

    let mut store = pipelines::initial_store(&files, "Write a PPE training manual", false, None)?;
    match flow.run(&mut store).await {
        Ok(outcome) => println!("Ran: {}", outcome.trail.join(" -> ")),
        Err(e) => {
            eprintln!("{}", e.user_message());
            return Ok(());
        }
    }

    let manual: String = store.get_as("manual")?;
    let quiz: Vec<QuizQuestion> = store.get_as("quiz")?;
    println!("Manual:\n{}\n", manual);
    for q in &quiz {
        println!("Q: {} (correct: {:?})", q.question, q.correct_answer);
    }
    println!("Provider calls: {}", mock.calls());
    Ok(())
}
