//! Example: the tutorial pipeline over a scripted backend, with chapters
//! written two at a time.
//!
//! Run with: `RUST_LOG=manual_flow=debug cargo run --example tutorial_pipeline`

use manual_flow::{
    pipelines, Chapter, FileSet, LlmGateway, MockBackend, PipelineConfig, TracingEventHandler,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const CONFIG: &str = r#"
model = "gpt-4o-mini"

[retry]
max_retries = 3
wait_secs = 0

[tutorial]
max_abstraction_num = 3
chapter_concurrency = 2
"#;

fn script() -> Vec<String> {
    vec![
        r#"[{"name": "Energy sources", "description": "Where hazardous energy comes from.", "files": [0]},
            {"name": "Lockout", "description": "Isolating a machine before service.", "files": [0, 1]}]"#
            .into(),
        r#"{"summary": "Lockout keeps machines from starting during service.",
            "relationships": [{"from": 1, "to": 0, "label": "isolates"}]}"#
            .into(),
        "```json\n[0, 1]\n```".into(),
        "<h5>Kinds of energy</h5><p>Electrical, hydraulic, pneumatic.</p>".into(),
        "<h5>Applying a lock</h5><p>One lock per worker.</p>".into(),
        r#"[{"question": "Who applies a lock?", "answers": ["Each worker", "The supervisor"], "correctAnswer": [0]}]"#
            .into(),
    ]
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = PipelineConfig::from_toml_str(CONFIG)?;
    let gateway = LlmGateway::builder()
        .backend(Arc::new(MockBackend::new(script())))
        .max_chars(config.max_chars)
        .event_handler(Arc::new(TracingEventHandler))
        .build()?;

    let flow = pipelines::tutorial_flow(Arc::new(gateway), &config)?
        .with_event_handler(Arc::new(TracingEventHandler));

    let files = FileSet::new()
        .with("energy.txt", "Machines store electrical and hydraulic energy.")
        .with("loto.txt", "Apply your own lock and tag before servicing.");
    let mut store = pipelines::initial_store(&files, "Teach lockout/tagout", false, Some(3))?;

    if let Err(e) = flow.run(&mut store).await {
        eprintln!("{}", e.user_message());
        return Ok(());
    }

    let chapters: Vec<Chapter> = store.get_as("chapters")?;
    for chapter in &chapters {
        println!("Chapter {}: {}", chapter.number, chapter.title);
    }
    let manual: String = store.get_as("manual")?;
    println!("\n{}", manual);
    Ok(())
}
