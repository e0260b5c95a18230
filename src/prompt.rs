//! Prompt text for every stage, plus small helpers for assembling it.

/// System prompt for the manual writer.
pub const MANUAL_SYSTEM: &str = "You're a helpful assistant that writes training manuals. \
Return **only** an HTML fragment\u{2014}**no** DOCTYPE, `<html>`, `<head>`, `<meta>`, or `<body>` tags\u{2014}\
starting directly with an `<h3>` for the chapter title. Include a table of contents and use only \
`<h3>`, `<h4>`, and `<h5>` elements with class attributes suitable for a web app.";

/// System prompt for the quiz writer.
pub const QUIZ_SYSTEM: &str = "Return only a JSON array of quiz questions.";

/// User-prompt preamble for the quiz writer; the manual follows it.
pub const QUIZ_INSTRUCTIONS: &str = "You're an assistant that produces quiz questions in strict JSON. \
Given the following training manual, generate at least 5 questions. Each question object must have:\n  \
\u{2022} question: string\n  \
\u{2022} answers: string[]\n  \
\u{2022} correctAnswer: number[]  // indices of correct answers\n\n";

/// System prompt shared by the JSON-producing tutorial stages.
pub const TUTORIAL_JSON_SYSTEM: &str = "You analyze documents for a training tutorial. \
Return only JSON, with no commentary before or after it.";

/// Template for identifying abstractions. Placeholders: `{request}`,
/// `{max}`, `{files}`.
pub const IDENTIFY_ABSTRACTIONS: &str = "{request}\n\n\
Identify at most {max} core abstractions a beginner must understand in the documents below.\n\
Return a JSON array; each element is an object with:\n  \
\u{2022} name: string\n  \
\u{2022} description: string  // beginner-friendly, two or three sentences\n  \
\u{2022} files: number[]  // indices of the documents that cover it\n\n\
{files}";

/// Template for relating abstractions. Placeholders: `{abstractions}`,
/// `{files}`.
pub const ANALYZE_RELATIONSHIPS: &str = "Given these abstractions:\n{abstractions}\n\n\
Return a JSON object {{\"summary\": string, \"relationships\": [{{\"from\": number, \"to\": number, \"label\": string}}]}} \
where summary explains the whole subject in a few sentences for a beginner, and every \
relationship uses abstraction indices. Every abstraction should take part in at least one relationship.\n\n\
The documents they come from:\n{files}";

/// Template for ordering chapters. Placeholders: `{abstractions}`,
/// `{summary}`, `{relationships}`.
pub const ORDER_CHAPTERS: &str = "Summary:\n{summary}\n\n\
Abstractions:\n{abstractions}\n\n\
Relationships:\n{relationships}\n\n\
Return a JSON array containing every abstraction index exactly once, in the order a \
beginner should learn them: foundational concepts first, then the ones built on them.";

/// System prompt for chapter bodies.
pub const CHAPTER_SYSTEM: &str = "You write one chapter of a training tutorial. \
Return only an HTML fragment with no document wrapper tags and no chapter title. \
Use `<h5>` for subsections and `<p>`, `<ul>`, `<li>`, `<code>` for content.";

/// Template for one chapter body. Placeholders: `{number}`, `{total}`,
/// `{name}`, `{description}`, `{related}`, `{outline}`, `{files}`.
pub const WRITE_CHAPTER: &str = "Write chapter {number} of {total}: \"{name}\".\n\n\
What it covers: {description}\n\n\
Related chapters:\n{related}\n\n\
Tutorial outline:\n{outline}\n\n\
Source material:\n{files}";

/// Replace `{key}` placeholders with values from `vars`.
///
/// Use `{{` to insert a literal `{` and `}}` to insert a literal `}`.
/// Substitution is a single pass: inserted values are never re-scanned, so
/// document text containing braces comes through untouched. Unknown
/// placeholders are left as they are.
///
/// # Example
///
/// ```
/// use manual_flow::prompt::render;
///
/// let result = render("Hello {name}, JSON: {{\"key\": \"val\"}}", &[("name", "Alice")]);
/// assert_eq!(result, r#"Hello Alice, JSON: {"key": "val"}"#);
/// ```
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find(['{', '}']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if tail.starts_with("{{") {
            out.push('{');
            rest = &tail[2..];
            continue;
        }
        if tail.starts_with("}}") {
            out.push('}');
            rest = &tail[2..];
            continue;
        }
        if tail.starts_with('{') {
            if let Some(end) = tail.find('}') {
                let key = &tail[1..end];
                if let Some((_, value)) = vars.iter().find(|(k, _)| *k == key) {
                    out.push_str(value);
                    rest = &tail[end + 1..];
                    continue;
                }
            }
        }
        out.push_str(&tail[..1]);
        rest = &tail[1..];
    }
    out.push_str(rest);
    out
}

/// Create a numbered list from items (1-indexed).
pub fn numbered_list(items: &[String]) -> String {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("{}. {}", i + 1, item))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Create an index-labelled list (0-indexed), matching the indices the
/// model is asked to return.
pub fn indexed_list(items: &[String]) -> String {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("[{}] {}", i, item))
        .collect::<Vec<_>>()
        .join("\n")
}
