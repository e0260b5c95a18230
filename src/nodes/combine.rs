//! Assembles written chapters into a single manual fragment.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{Chapter, RelationshipMap};
use crate::node::{Action, Node};
use crate::store::{keys, SharedStore};

/// Escape text for use inside HTML element content or attribute values.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Render the tutorial: title, summary, table of contents, then one
/// `<section>` per chapter. Chapter bodies are inserted as written.
pub fn render_tutorial(title: &str, summary: &str, chapters: &[Chapter]) -> String {
    let mut html = format!("<h3 class=\"tutorial-title\">{}</h3>\n", escape_html(title));
    if !summary.trim().is_empty() {
        html.push_str(&format!(
            "<p class=\"tutorial-summary\">{}</p>\n",
            escape_html(summary.trim())
        ));
    }

    html.push_str("<nav class=\"toc\">\n<h4 class=\"toc-title\">Contents</h4>\n<ul>\n");
    for chapter in chapters {
        html.push_str(&format!(
            "<li><a href=\"#chapter-{n}\">{n}. {t}</a></li>\n",
            n = chapter.number,
            t = escape_html(&chapter.title)
        ));
    }
    html.push_str("</ul>\n</nav>\n");

    for chapter in chapters {
        html.push_str(&format!(
            "<section class=\"chapter\" id=\"chapter-{n}\">\n<h4 class=\"chapter-title\">{n}. {t}</h4>\n{body}\n</section>\n",
            n = chapter.number,
            t = escape_html(&chapter.title),
            body = chapter.body.trim()
        ));
    }
    html
}

/// Prepared input for [`CombineTutorial`].
#[derive(Debug, Clone)]
pub struct CombineInput {
    pub summary: String,
    pub chapters: Vec<Chapter>,
}

/// Writes `manual` from `chapters` and the relationship summary. Makes no
/// LLM call.
#[derive(Debug, Clone)]
pub struct CombineTutorial {
    title: String,
}

impl CombineTutorial {
    pub fn new() -> Self {
        Self {
            title: "Training Tutorial".to_string(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }
}

impl Default for CombineTutorial {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Node for CombineTutorial {
    type Prep = CombineInput;
    type Exec = String;

    fn name(&self) -> &str {
        "combine_tutorial"
    }

    async fn prep(&self, store: &SharedStore) -> Result<CombineInput> {
        let relationships: RelationshipMap = store.get_as(keys::RELATIONSHIPS)?;
        let mut chapters: Vec<Chapter> = store.get_as(keys::CHAPTERS)?;
        chapters.sort_by_key(|c| c.number);
        Ok(CombineInput {
            summary: relationships.summary,
            chapters,
        })
    }

    async fn exec(&self, input: &CombineInput, _attempt: u32) -> Result<String> {
        Ok(render_tutorial(&self.title, &input.summary, &input.chapters))
    }

    async fn post(
        &self,
        store: &mut SharedStore,
        _prep: CombineInput,
        manual: String,
    ) -> Result<Action> {
        store.insert(keys::MANUAL, manual)?;
        Ok(Action::default())
    }
}
