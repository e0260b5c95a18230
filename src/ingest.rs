//! Uploaded-file contents as the pipelines consume them.
//!
//! Extraction itself (PDF parsing, multipart handling) happens outside the
//! crate. What arrives here is already text, or bytes that are decoded
//! leniently.

use serde::{Deserialize, Serialize};

/// Decode uploaded bytes as UTF-8, silently dropping invalid sequences.
///
/// ```
/// use manual_flow::ingest::decode_text;
///
/// assert_eq!(decode_text(b"caf\xc3\xa9 \xff ok"), "café  ok");
/// ```
pub fn decode_text(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        out.push_str(chunk.valid());
    }
    out
}

/// Join extracted PDF pages the way the pipelines expect: blank line between
/// pages.
pub fn join_pages<S: AsRef<str>>(pages: &[S]) -> String {
    pages
        .iter()
        .map(|p| p.as_ref())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Filename to text, in upload order.
///
/// Serialized as `[[filename, text], ...]`, the `files_content` value in the
/// [`SharedStore`](crate::SharedStore). Re-adding a filename replaces its
/// text but keeps its original position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileSet {
    files: Vec<(String, String)>,
}

impl FileSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a text file.
    pub fn push(&mut self, name: impl Into<String>, text: impl Into<String>) {
        let name = name.into();
        let text = text.into();
        match self.files.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = text,
            None => self.files.push((name, text)),
        }
    }

    /// Builder-style [`push`](Self::push).
    pub fn with(mut self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.push(name, text);
        self
    }

    /// Add raw uploaded bytes, decoded with [`decode_text`].
    pub fn push_bytes(&mut self, name: impl Into<String>, bytes: &[u8]) {
        self.push(name, decode_text(bytes));
    }

    /// Add a document given as extracted pages.
    pub fn push_pages<S: AsRef<str>>(&mut self, name: impl Into<String>, pages: &[S]) {
        self.push(name, join_pages(pages));
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.files.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Texts in upload order.
    pub fn texts(&self) -> Vec<&str> {
        self.files.iter().map(|(_, t)| t.as_str()).collect()
    }

    pub fn get(&self, index: usize) -> Option<(&str, &str)> {
        self.files
            .get(index)
            .map(|(n, t)| (n.as_str(), t.as_str()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.files.iter().map(|(n, t)| (n.as_str(), t.as_str()))
    }

    /// Index-labelled listing of the files at `indices` for a prompt, each
    /// text cut to `max_chars_each`.
    pub fn render_context(&self, indices: &[usize], max_chars_each: usize) -> String {
        indices
            .iter()
            .filter_map(|&i| self.get(i).map(|(name, text)| (i, name, text)))
            .map(|(i, name, text)| {
                format!(
                    "--- File [{}]: {} ---\n{}",
                    i,
                    name,
                    crate::gateway::truncate_chars(text, max_chars_each)
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// [`render_context`](Self::render_context) over every file.
    pub fn render_all(&self, max_chars_each: usize) -> String {
        let all: Vec<usize> = (0..self.len()).collect();
        self.render_context(&all, max_chars_each)
    }
}

impl FromIterator<(String, String)> for FileSet {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut set = FileSet::new();
        for (name, text) in iter {
            set.push(name, text);
        }
        set
    }
}
