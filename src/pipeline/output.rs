//! The combined text produced by a run.

use std::fmt::Write as _;

/// Written in place of text for items which could not be recognized.
pub const ERROR_MARKER: &str = "[Error]";

/// What we got for one item.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntryContent {
    /// Recognized text.
    Text(String),
    /// Recognition failed.
    Error,
}

/// One item's contribution to the output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputEntry {
    pub label: String,
    pub content: EntryContent,
}

/// Ordered, append-only list of results. Identical labels are kept as
/// separate entries.
#[derive(Debug, Default)]
pub struct OutputArtifact {
    entries: Vec<OutputEntry>,
}

impl OutputArtifact {
    pub fn append(&mut self, label: impl Into<String>, content: EntryContent) {
        self.entries.push(OutputEntry {
            label: label.into(),
            content,
        });
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render the combined text, with a header line before each entry.
    pub fn snapshot(&self) -> String {
        let mut text = String::new();
        for entry in &self.entries {
            let body = match &entry.content {
                EntryContent::Text(body) => body.as_str(),
                EntryContent::Error => ERROR_MARKER,
            };
            write!(text, "\n--- {} ---\n{}\n", entry.label, body)
                .expect("writing to a String cannot fail");
        }
        text
    }
}
