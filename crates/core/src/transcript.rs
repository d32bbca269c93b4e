//! Display-only tool transcripts embedded in persisted message content.
//!
//! A transcript block renders the tool invocations of a round so a UI can
//! replay them. It is meant for people only and gets stripped before the
//! history is sent back to the model:
//!
//! ```text
//! Let me check the catalog.
//! <tool_transcript>
//! {"name":"search_equipment","input":{"query":"HNVN10"},"result":"[...]"}
//! </tool_transcript>
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

const OPEN: &str = "\n<tool_transcript>\n";
const CLOSE: &str = "\n</tool_transcript>\n";

/// One rendered tool invocation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    /// Name of the tool.
    pub name: String,
    /// Input of the invocation.
    pub input: Value,
    /// Output of the invocation, if it finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

impl TranscriptEntry {
    fn render(&self) -> String {
        let mut value = json!({
            "name": self.name,
            "input": self.input,
        });
        if let Some(result) = &self.result {
            value["result"] = Value::String(result.clone());
        }
        // JSON escapes newlines, so every entry takes exactly one line.
        value.to_string()
    }
}

/// Appends a transcript block rendering `entries` to `text`.
///
/// Nothing is appended for an empty list.
pub fn embed(text: &str, entries: &[TranscriptEntry]) -> String {
    if entries.is_empty() {
        return text.to_owned();
    }
    let mut out = String::with_capacity(text.len() + 64 * entries.len());
    out.push_str(text);
    out.push_str(OPEN);
    let rendered: Vec<String> = entries.iter().map(|e| e.render()).collect();
    out.push_str(&rendered.join("\n"));
    out.push_str(CLOSE);
    out
}

/// Iterates over `(start, body_start, body_end, end)` of every block.
fn blocks(content: &str) -> impl Iterator<Item = (usize, usize, usize, usize)> {
    let mut from = 0;
    std::iter::from_fn(move || {
        let start = from + content[from..].find(OPEN)?;
        let body_start = start + OPEN.len();
        let (body_end, end) = match content[body_start..].find(CLOSE) {
            Some(pos) => (body_start + pos, body_start + pos + CLOSE.len()),
            // An unterminated block runs to the end of the content.
            None => (content.len(), content.len()),
        };
        from = end;
        Some((start, body_start, body_end, end))
    })
}

/// Removes every transcript block from `content`.
///
/// `strip(&embed(text, entries)) == text` holds for any text that doesn't
/// contain a transcript block itself.
pub fn strip(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut last = 0;
    for (start, _, _, end) in blocks(content) {
        out.push_str(&content[last..start]);
        last = end;
    }
    out.push_str(&content[last..]);
    out
}

/// Returns `true` if `content` carries a transcript block.
#[inline]
pub fn contains_transcript(content: &str) -> bool {
    content.contains(OPEN)
}

/// Recovers the entries of every transcript block in `content`.
///
/// Lines that don't decode are skipped.
pub fn parse(content: &str) -> Vec<TranscriptEntry> {
    let mut entries = Vec::new();
    for (_, body_start, body_end, _) in blocks(content) {
        for line in content[body_start..body_end].lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(entry) => entries.push(entry),
                Err(err) => debug!("skipping transcript line: {err}"),
            }
        }
    }
    entries
}
