//! Lenient extraction of JSON from model replies.
//!
//! Models wrap JSON in prose or code fences; these helpers find the
//! outermost object or array and parse only that.

use serde::de::DeserializeOwned;

/// The outermost `{...}` span of `text`, if any.
pub fn json_object_span(text: &str) -> Option<&str> {
    span(text, '{', '}')
}

/// The outermost `[...]` span of `text`, if any.
pub fn json_array_span(text: &str) -> Option<&str> {
    span(text, '[', ']')
}

fn span(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

/// Parse the outermost JSON object in `text` as `T`.
pub fn parse_object<T: DeserializeOwned>(text: &str) -> Option<T> {
    serde_json::from_str(json_object_span(text)?).ok()
}
