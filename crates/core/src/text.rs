//! Character-safe string slicing.
//!
//! Every budget in the memory model is expressed in characters, so these
//! helpers never split a UTF-8 sequence.

/// Keep at most the first `max` characters of `text`.
pub fn head_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Keep at most the last `max` characters of `text`.
pub fn tail_chars(text: &str, max: usize) -> &str {
    let total = text.chars().count();
    if total <= max {
        return text;
    }
    match text.char_indices().nth(total - max) {
        Some((idx, _)) => &text[idx..],
        None => "",
    }
}
