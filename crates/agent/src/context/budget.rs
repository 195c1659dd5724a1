//! Character budget for the message stack.
//!
//! The stack is trimmed by truncating the content of its oldest entries,
//! never by dropping them. The last two entries are never touched, so the
//! current turn and its immediate context survive any budget.

use mindloop_core::message::{ChatMessage, stack_chars};
use mindloop_core::text::head_chars;
use tracing::debug;

/// Entries at the end of the stack that trimming never touches.
pub const PROTECTED_TAIL: usize = 2;

/// Trim `stack` in place until it fits `budget_chars` or only the protected
/// tail is left untrimmed. Returns the number of characters removed.
pub fn trim_to_budget(stack: &mut [ChatMessage], budget_chars: usize) -> usize {
    let total = stack_chars(stack);
    if total <= budget_chars {
        return 0;
    }

    let mut excess = total - budget_chars;
    let trimmable = stack.len().saturating_sub(PROTECTED_TAIL);
    let mut removed = 0;

    for entry in stack.iter_mut().take(trimmable) {
        if excess == 0 {
            break;
        }
        let len = entry.char_len();
        let cut = excess.min(len);
        entry.content = head_chars(&entry.content, len - cut).to_string();
        excess -= cut;
        removed += cut;
    }

    debug!(removed, remaining_excess = excess, "Trimmed message stack to budget");
    removed
}
