//! Token Estimator (C4).

use crate::completion::{ChatMessage, MessageContent};

/// Sum UTF-8 character counts across every message's textual content.
/// List-shaped content contributes only its text parts; parts without a
/// `text` field contribute zero. Returns `max(1, total_chars / 4)`.
pub fn estimate_input(messages: &[ChatMessage]) -> u64 {
    let total_chars: usize = messages
        .iter()
        .map(|m| match &m.content {
            MessageContent::Text(s) => s.chars().count(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| p.text.as_ref())
                .map(|t| t.chars().count())
                .sum(),
        })
        .sum();

    std::cmp::max(1, (total_chars / 4) as u64)
}

/// The worst-case output charge: the request's `max_tokens` if present,
/// else the default of 150. This is the charge, not a prediction.
pub fn derive_output(max_tokens: Option<u32>) -> u64 {
    max_tokens.unwrap_or(150) as u64
}
