//! Final prompt composition: system message, history, new user turn

use crate::tokens::{self, Encoding};
use crate::turn::Turn;
use crate::Result;

/// Prefix asking for a short, list-free answer
pub const BREVITY_INSTRUCTION: &str = "Keep it short, don't use lists. Format for text message.";

/// System message carrying the bot prompt and the retrieved context
#[must_use]
pub fn system_message(system_prompt: &str, context: &str) -> String {
    format!("System Message:\n{system_prompt}\n\nContext:\n{context}")
}

/// Content of the new user turn
#[must_use]
pub fn user_message(message: &str, brevity: bool) -> String {
    if brevity {
        format!("{BREVITY_INSTRUCTION} {message}")
    } else {
        message.to_string()
    }
}

/// Compose the message list sent to the provider
///
/// `history` is newest first and is reversed into chronological order. The system
/// message is always first and the new user turn always last.
#[must_use]
pub fn compose(
    system_prompt: &str,
    context: &str,
    history: &[Turn],
    message: &str,
    brevity: bool,
) -> Vec<Turn> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(Turn::system(system_message(system_prompt, context)));
    messages.extend(history.iter().rev().cloned());
    messages.push(Turn::user(user_message(message, brevity)));
    messages
}

/// Trim the oldest history turns until the composed list fits `total_allowed`
///
/// The system message and the final user turn are never dropped. If they alone exceed
/// the budget the list is sent as is. Returns the exact count of the final list.
///
/// # Errors
///
/// Returns error if the tokenizer cannot be loaded
pub fn fit_to_budget(messages: &mut Vec<Turn>, total_allowed: usize, encoding: Encoding) -> Result<usize> {
    let mut counts = tokens::exact_tokens_per_turn(messages, encoding)?;
    let mut total: usize = counts.iter().sum();
    let mut dropped = 0;

    // Index 1 is the oldest history turn while history remains
    while total > total_allowed && messages.len() > 2 {
        messages.remove(1);
        total -= counts.remove(1);
        dropped += 1;
    }

    if dropped > 0 {
        tracing::warn!(dropped, total, total_allowed, "dropped history turns to fit prompt budget");
    }
    if total > total_allowed {
        tracing::warn!(total, total_allowed, "system prompt and message exceed prompt budget");
    }

    Ok(total)
}
