//! Conversation history windowing under the history token budget

use crate::store::{MessageStore, StoredMessage};
use crate::tokens::{self, Encoding};
use crate::turn::{Role, Turn};
use crate::Result;

/// Fetches recent turns of a session and trims them to the history sub-budget
pub struct HistoryWindower<'a> {
    store: &'a dyn MessageStore,
    budget: usize,
    fetch_limit: usize,
    encoding: Encoding,
}

impl<'a> HistoryWindower<'a> {
    #[must_use]
    pub fn new(
        store: &'a dyn MessageStore,
        budget: usize,
        fetch_limit: usize,
        encoding: Encoding,
    ) -> Self {
        Self {
            store,
            budget,
            fetch_limit,
            encoding,
        }
    }

    /// Windowed history of a session, newest first
    ///
    /// # Errors
    ///
    /// Returns error if the message store fails or the tokenizer cannot be loaded
    pub async fn window(
        &self,
        user_id: &str,
        session_id: &str,
        exclude_history: bool,
    ) -> Result<Vec<Turn>> {
        if exclude_history {
            return Ok(Vec::new());
        }

        let rows = self
            .store
            .recent_messages(user_id, session_id, false, self.fetch_limit)
            .await?;

        let mut turns = collapse_within_estimate(&rows, self.budget);
        let admitted = turns.len();
        let tokens = truncate_to_budget(&mut turns, self.budget, self.encoding)?;

        tracing::debug!(
            session = session_id,
            fetched = rows.len(),
            admitted,
            kept = turns.len(),
            tokens,
            budget = self.budget,
            "history windowed"
        );

        Ok(turns)
    }
}

/// Collapse same-type runs and stop once the approximate count reaches `budget`
///
/// Rows arrive newest first. A row is admitted only if its type differs from the row
/// fetched just before it, so multi-part turns present as one turn (the first of the run).
#[must_use]
pub fn collapse_within_estimate(rows: &[StoredMessage], budget: usize) -> Vec<Turn> {
    let mut turns = Vec::new();
    let mut approx = 0.0;
    #[allow(clippy::cast_precision_loss)]
    let budget = budget as f64;

    for (i, row) in rows.iter().enumerate() {
        if i == 0 || row.message_type != rows[i - 1].message_type {
            approx += tokens::approx_text_tokens(&row.content);
            turns.push(Turn::new(
                Role::from_message_type(&row.message_type),
                row.content.clone(),
            ));
        }

        if approx >= budget {
            break;
        }
    }

    turns
}

/// Drop turns at index 1 until the exact count fits `budget`
///
/// Index 0 is the anchor and is never dropped, so a single oversized turn survives.
/// Returns the exact token count of what remains.
///
/// # Errors
///
/// Returns error if the tokenizer cannot be loaded
pub fn truncate_to_budget(turns: &mut Vec<Turn>, budget: usize, encoding: Encoding) -> Result<usize> {
    let mut counts = tokens::exact_tokens_per_turn(turns, encoding)?;
    let mut total: usize = counts.iter().sum();

    while total > budget && turns.len() > 1 {
        turns.remove(1);
        total -= counts.remove(1);
    }

    Ok(total)
}
