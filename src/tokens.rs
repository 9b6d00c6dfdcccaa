//! Token counting for prompt budgeting
//!
//! Two estimators:
//! - [`approx_tokens`]: word-count heuristic, cheap enough to run after every admitted turn
//! - [`exact_tokens`]: BPE count with the tokenizer family of the target model

use std::sync::LazyLock;

use tiktoken_rs::CoreBPE;

use crate::turn::Turn;
use crate::{Error, Result};

/// Roughly 100 tokens per 75 words of English text
pub const TOKENS_PER_WORD: f64 = 1.25;

static CL100K: LazyLock<std::result::Result<CoreBPE, String>> =
    LazyLock::new(|| tiktoken_rs::cl100k_base().map_err(|e| e.to_string()));

static O200K: LazyLock<std::result::Result<CoreBPE, String>> =
    LazyLock::new(|| tiktoken_rs::o200k_base().map_err(|e| e.to_string()));

static P50K: LazyLock<std::result::Result<CoreBPE, String>> =
    LazyLock::new(|| tiktoken_rs::p50k_base().map_err(|e| e.to_string()));

/// BPE encoding used for exact counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Encoding {
    /// GPT-3.5/GPT-4 and ada-002 embeddings; fallback for non-OpenAI models
    #[default]
    Cl100kBase,
    /// GPT-4o and o-series models
    O200kBase,
    /// Legacy davinci/codex models
    P50kBase,
}

impl Encoding {
    /// Pick the encoding for a model identifier
    ///
    /// Models outside the OpenAI families (e.g. `mixtral`) are counted with `cl100k_base`.
    #[must_use]
    pub fn for_model(model: &str) -> Self {
        let model = model.rsplit('/').next().unwrap_or(model).to_ascii_lowercase();

        if model.starts_with("gpt-4o")
            || model.starts_with("gpt-4.1")
            || model.starts_with("gpt-5")
            || model.starts_with("o1")
            || model.starts_with("o3")
            || model.starts_with("o4")
        {
            Self::O200kBase
        } else if model.starts_with("text-davinci") || model.starts_with("code-") {
            Self::P50kBase
        } else {
            Self::Cl100kBase
        }
    }

    /// Tiktoken name of the encoding
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Cl100kBase => "cl100k_base",
            Self::O200kBase => "o200k_base",
            Self::P50kBase => "p50k_base",
        }
    }

    fn bpe(self) -> Result<&'static CoreBPE> {
        let loaded = match self {
            Self::Cl100kBase => &*CL100K,
            Self::O200kBase => &*O200K,
            Self::P50kBase => &*P50K,
        };
        loaded
            .as_ref()
            .map_err(|e| Error::Tokenizer(format!("{}: {e}", self.name())))
    }
}

/// Approximate token count of a sequence of turns
///
/// Whitespace-delimited words times [`TOKENS_PER_WORD`]. Only meant for early exits.
#[must_use]
pub fn approx_tokens(turns: &[Turn]) -> f64 {
    turns.iter().map(|t| approx_text_tokens(&t.content)).sum()
}

/// Approximate token count of a single text
///
/// Empty or whitespace-only text has no words and counts 0, not one word.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn approx_text_tokens(text: &str) -> f64 {
    text.split_whitespace().count() as f64 * TOKENS_PER_WORD
}

/// Exact token count of a sequence of turns
///
/// # Errors
///
/// Returns error if the encoding tables cannot be loaded
pub fn exact_tokens(turns: &[Turn], encoding: Encoding) -> Result<usize> {
    let bpe = encoding.bpe()?;
    Ok(turns
        .iter()
        .map(|t| bpe.encode_with_special_tokens(&t.content).len())
        .sum())
}

/// Exact token count of each turn, in order
///
/// # Errors
///
/// Returns error if the encoding tables cannot be loaded
pub fn exact_tokens_per_turn(turns: &[Turn], encoding: Encoding) -> Result<Vec<usize>> {
    let bpe = encoding.bpe()?;
    Ok(turns
        .iter()
        .map(|t| bpe.encode_with_special_tokens(&t.content).len())
        .collect())
}

/// Exact token count of a single text
///
/// # Errors
///
/// Returns error if the encoding tables cannot be loaded
pub fn exact_text_tokens(text: &str, encoding: Encoding) -> Result<usize> {
    Ok(encoding.bpe()?.encode_with_special_tokens(text).len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approx_counts_words() {
        let turns = vec![Turn::user("one two three four"), Turn::assistant("  five  ")];
        assert!((approx_tokens(&turns) - 6.25).abs() < f64::EPSILON);
    }

    #[test]
    fn approx_of_empty_is_zero() {
        assert!(approx_tokens(&[]).abs() < f64::EPSILON);
        assert!(approx_tokens(&[Turn::user("   ")]).abs() < f64::EPSILON);
    }

    #[test]
    fn exact_counts_hello_world() {
        let turns = vec![Turn::user("hello world")];
        assert_eq!(exact_tokens(&turns, Encoding::Cl100kBase).unwrap(), 2);
    }

    #[test]
    fn exact_sums_turns() {
        let turns = vec![Turn::user("hello world"), Turn::assistant("hello world")];
        let per_turn = exact_tokens_per_turn(&turns, Encoding::Cl100kBase).unwrap();
        assert_eq!(per_turn, vec![2, 2]);
        assert_eq!(exact_tokens(&turns, Encoding::Cl100kBase).unwrap(), 4);
    }

    #[test]
    fn encoding_for_model_families() {
        assert_eq!(Encoding::for_model("mixtral"), Encoding::Cl100kBase);
        assert_eq!(Encoding::for_model("gpt-4"), Encoding::Cl100kBase);
        assert_eq!(Encoding::for_model("gpt-4o-mini"), Encoding::O200kBase);
        assert_eq!(Encoding::for_model("openai/o3-mini"), Encoding::O200kBase);
        assert_eq!(Encoding::for_model("text-davinci-003"), Encoding::P50kBase);
    }
}
