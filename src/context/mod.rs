//! Prompt context assembly
//!
//! Combines:
//! - Session history (windowed to the history budget)
//! - Document chunks retrieved across the conversation's module set
//! - The bot system prompt and the new user turn

mod builder;
pub mod history;
pub mod retrieval;

pub use builder::{BuiltContext, ContextBuilder, ContextRequest, ContextSources};
pub use history::HistoryWindower;
pub use retrieval::{ContextRetriever, RetrievalQuery};
