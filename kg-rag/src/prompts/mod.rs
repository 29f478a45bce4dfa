//! Prompt templates for LLM interactions.
//!
//! Each submodule builds the message list for one pipeline stage:
//! - [`score_episode`]: relevance of one time window to a query
//! - [`generate_cypher`]: read-only Cypher for a question, given the store schema
//! - [`answer_question`]: final answer from the question and retrieved rows
//!
//! Prompts are stored as Rust string literals (not external files) for
//! compile-time inclusion.

pub mod answer_question;
pub mod generate_cypher;
pub mod score_episode;
