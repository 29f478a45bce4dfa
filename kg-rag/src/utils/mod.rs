//! Shared utilities.
//!
//! Includes:
//! - String helpers (JSON extraction from LLM output, whitespace, truncation)
//! - Episode-index extraction from node names
//! - Concurrency helpers (per-call timeouts, order-preserving bounded fan-out)

pub mod concurrency;
pub mod text;

pub use concurrency::{bounded_try_map, with_timeout};
pub use text::{
    extract_episode_index, extract_json_from_response, normalize_whitespace,
    truncate_with_ellipsis,
};
