//! Node types read from the knowledge graph.
//!
//! - [`EpisodicNode`]: time-bound source segments that episode retrieval scores

pub mod episodic;

pub use episodic::{EpisodicNode, EPISODIC_LABEL};
