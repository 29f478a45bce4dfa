//! User-facing operations.
//!
//! 1. [`Importer`]: load a GraphML file into the store, optionally clearing it first
//! 2. [`QaPipeline`]: question → Cypher → graph rows → answer
//! 3. [`EpisodeRetriever`]: time-windowed relevance search over Episodic nodes
//!
//! Every store and LLM round-trip goes through [`crate::utils::with_timeout`].

pub mod episodes;
pub mod importer;
pub mod qa;

pub use episodes::{EpisodeRetriever, RetrievalRequest};
pub use importer::{ImportReport, ImportRequest, Importer};
pub use qa::{QaAnswer, QaPipeline};
