//! # kg-rag
//!
//! Imports GraphML knowledge graphs into Neo4j and answers natural-language
//! queries over them with an LLM.
//!
//! ## Pipelines
//!
//! - **Import**: APOC bulk import of a GraphML file, optionally clearing the store first
//! - **QA**: question → generated Cypher → graph rows → LLM answer
//! - **Episode retrieval**: fixed-duration windows over Episodic nodes, scored by
//!   an LLM, filtered by threshold and capped to the top K

pub mod config;
pub mod errors;
pub mod graphml;
pub mod nodes;

pub mod driver;
pub mod llm_client;

pub mod prompts;
pub mod search;

pub mod pipeline;
pub mod utils;

pub use errors::{KgRagError, Result};
pub use pipeline::{EpisodeRetriever, ImportRequest, Importer, QaPipeline, RetrievalRequest};
