//! Graph database driver abstraction.
//!
//! Defines the [`GraphDriver`] trait every backend implements, plus:
//! - [`neo4j::Neo4jDriver`]: Neo4j over Bolt, with APOC for GraphML import/export
//! - [`memory::InMemoryDriver`]: a process-local store fed from GraphML files

pub mod memory;
pub mod neo4j;

use std::fmt;

use serde::Serialize;

use crate::errors::Result;
use crate::nodes::EpisodicNode;

/// Trait representing a graph database backend.
///
/// Writers (`clear`, `import_graphml`) are serialized against readers by each
/// backend, so a query never observes a half-finished import.
#[allow(async_fn_in_trait)]
pub trait GraphDriver: Send + Sync {
    /// Health check: verify connectivity to the database.
    async fn ping(&self) -> Result<()>;

    /// Close the connection pool / session.
    async fn close(&self) -> Result<()>;

    /// Delete every node and relationship. Returns the number of deleted nodes.
    async fn clear(&self) -> Result<u64>;

    /// Bulk-import a GraphML file, resolved against the store's import directory.
    async fn import_graphml(&self, file: &str) -> Result<ImportSummary>;

    /// Export the whole graph as GraphML into the store's import directory.
    async fn export_graphml(&self, file: &str) -> Result<ExportSummary>;

    /// Node labels with their property types, and relationship patterns.
    async fn schema(&self) -> Result<GraphSchema>;

    /// Node counts per label combination, and the relationship count.
    async fn stats(&self) -> Result<GraphStats>;

    /// Up to `limit` arbitrary nodes, as first label and `name`.
    async fn sample_nodes(&self, limit: usize) -> Result<Vec<NodeSample>>;

    /// Run a read-only Cypher query, returning at most `limit` rows as JSON objects.
    async fn read_query(&self, cypher: &str, limit: usize) -> Result<Vec<serde_json::Value>>;

    /// Every node labelled `Episodic`, ordered by name.
    async fn episodic_nodes(&self) -> Result<Vec<EpisodicNode>>;
}

/// Counts reported by a GraphML import.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportSummary {
    pub file: String,
    pub nodes: u64,
    pub relationships: u64,
    pub properties: u64,
}

/// Counts reported by a GraphML export.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExportSummary {
    pub file: String,
    pub nodes: u64,
    pub relationships: u64,
    pub properties: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphStats {
    /// `(":LabelA:LabelB", count)`, largest first.
    pub label_counts: Vec<(String, u64)>,
    pub relationship_count: u64,
}

impl GraphStats {
    pub fn node_count(&self) -> u64 {
        self.label_counts.iter().map(|(_, count)| count).sum()
    }

    /// Nodes carrying `label`, possibly alongside other labels.
    pub fn count_with_label(&self, label: &str) -> u64 {
        self.label_counts
            .iter()
            .filter(|(labels, _)| labels.split(':').any(|l| l == label))
            .map(|(_, count)| count)
            .sum()
    }
}

/// A node as listed by `inspect` when the graph has no Episodic nodes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeSample {
    pub label: Option<String>,
    pub name: Option<String>,
}

/// Properties observed on one node label.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelProperties {
    pub label: String,
    /// `(property name, type name)`, sorted by name.
    pub properties: Vec<(String, String)>,
}

/// One `(:From)-[:TYPE]->(:To)` pattern present in the graph.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct RelationshipPattern {
    pub from: String,
    pub rel_type: String,
    pub to: String,
}

/// Store schema, rendered into LLM prompts through its [`fmt::Display`] impl.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphSchema {
    pub node_properties: Vec<LabelProperties>,
    pub relationships: Vec<RelationshipPattern>,
}

impl fmt::Display for GraphSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Node properties:")?;
        for label in &self.node_properties {
            let props = label
                .properties
                .iter()
                .map(|(name, kind)| format!("{name}: {kind}"))
                .collect::<Vec<_>>()
                .join(", ");
            writeln!(f, "{} {{{}}}", label.label, props)?;
        }
        writeln!(f, "The relationships:")?;
        for rel in &self.relationships {
            writeln!(f, "(:{})-[:{}]->(:{})", rel.from, rel.rel_type, rel.to)?;
        }
        Ok(())
    }
}
