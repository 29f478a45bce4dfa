//! In-memory graph store.
//!
//! Holds a single [`GraphDocument`] behind an async lock and resolves import
//! and export paths against a local import directory, the same way Neo4j
//! resolves them against its `import/` folder. It cannot execute Cypher.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Component, Path, PathBuf};

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::driver::{
    ExportSummary, GraphDriver, GraphSchema, GraphStats, ImportSummary, LabelProperties,
    NodeSample, RelationshipPattern,
};
use crate::errors::{KgRagError, Result, ServiceError};
use crate::graphml::{self, GraphDocument};
use crate::nodes::{EpisodicNode, EPISODIC_LABEL};

pub struct InMemoryDriver {
    import_root: PathBuf,
    state: RwLock<GraphDocument>,
}

impl InMemoryDriver {
    /// Create an empty store whose imports resolve under `import_root`.
    pub fn new(import_root: impl Into<PathBuf>) -> Self {
        Self {
            import_root: import_root.into(),
            state: RwLock::new(GraphDocument::default()),
        }
    }

    /// A copy of the current graph.
    pub async fn snapshot(&self) -> GraphDocument {
        self.state.read().await.clone()
    }

    /// Map a store-relative file reference onto the import directory.
    ///
    /// Accepts `data.graphml`, `sub/data.graphml` and `file:///data.graphml`;
    /// rejects absolute paths and anything climbing out with `..`.
    fn resolve(&self, file: &str) -> Result<PathBuf> {
        let relative = file
            .strip_prefix("file://")
            .map(|rest| rest.trim_start_matches('/'))
            .unwrap_or(file);
        let path = Path::new(relative);

        let escapes = relative.is_empty()
            || path.is_absolute()
            || path
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(KgRagError::Import(format!(
                "'{file}' is outside the import directory {}",
                self.import_root.display()
            )));
        }
        Ok(self.import_root.join(path))
    }
}

impl GraphDriver for InMemoryDriver {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    async fn clear(&self) -> Result<u64> {
        let mut state = self.state.write().await;
        let deleted = state.nodes.len() as u64;
        *state = GraphDocument::default();
        info!(deleted, "in-memory store cleared");
        Ok(deleted)
    }

    async fn import_graphml(&self, file: &str) -> Result<ImportSummary> {
        let path = self.resolve(file)?;
        let mut incoming = graphml::parse_file(&path).await?;

        let mut state = self.state.write().await;

        // Imports append, like APOC; ids already taken get a fresh suffix.
        let taken: HashSet<String> = state.nodes.iter().map(|n| n.id.clone()).collect();
        let generation = state.nodes.len();
        let mut renamed: HashMap<String, String> = HashMap::new();
        for node in &mut incoming.nodes {
            if taken.contains(&node.id) {
                let fresh = format!("{}#{}", node.id, generation);
                renamed.insert(node.id.clone(), fresh.clone());
                node.id = fresh;
            }
        }
        for edge in &mut incoming.edges {
            if let Some(id) = renamed.get(&edge.source) {
                edge.source = id.clone();
            }
            if let Some(id) = renamed.get(&edge.target) {
                edge.target = id.clone();
            }
        }

        let summary = ImportSummary {
            file: file.to_string(),
            nodes: incoming.nodes.len() as u64,
            relationships: incoming.edges.len() as u64,
            properties: incoming.property_count() as u64,
        };
        state.nodes.extend(incoming.nodes);
        state.edges.extend(incoming.edges);

        info!(file, nodes = summary.nodes, relationships = summary.relationships, "GraphML imported");
        Ok(summary)
    }

    async fn export_graphml(&self, file: &str) -> Result<ExportSummary> {
        let path = self.resolve(file)?;
        let state = self.state.read().await;
        let xml = graphml::to_graphml(&state);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                ServiceError::store(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        tokio::fs::write(&path, xml)
            .await
            .map_err(|e| ServiceError::store(format!("cannot write {}: {e}", path.display())))?;

        debug!(path = %path.display(), "exported GraphML");
        Ok(ExportSummary {
            file: file.to_string(),
            nodes: state.nodes.len() as u64,
            relationships: state.edges.len() as u64,
            properties: state.property_count() as u64,
        })
    }

    async fn schema(&self) -> Result<GraphSchema> {
        let state = self.state.read().await;
        let labels_by_id: HashMap<&str, String> = state
            .nodes
            .iter()
            .map(|n| (n.id.as_str(), n.labels.join(":")))
            .collect();

        let mut by_label: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
        for node in &state.nodes {
            let entry = by_label.entry(node.labels.join(":")).or_default();
            for (name, value) in &node.properties {
                entry.insert(name.clone(), type_name(value).to_string());
            }
        }

        let mut patterns = BTreeSet::new();
        for edge in &state.edges {
            let from = labels_by_id.get(edge.source.as_str()).cloned().unwrap_or_default();
            let to = labels_by_id.get(edge.target.as_str()).cloned().unwrap_or_default();
            patterns.insert(RelationshipPattern {
                from,
                rel_type: edge.rel_type.clone(),
                to,
            });
        }

        Ok(GraphSchema {
            node_properties: by_label
                .into_iter()
                .map(|(label, props)| LabelProperties {
                    label,
                    properties: props.into_iter().collect(),
                })
                .collect(),
            relationships: patterns.into_iter().collect(),
        })
    }

    async fn stats(&self) -> Result<GraphStats> {
        let state = self.state.read().await;
        let mut counts: BTreeMap<String, u64> = BTreeMap::new();
        for node in &state.nodes {
            let labels: String = node.labels.iter().map(|l| format!(":{l}")).collect();
            *counts.entry(labels).or_default() += 1;
        }
        let mut label_counts: Vec<(String, u64)> = counts.into_iter().collect();
        label_counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        Ok(GraphStats {
            label_counts,
            relationship_count: state.edges.len() as u64,
        })
    }

    async fn sample_nodes(&self, limit: usize) -> Result<Vec<NodeSample>> {
        let state = self.state.read().await;
        Ok(state
            .nodes
            .iter()
            .take(limit)
            .map(|n| NodeSample {
                label: n.labels.first().cloned(),
                name: n.properties.get("name").map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                }),
            })
            .collect())
    }

    async fn read_query(&self, _cypher: &str, _limit: usize) -> Result<Vec<Value>> {
        Err(ServiceError::store("the in-memory store cannot execute Cypher").into())
    }

    async fn episodic_nodes(&self) -> Result<Vec<EpisodicNode>> {
        let state = self.state.read().await;
        let mut nodes: Vec<EpisodicNode> = state
            .nodes
            .iter()
            .filter(|n| n.has_label(EPISODIC_LABEL))
            .map(|n| EpisodicNode::from_properties(&n.properties))
            .collect();
        nodes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(nodes)
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Bool(_) => "BOOLEAN",
        Value::Number(n) if n.is_f64() => "FLOAT",
        Value::Number(_) => "INTEGER",
        Value::Array(_) => "LIST",
        _ => "STRING",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRAPH: &str = r#"<graphml>
      <key id="name" for="node" attr.name="name" attr.type="string"/>
      <key id="content" for="node" attr.name="content" attr.type="string"/>
      <graph>
        <node id="a" labels=":Episodic"><data key="name">Episode_1</data><data key="content">later</data></node>
        <node id="b" labels=":Episodic"><data key="name">Episode_0</data><data key="content">first</data></node>
        <node id="c" labels=":Entity"><data key="name">cat</data></node>
        <edge source="a" target="c" label="MENTIONS"/>
      </graph>
    </graphml>"#;

    async fn store_with_graph() -> (tempfile::TempDir, InMemoryDriver) {
        let dir = tempfile::tempdir().expect("create temp import dir");
        std::fs::write(dir.path().join("graph.graphml"), GRAPH).expect("write graph");
        let driver = InMemoryDriver::new(dir.path());
        driver.import_graphml("graph.graphml").await.expect("import");
        (dir, driver)
    }

    #[test]
    fn test_resolve_rejects_escaping_paths() {
        let driver = InMemoryDriver::new("/srv/import");
        assert!(driver.resolve("../etc/passwd").is_err());
        assert!(driver.resolve("/etc/passwd").is_err());
        assert!(driver.resolve("sub/../../x.graphml").is_err());
        assert!(driver.resolve("").is_err());
        assert_eq!(
            driver.resolve("file:///data.graphml").expect("file url"),
            PathBuf::from("/srv/import/data.graphml")
        );
        assert_eq!(
            driver.resolve("sub/data.graphml").expect("nested"),
            PathBuf::from("/srv/import/sub/data.graphml")
        );
    }

    #[tokio::test]
    async fn test_episodic_nodes_sorted_by_name() {
        let (_dir, driver) = store_with_graph().await;
        let nodes = driver.episodic_nodes().await.expect("episodes");
        let names: Vec<_> = nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["Episode_0", "Episode_1"]);
        assert_eq!(nodes[0].content, "first");
    }

    #[tokio::test]
    async fn test_second_import_appends_with_fresh_ids() {
        let (_dir, driver) = store_with_graph().await;
        driver.import_graphml("graph.graphml").await.expect("second import");

        let doc = driver.snapshot().await;
        assert_eq!(doc.nodes.len(), 6);
        assert_eq!(doc.edges.len(), 2);
        let ids: HashSet<_> = doc.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids.len(), 6);
        // the renamed edge still points at nodes that exist
        assert!(ids.contains(doc.edges[1].source.as_str()));
        assert!(ids.contains(doc.edges[1].target.as_str()));
    }

    #[tokio::test]
    async fn test_schema_and_stats() {
        let (_dir, driver) = store_with_graph().await;

        let schema = driver.schema().await.expect("schema");
        assert_eq!(schema.relationships.len(), 1);
        assert_eq!(schema.relationships[0].from, "Episodic");
        assert_eq!(schema.relationships[0].to, "Entity");
        assert!(schema.to_string().contains("Episodic {content: STRING, name: STRING}"));

        let stats = driver.stats().await.expect("stats");
        assert_eq!(stats.label_counts[0], (":Episodic".to_string(), 2));
        assert_eq!(stats.node_count(), 3);
        assert_eq!(stats.relationship_count, 1);
    }

    #[tokio::test]
    async fn test_export_writes_readable_graphml() {
        let (dir, driver) = store_with_graph().await;
        let summary = driver.export_graphml("out/export.graphml").await.expect("export");
        assert_eq!(summary.nodes, 3);

        let exported = graphml::parse_file(&dir.path().join("out/export.graphml"))
            .await
            .expect("exported file parses");
        assert_eq!(exported.nodes.len(), 3);
        assert_eq!(exported.edges[0].rel_type, "MENTIONS");
    }

    #[tokio::test]
    async fn test_sample_nodes_first_label_and_name() {
        let (_dir, driver) = store_with_graph().await;
        let sample = driver.sample_nodes(2).await.expect("sample");
        assert_eq!(
            sample,
            vec![
                NodeSample {
                    label: Some("Episodic".to_string()),
                    name: Some("Episode_1".to_string()),
                },
                NodeSample {
                    label: Some("Episodic".to_string()),
                    name: Some("Episode_0".to_string()),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_read_query_is_unsupported() {
        let driver = InMemoryDriver::new("/tmp");
        let err = driver.read_query("MATCH (n) RETURN n", 10).await.expect_err("no cypher");
        assert!(matches!(err, KgRagError::Service(_)));
    }
}
