//! Neo4j graph driver implementation.
//!
//! Uses `neo4rs` 0.8 for async, pooled Bolt connections. GraphML import and
//! export go through the APOC procedures, so the server needs APOC installed
//! and file import/export enabled.

use std::collections::BTreeMap;

use neo4rs::{query, ConfigBuilder, Graph, Query, Row};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::{RetryPolicy, StoreConfig};
use crate::driver::{
    ExportSummary, GraphDriver, GraphSchema, GraphStats, ImportSummary, LabelProperties,
    NodeSample, RelationshipPattern,
};
use crate::errors::{KgRagError, Result, ServiceError};
use crate::nodes::EpisodicNode;

/// Nodes deleted per statement while clearing the store.
const CLEAR_BATCH_SIZE: i64 = 10_000;

/// Upper bound on relationship patterns included in the schema.
const SCHEMA_PATTERN_LIMIT: i64 = 200;

/// Neo4j backend for [`GraphDriver`].
pub struct Neo4jDriver {
    graph: Graph,
    import_batch_size: usize,
    retry: RetryPolicy,
    /// Write-held by clear/import, read-held by queries.
    guard: RwLock<()>,
}

impl Neo4jDriver {
    /// Open a connection pool and verify it with a ping.
    pub async fn connect(config: &StoreConfig, retry: RetryPolicy) -> Result<Self> {
        let bolt = ConfigBuilder::default()
            .uri(config.uri.as_str())
            .user(config.user.as_str())
            .password(config.password.as_str())
            .max_connections(config.max_connections)
            .build()
            .map_err(|e| KgRagError::Config(format!("invalid Neo4j settings: {e}")))?;

        let graph = Graph::connect(bolt)
            .await
            .map_err(|e| KgRagError::Service(into_service(e)))?;

        let driver = Self {
            graph,
            import_batch_size: config.import_batch_size,
            retry,
            guard: RwLock::new(()),
        };
        driver.ping().await?;

        info!(uri = %config.uri, user = %config.user, "connected to Neo4j");
        Ok(driver)
    }

    /// Run a read statement to completion, retrying transient failures.
    async fn fetch_rows<F>(&self, operation: &'static str, make_query: F) -> Result<Vec<Row>>
    where
        F: Fn() -> Query,
    {
        let _read = self.guard.read().await;
        debug!(operation, "running read query");

        let graph = &self.graph;
        let make_query = &make_query;
        backoff::future::retry(self.retry.backoff(), move || async move {
            let mut stream = graph.execute(make_query()).await.map_err(classify)?;
            let mut rows = Vec::new();
            while let Some(row) = stream.next().await.map_err(classify)? {
                rows.push(row);
            }
            Ok::<_, backoff::Error<ServiceError>>(rows)
        })
        .await
        .map_err(KgRagError::Service)
    }

    /// Run a write statement once; writes are never retried.
    async fn write_rows(&self, statement: Query) -> std::result::Result<Vec<Row>, neo4rs::Error> {
        let mut stream = self.graph.execute(statement).await?;
        let mut rows = Vec::new();
        while let Some(row) = stream.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }
}

impl GraphDriver for Neo4jDriver {
    async fn ping(&self) -> Result<()> {
        let rows = self.fetch_rows("ping", || query("RETURN 1 AS ok")).await?;
        match rows.first().map(|row| get::<i64>(row, "ok")) {
            Some(Ok(1)) => Ok(()),
            _ => Err(ServiceError::store("unexpected ping response").into()),
        }
    }

    async fn close(&self) -> Result<()> {
        // neo4rs releases pooled connections when the Graph is dropped.
        debug!("closing Neo4j driver");
        Ok(())
    }

    async fn clear(&self) -> Result<u64> {
        let _write = self.guard.write().await;
        let mut total = 0u64;
        loop {
            let statement = query(
                "MATCH (n) WITH n LIMIT $batch DETACH DELETE n RETURN count(*) AS deleted",
            )
            .param("batch", CLEAR_BATCH_SIZE);

            let rows = self
                .write_rows(statement)
                .await
                .map_err(|e| KgRagError::Service(into_service(e)))?;
            let deleted = rows
                .first()
                .map(|row| get::<i64>(row, "deleted"))
                .transpose()?
                .unwrap_or(0);

            if deleted <= 0 {
                break;
            }
            total += deleted as u64;
            debug!(deleted, total, "cleared batch");
        }
        info!(deleted = total, "database cleared");
        Ok(total)
    }

    async fn import_graphml(&self, file: &str) -> Result<ImportSummary> {
        let _write = self.guard.write().await;
        let statement = query(
            "CALL apoc.import.graphml($file, {batchSize: $batchSize, readLabels: true}) \
             YIELD nodes, relationships, properties \
             RETURN nodes, relationships, properties",
        )
        .param("file", file)
        .param("batchSize", self.import_batch_size as i64);

        let rows = self.write_rows(statement).await.map_err(|e| match classify(e) {
            backoff::Error::Transient { err, .. } => KgRagError::Service(err),
            backoff::Error::Permanent(err) => {
                KgRagError::Import(format!("store rejected import of '{file}': {err}"))
            }
        })?;

        let summary = match rows.first() {
            Some(row) => ImportSummary {
                file: file.to_string(),
                nodes: get::<i64>(row, "nodes")?.max(0) as u64,
                relationships: get::<i64>(row, "relationships")?.max(0) as u64,
                properties: get::<i64>(row, "properties")?.max(0) as u64,
            },
            None => ImportSummary {
                file: file.to_string(),
                ..ImportSummary::default()
            },
        };
        info!(
            file,
            nodes = summary.nodes,
            relationships = summary.relationships,
            "GraphML imported"
        );
        Ok(summary)
    }

    async fn export_graphml(&self, file: &str) -> Result<ExportSummary> {
        // Writes a file on the server: run once, excluded from imports.
        let _write = self.guard.write().await;
        let statement = query(
            "CALL apoc.export.graphml.all($file, {useTypes: true, storeNodeIds: true}) \
             YIELD nodes, relationships, properties \
             RETURN nodes, relationships, properties",
        )
        .param("file", file);

        let rows = self
            .write_rows(statement)
            .await
            .map_err(|e| KgRagError::Service(into_service(e)))?;

        let row = rows
            .first()
            .ok_or_else(|| ServiceError::store("export returned no summary"))?;
        Ok(ExportSummary {
            file: file.to_string(),
            nodes: get::<i64>(row, "nodes")?.max(0) as u64,
            relationships: get::<i64>(row, "relationships")?.max(0) as u64,
            properties: get::<i64>(row, "properties")?.max(0) as u64,
        })
    }

    async fn schema(&self) -> Result<GraphSchema> {
        let prop_rows = self
            .fetch_rows("schema.nodes", || {
                query(
                    "CALL db.schema.nodeTypeProperties() \
                     YIELD nodeLabels, propertyName, propertyTypes \
                     RETURN nodeLabels, propertyName, propertyTypes",
                )
            })
            .await?;

        let mut by_label: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
        for row in &prop_rows {
            let labels = get::<Vec<String>>(row, "nodeLabels")?.join(":");
            let entry = by_label.entry(labels).or_default();
            if let Some(name) = get::<Option<String>>(row, "propertyName")? {
                let kinds = get::<Option<Vec<String>>>(row, "propertyTypes")?.unwrap_or_default();
                entry.insert(name, kinds.join("|").to_uppercase());
            }
        }

        let rel_rows = self
            .fetch_rows("schema.relationships", || {
                query(
                    "MATCH (a)-[r]->(b) \
                     WITH DISTINCT labels(a) AS start_labels, type(r) AS rel_type, labels(b) AS end_labels \
                     RETURN start_labels, rel_type, end_labels LIMIT $limit",
                )
                .param("limit", SCHEMA_PATTERN_LIMIT)
            })
            .await?;

        let mut relationships = Vec::with_capacity(rel_rows.len());
        for row in &rel_rows {
            relationships.push(RelationshipPattern {
                from: get::<Vec<String>>(row, "start_labels")?.join(":"),
                rel_type: get::<String>(row, "rel_type")?,
                to: get::<Vec<String>>(row, "end_labels")?.join(":"),
            });
        }
        relationships.sort();

        Ok(GraphSchema {
            node_properties: by_label
                .into_iter()
                .map(|(label, props)| LabelProperties {
                    label,
                    properties: props.into_iter().collect(),
                })
                .collect(),
            relationships,
        })
    }

    async fn stats(&self) -> Result<GraphStats> {
        let label_rows = self
            .fetch_rows("stats.labels", || {
                query("MATCH (n) RETURN labels(n) AS labels, count(*) AS count ORDER BY count DESC")
            })
            .await?;

        let mut label_counts = Vec::with_capacity(label_rows.len());
        for row in &label_rows {
            let labels: String = get::<Vec<String>>(row, "labels")?
                .iter()
                .map(|l| format!(":{l}"))
                .collect();
            label_counts.push((labels, get::<i64>(row, "count")?.max(0) as u64));
        }

        let rel_rows = self
            .fetch_rows("stats.relationships", || {
                query("MATCH ()-[r]->() RETURN count(r) AS count")
            })
            .await?;
        let relationship_count = match rel_rows.first() {
            Some(row) => get::<i64>(row, "count")?.max(0) as u64,
            None => 0,
        };

        Ok(GraphStats {
            label_counts,
            relationship_count,
        })
    }

    async fn sample_nodes(&self, limit: usize) -> Result<Vec<NodeSample>> {
        let rows = self
            .fetch_rows("sample_nodes", || {
                query(
                    "MATCH (n) \
                     RETURN labels(n)[0] AS label, toStringOrNull(n.name) AS name \
                     LIMIT $limit",
                )
                .param("limit", limit as i64)
            })
            .await?;

        rows.iter()
            .map(|row| {
                Ok(NodeSample {
                    label: get::<Option<String>>(row, "label")?,
                    name: get::<Option<String>>(row, "name")?,
                })
            })
            .collect()
    }

    async fn read_query(&self, cypher: &str, limit: usize) -> Result<Vec<serde_json::Value>> {
        // apoc.cypher.run only accepts read-only statements.
        let rows = self
            .fetch_rows("read_query", || {
                query(
                    "CALL apoc.cypher.run($cypher, {}) YIELD value \
                     RETURN apoc.convert.toJson(value) AS json LIMIT $limit",
                )
                .param("cypher", cypher)
                .param("limit", limit as i64)
            })
            .await?;

        rows.iter()
            .map(|row| {
                let json = get::<String>(row, "json")?;
                serde_json::from_str(&json).map_err(KgRagError::Serialization)
            })
            .collect()
    }

    async fn episodic_nodes(&self) -> Result<Vec<EpisodicNode>> {
        let rows = self
            .fetch_rows("episodic_nodes", || {
                query(
                    "MATCH (e:Episodic) \
                     RETURN coalesce(toStringOrNull(e.name), '') AS name, \
                            coalesce(toStringOrNull(e.content), '') AS content, \
                            toStringOrNull(e.source) AS source, \
                            toFloatOrNull(e.start_time) AS start_time, \
                            toFloatOrNull(e.end_time) AS end_time \
                     ORDER BY name",
                )
            })
            .await?;

        let nodes = rows
            .iter()
            .map(|row| {
                Ok(EpisodicNode {
                    name: get::<String>(row, "name")?,
                    content: get::<String>(row, "content")?,
                    source: get::<Option<String>>(row, "source")?,
                    start_time: get::<Option<f64>>(row, "start_time")?,
                    end_time: get::<Option<f64>>(row, "end_time")?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(count = nodes.len(), "fetched Episodic nodes");
        Ok(nodes)
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Read a typed column, reporting a shape mismatch as a store error.
fn get<T>(row: &Row, column: &str) -> Result<T>
where
    T: serde::de::DeserializeOwned,
{
    row.get::<T>(column).map_err(|e| {
        KgRagError::Service(ServiceError::store(format!(
            "unexpected value in column '{column}': {e}"
        )))
    })
}

/// Split neo4rs errors into transient (connection-level) and permanent ones.
fn classify(err: neo4rs::Error) -> backoff::Error<ServiceError> {
    match err {
        neo4rs::Error::IOError { .. } | neo4rs::Error::ConnectionError => {
            warn!(error = %err, "transient Neo4j error: retrying");
            backoff::Error::transient(ServiceError::Store {
                message: err.to_string(),
                transient: true,
            })
        }
        other => backoff::Error::permanent(ServiceError::store(other.to_string())),
    }
}

fn into_service(err: neo4rs::Error) -> ServiceError {
    match classify(err) {
        backoff::Error::Transient { err, .. } | backoff::Error::Permanent(err) => err,
    }
}
