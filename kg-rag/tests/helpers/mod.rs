#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use tempfile::TempDir;

use kg_rag::driver::memory::InMemoryDriver;
use kg_rag::driver::{
    ExportSummary, GraphDriver, GraphSchema, GraphStats, ImportSummary, NodeSample,
};
use kg_rag::errors::{LlmError, Result, ServiceError};
use kg_rag::llm_client::{LlmClient, Message};
use kg_rag::nodes::EpisodicNode;
use kg_rag::search::{Episode, EpisodeScorer, Relevance};

/// Temporary store import directory.
pub struct TempImportDir {
    pub dir: TempDir,
    pub path: PathBuf,
}

impl TempImportDir {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp import dir");
        let path = dir.path().to_path_buf();
        Self { dir, path }
    }

    /// Write a file relative to the import root and return its full path.
    pub fn write(&self, rel: &str, content: &str) -> PathBuf {
        let full = self.path.join(rel);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).expect("create parent dirs");
        }
        std::fs::write(&full, content).expect("write test file");
        full
    }

    /// An empty in-memory store importing from this directory.
    pub fn driver(&self) -> Arc<InMemoryDriver> {
        Arc::new(InMemoryDriver::new(self.path.clone()))
    }
}

const HEADER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<graphml xmlns="http://graphml.graphdrawing.org/xmlns">
  <key id="labels" for="node" attr.name="labels"/>
  <key id="name" for="node" attr.name="name" attr.type="string"/>
  <key id="content" for="node" attr.name="content" attr.type="string"/>
  <key id="start" for="node" attr.name="start_time" attr.type="double"/>
  <key id="end" for="node" attr.name="end_time" attr.type="double"/>
  <key id="label" for="edge" attr.name="label"/>
  <graph id="G" edgedefault="directed">
"#;

const FOOTER: &str = "  </graph>\n</graphml>\n";

/// GraphML with one Episodic node per `(name, content)` plus a shared topic
/// node every episode mentions.
pub fn named_episodes(episodes: &[(&str, &str)]) -> String {
    let timed: Vec<_> = episodes
        .iter()
        .map(|(name, content)| (*name, *content, None))
        .collect();
    build(&timed)
}

/// Like [`named_episodes`], with explicit `start_time`/`end_time` properties.
pub fn timed_episodes(episodes: &[(&str, &str, f64, f64)]) -> String {
    let timed: Vec<_> = episodes
        .iter()
        .map(|(name, content, start, end)| (*name, *content, Some((*start, *end))))
        .collect();
    build(&timed)
}

fn build(episodes: &[(&str, &str, Option<(f64, f64)>)]) -> String {
    let mut xml = String::from(HEADER);
    xml.push_str(
        "    <node id=\"topic\" labels=\":Entity\">\n\
         \x20     <data key=\"labels\">:Entity</data>\n\
         \x20     <data key=\"name\">topic</data>\n\
         \x20   </node>\n",
    );
    for (i, (name, content, span)) in episodes.iter().enumerate() {
        xml.push_str(&format!("    <node id=\"ep{i}\" labels=\":Episodic\">\n"));
        xml.push_str("      <data key=\"labels\">:Episodic</data>\n");
        xml.push_str(&format!("      <data key=\"name\">{name}</data>\n"));
        xml.push_str(&format!("      <data key=\"content\">{content}</data>\n"));
        if let Some((start, end)) = span {
            xml.push_str(&format!("      <data key=\"start\">{start}</data>\n"));
            xml.push_str(&format!("      <data key=\"end\">{end}</data>\n"));
        }
        xml.push_str("    </node>\n");
        xml.push_str(&format!(
            "    <edge source=\"ep{i}\" target=\"topic\" label=\"MENTIONS\"/>\n"
        ));
    }
    xml.push_str(FOOTER);
    xml
}

/// LLM double that replays canned replies in order and records every prompt.
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<String>>,
    pub prompts: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlm {
    pub fn new(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    fn next(&self, messages: &[Message]) -> Result<String> {
        self.prompts.lock().unwrap().push(messages.to_vec());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LlmError::Unavailable("script exhausted".to_string()).into())
    }
}

impl LlmClient for &ScriptedLlm {
    async fn generate(&self, messages: &[Message]) -> Result<String> {
        self.next(messages)
    }

    async fn generate_structured<T>(&self, messages: &[Message]) -> Result<T>
    where
        T: DeserializeOwned + JsonSchema,
    {
        let raw = self.next(messages)?;
        serde_json::from_str(&raw).map_err(|e| LlmError::InvalidResponse(e.to_string()).into())
    }
}

/// Scorer backed by a plain function of `(query, window, content)`.
pub struct FnScorer<F> {
    f: F,
    calls: AtomicUsize,
}

impl<F> FnScorer<F>
where
    F: Fn(&str, &Episode, &str) -> Result<Relevance> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl<F> EpisodeScorer for FnScorer<F>
where
    F: Fn(&str, &Episode, &str) -> Result<Relevance> + Send + Sync,
{
    async fn score(&self, query: &str, episode: &Episode, content: &str) -> Result<Relevance> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.f)(query, episode, content)
    }
}

pub fn relevance(score: f64) -> Result<Relevance> {
    Relevance::new(score, Some(format!("scored {score}")))
}

/// In-memory store that also answers Cypher with canned rows.
pub struct RowsDriver {
    pub inner: Arc<InMemoryDriver>,
    rows: Vec<serde_json::Value>,
    pub queries: Mutex<Vec<(String, usize)>>,
}

impl RowsDriver {
    pub fn new(inner: Arc<InMemoryDriver>, rows: Vec<serde_json::Value>) -> Self {
        Self {
            inner,
            rows,
            queries: Mutex::new(Vec::new()),
        }
    }
}

impl GraphDriver for RowsDriver {
    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }

    async fn clear(&self) -> Result<u64> {
        self.inner.clear().await
    }

    async fn import_graphml(&self, file: &str) -> Result<ImportSummary> {
        self.inner.import_graphml(file).await
    }

    async fn export_graphml(&self, file: &str) -> Result<ExportSummary> {
        self.inner.export_graphml(file).await
    }

    async fn schema(&self) -> Result<GraphSchema> {
        self.inner.schema().await
    }

    async fn stats(&self) -> Result<GraphStats> {
        self.inner.stats().await
    }

    async fn sample_nodes(&self, limit: usize) -> Result<Vec<NodeSample>> {
        self.inner.sample_nodes(limit).await
    }

    async fn read_query(&self, cypher: &str, limit: usize) -> Result<Vec<serde_json::Value>> {
        self.queries.lock().unwrap().push((cypher.to_string(), limit));
        if cypher.contains("DELETE") {
            return Err(ServiceError::store("write queries are not allowed").into());
        }
        Ok(self.rows.iter().take(limit).cloned().collect())
    }

    async fn episodic_nodes(&self) -> Result<Vec<EpisodicNode>> {
        self.inner.episodic_nodes().await
    }
}
