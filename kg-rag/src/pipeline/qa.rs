//! Graph question answering.
//!
//! The model sees the store schema and writes a Cypher query; the rows it
//! returns become the context for a second call that writes the answer.

use std::sync::Arc;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::driver::GraphDriver;
use crate::errors::{KgRagError, LlmError, Result};
use crate::llm_client::LlmClient;
use crate::prompts::{answer_question, generate_cypher};
use crate::utils::with_timeout;

/// Default cap on rows passed to the answer step.
pub const DEFAULT_TOP_K: usize = 10;

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct CypherPlan {
    /// A single read-only Cypher query.
    cypher_query: String,
    /// Why the query answers the question.
    explanation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QaAnswer {
    pub query: String,
    pub cypher: String,
    pub context: Vec<serde_json::Value>,
    pub answer: String,
}

pub struct QaPipeline<D, L> {
    driver: Arc<D>,
    llm: L,
    call_timeout: Duration,
}

impl<D: GraphDriver, L: LlmClient> QaPipeline<D, L> {
    pub fn new(driver: Arc<D>, llm: L, call_timeout: Duration) -> Self {
        Self {
            driver,
            llm,
            call_timeout,
        }
    }

    pub async fn ask(&self, query: &str, top_k: usize) -> Result<QaAnswer> {
        let query = query.trim();
        if query.is_empty() {
            return Err(KgRagError::Query("query must not be empty".to_string()));
        }
        if top_k == 0 {
            return Err(KgRagError::Query("top_k must be at least 1".to_string()));
        }

        let schema = with_timeout("fetch schema", self.call_timeout, self.driver.schema()).await?;

        let messages = generate_cypher::messages(&schema.to_string(), query, top_k);
        let plan: CypherPlan = with_timeout(
            "Cypher generation",
            self.call_timeout,
            self.llm.generate_structured(&messages),
        )
        .await?;

        let cypher = plan.cypher_query.trim().trim_end_matches(';').trim().to_string();
        if cypher.is_empty() {
            return Err(LlmError::InvalidResponse("model produced an empty Cypher query".to_string()).into());
        }
        info!(%cypher, "Generated Cypher");
        debug!(explanation = %plan.explanation, "Cypher rationale");

        let context = with_timeout(
            "graph query",
            self.call_timeout,
            self.driver.read_query(&cypher, top_k),
        )
        .await?;
        info!(rows = context.len(), "Retrieved graph context");

        let messages = answer_question::messages(query, &context);
        let answer = with_timeout("answer generation", self.call_timeout, self.llm.generate(&messages)).await?;

        Ok(QaAnswer {
            query: query.to_string(),
            cypher,
            context,
            answer: answer.trim().to_string(),
        })
    }
}
