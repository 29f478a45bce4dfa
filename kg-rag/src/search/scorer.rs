//! Window relevance scoring.

use schemars::JsonSchema;
use serde::Deserialize;
use tracing::debug;

use crate::errors::Result;
use crate::llm_client::LlmClient;
use crate::prompts::score_episode;
use crate::search::{Episode, Relevance};

/// Scores how relevant a window's content is to a query.
#[allow(async_fn_in_trait)]
pub trait EpisodeScorer: Send + Sync {
    async fn score(&self, query: &str, episode: &Episode, content: &str) -> Result<Relevance>;
}

impl<S: EpisodeScorer> EpisodeScorer for &S {
    async fn score(&self, query: &str, episode: &Episode, content: &str) -> Result<Relevance> {
        (**self).score(query, episode, content).await
    }
}

/// Structured model output for one window.
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct ScoredEpisode {
    /// Relevance from 0.0 (irrelevant) to 1.0 (directly relevant).
    relevance_score: f64,
    /// One-sentence justification.
    reason: String,
}

/// Asks an [`LlmClient`] for a structured relevance score.
pub struct LlmEpisodeScorer<L> {
    llm: L,
}

impl<L: LlmClient> LlmEpisodeScorer<L> {
    pub fn new(llm: L) -> Self {
        Self { llm }
    }
}

impl<L: LlmClient> EpisodeScorer for LlmEpisodeScorer<L> {
    async fn score(&self, query: &str, episode: &Episode, content: &str) -> Result<Relevance> {
        let messages = score_episode::messages(query, &episode.time_range(), content);
        let scored: ScoredEpisode = self.llm.generate_structured(&messages).await?;
        debug!(
            window = episode.index,
            score = scored.relevance_score,
            "Window scored"
        );

        let reason = Some(scored.reason.trim().to_string()).filter(|r| !r.is_empty());
        Relevance::new(scored.relevance_score, reason)
    }
}
