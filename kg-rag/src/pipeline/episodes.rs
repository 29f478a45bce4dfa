//! Episode retrieval.
//!
//! Episodic nodes are placed on a timeline, the timeline is cut into windows
//! of `episode_duration` seconds, and every window is scored against the query.
//! Windows scoring at least `threshold` are returned, best first, at most
//! `top_k` of them. Any scoring or store failure aborts the whole retrieval.

use std::sync::Arc;

use tracing::{debug, info};
use validator::Validate;

use crate::config::RetrievalOptions;
use crate::driver::{GraphDriver, GraphSchema};
use crate::errors::{KgRagError, Result};
use crate::pipeline::importer::{ImportReport, ImportRequest, Importer};
use crate::search::{partition, rank, window_count, EpisodeHit, EpisodeScorer, Relevance, Timeline};
use crate::utils::{bounded_try_map, with_timeout};

#[derive(Debug, Clone, PartialEq, Validate)]
pub struct RetrievalRequest {
    pub query: String,

    /// Maximum number of windows returned.
    #[validate(range(min = 1))]
    pub top_k: usize,

    /// Minimum relevance score, inclusive.
    #[validate(range(min = 0.0, max = 1.0))]
    pub threshold: f64,

    /// Window length in seconds.
    pub episode_duration: f64,
}

impl RetrievalRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            top_k: 10,
            threshold: 0.0,
            episode_duration: 10.0,
        }
    }

    /// Reject requests that cannot produce a meaningful result.
    pub fn check(&self) -> Result<()> {
        if self.query.trim().is_empty() {
            return Err(KgRagError::Query("query must not be empty".to_string()));
        }
        // NaN slips through range validation.
        if self.threshold.is_nan() {
            return Err(KgRagError::Query("threshold must be a number".to_string()));
        }
        if !(self.episode_duration.is_finite() && self.episode_duration > 0.0) {
            return Err(KgRagError::Query(format!(
                "episode_duration must be a positive number of seconds, got {}",
                self.episode_duration
            )));
        }
        self.validate()
            .map_err(|e| KgRagError::Query(e.to_string()))
    }
}

pub struct EpisodeRetriever<D, S> {
    driver: Arc<D>,
    scorer: S,
    options: RetrievalOptions,
}

impl<D: GraphDriver, S: EpisodeScorer> EpisodeRetriever<D, S> {
    pub fn new(driver: Arc<D>, scorer: S, options: RetrievalOptions) -> Self {
        Self {
            driver,
            scorer,
            options,
        }
    }

    /// Import `import` first when given, then retrieve.
    ///
    /// The request is checked before anything touches the store.
    pub async fn retrieve_with_import(
        &self,
        request: &RetrievalRequest,
        import: Option<&ImportRequest>,
    ) -> Result<Vec<EpisodeHit>> {
        self.prepare(request, import).await?;
        self.retrieve(request).await
    }

    /// Check `request`, then run `import` when given.
    pub async fn prepare(
        &self,
        request: &RetrievalRequest,
        import: Option<&ImportRequest>,
    ) -> Result<Option<ImportReport>> {
        request.check()?;
        let Some(import) = import else {
            return Ok(None);
        };
        let importer = Importer::new(Arc::clone(&self.driver), self.options.call_timeout);
        let report = importer.import(import).await?;
        info!(
            file = %report.summary.file,
            nodes = report.summary.nodes,
            relationships = report.summary.relationships,
            "Graph imported"
        );
        Ok(Some(report))
    }

    /// Store schema, under the per-call timeout.
    pub async fn schema(&self) -> Result<GraphSchema> {
        with_timeout("fetch schema", self.options.call_timeout, self.driver.schema()).await
    }

    pub async fn retrieve(&self, request: &RetrievalRequest) -> Result<Vec<EpisodeHit>> {
        request.check()?;
        let query = request.query.trim();
        let duration = request.episode_duration;
        let call_timeout = self.options.call_timeout;

        let nodes = with_timeout(
            "fetch Episodic nodes",
            call_timeout,
            self.driver.episodic_nodes(),
        )
        .await?;
        let timeline = Timeline::place(&nodes, duration)?;
        let span = timeline.span();

        let count = window_count(span, duration)?;
        if count > self.options.max_windows {
            return Err(KgRagError::Query(format!(
                "{count} windows of {duration}s exceed the limit of {}; use a longer episode_duration",
                self.options.max_windows
            )));
        }
        let windows = partition(span, duration)?;
        if !timeline.unplaced().is_empty() {
            debug!(names = ?timeline.unplaced(), "Episodic nodes left off the timeline");
        }
        info!(
            nodes = nodes.len(),
            placed = timeline.placed().len(),
            unplaced = timeline.unplaced().len(),
            span,
            windows = windows.len(),
            "Timeline partitioned"
        );

        let timeline = &timeline;
        let scorer = &self.scorer;
        let hits = bounded_try_map(windows, self.options.max_concurrency, |episode| async move {
            let sources: Vec<String> = timeline
                .nodes_in(&episode)
                .map(|n| n.name.clone())
                .collect();
            let relevance = match timeline.window_content(&episode) {
                Some(content) => {
                    with_timeout(
                        "window scoring",
                        call_timeout,
                        scorer.score(query, &episode, &content),
                    )
                    .await?
                }
                None => Relevance::irrelevant(),
            };
            debug!(window = episode.index, score = relevance.score, "Window done");

            Ok::<_, KgRagError>(EpisodeHit {
                episode,
                score: relevance.score,
                reason: relevance.reason,
                sources,
            })
        })
        .await?;

        let ranked = rank(hits, request.threshold, request.top_k);
        info!(results = ranked.len(), "Episodes ranked");
        Ok(ranked)
    }
}
