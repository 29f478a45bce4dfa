//! Episode search.
//!
//! - [`timeline`]: places Episodic nodes on a timeline and partitions it into windows
//! - [`ranking`]: threshold filtering and top-K ordering of scored windows
//! - [`scorer`]: the [`EpisodeScorer`] capability and its LLM-backed implementation

pub mod ranking;
pub mod scorer;
pub mod timeline;

use serde::Serialize;

use crate::errors::{LlmError, Result};

pub use ranking::rank;
pub use scorer::{EpisodeScorer, LlmEpisodeScorer};
pub use timeline::{partition, window_count, Timeline};

/// One half-open window `[start, end)` of the timeline, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Episode {
    /// Position of the window on the timeline, starting at 0.
    pub index: usize,
    pub start: f64,
    pub end: f64,
}

impl Episode {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// `"0.0s - 10.0s"`
    pub fn time_range(&self) -> String {
        format!("{:.1}s - {:.1}s", self.start, self.end)
    }

    /// Whether `[start, end)` intersects this window. A zero-length interval
    /// counts when its instant falls inside the window.
    pub fn overlaps(&self, start: f64, end: f64) -> bool {
        if end <= start {
            self.start <= start && start < self.end
        } else {
            start < self.end && end > self.start
        }
    }
}

/// A relevance judgement for one window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Relevance {
    /// Always within `[0.0, 1.0]`.
    pub score: f64,
    pub reason: Option<String>,
}

impl Relevance {
    /// Clamp `score` into `[0.0, 1.0]`; a NaN score is rejected.
    pub fn new(score: f64, reason: Option<String>) -> Result<Self> {
        if score.is_nan() {
            return Err(LlmError::InvalidResponse("relevance score is NaN".to_string()).into());
        }
        Ok(Self {
            score: score.clamp(0.0, 1.0),
            reason,
        })
    }

    /// Score for a window with nothing in it.
    pub fn irrelevant() -> Self {
        Self {
            score: 0.0,
            reason: None,
        }
    }
}

/// A scored window, as returned by episode retrieval.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpisodeHit {
    pub episode: Episode,
    pub score: f64,
    pub reason: Option<String>,
    /// Names of the Episodic nodes that fell in the window.
    pub sources: Vec<String>,
}

impl EpisodeHit {
    pub fn time_range(&self) -> String {
        self.episode.time_range()
    }
}
