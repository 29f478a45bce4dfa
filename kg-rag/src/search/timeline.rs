//! Timeline placement and windowing.
//!
//! An Episodic node is placed at its explicit `[start_time, end_time)` when it
//! carries both, else at `[i × duration, (i + 1) × duration)` where `i` is the
//! episode index in its name. Nodes with neither are left off the timeline.

use tracing::warn;

use crate::errors::{KgRagError, Result};
use crate::nodes::EpisodicNode;
use crate::search::Episode;
use crate::utils::{extract_episode_index, normalize_whitespace};

const NO_CONTENT: &str = "No content available";

/// Number of windows `partition` produces for `span` and `duration`.
pub fn window_count(span: f64, duration: f64) -> Result<usize> {
    check_duration(duration)?;
    if !span.is_finite() || span < 0.0 {
        return Err(KgRagError::Query(format!(
            "timeline span must be a finite, non-negative number of seconds, got {span}"
        )));
    }
    let count = (span / duration).ceil() as usize;
    // Floating-point division can overshoot by one window.
    if count > 0 && (count - 1) as f64 * duration >= span {
        Ok(count - 1)
    } else {
        Ok(count)
    }
}

/// Split `[0, span)` into consecutive windows of `duration` seconds.
///
/// The last window is shorter when `span` is not a multiple of `duration`.
/// `span == 0` yields no windows.
pub fn partition(span: f64, duration: f64) -> Result<Vec<Episode>> {
    let count = window_count(span, duration)?;
    Ok((0..count)
        .map(|index| {
            let end = if index + 1 == count {
                span
            } else {
                ((index + 1) as f64 * duration).min(span)
            };
            Episode {
                index,
                start: index as f64 * duration,
                end,
            }
        })
        .collect())
}

fn check_duration(duration: f64) -> Result<()> {
    if duration.is_finite() && duration > 0.0 {
        Ok(())
    } else {
        Err(KgRagError::Query(format!(
            "episode_duration must be a positive number of seconds, got {duration}"
        )))
    }
}

/// An Episodic node with its resolved interval.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedNode {
    pub name: String,
    pub content: String,
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Clone, Default)]
pub struct Timeline {
    placed: Vec<PlacedNode>,
    unplaced: Vec<String>,
    span: f64,
}

impl Timeline {
    pub fn place(nodes: &[EpisodicNode], duration: f64) -> Result<Self> {
        check_duration(duration)?;

        let mut timeline = Timeline::default();
        for node in nodes {
            let interval = node.explicit_span().or_else(|| {
                extract_episode_index(&node.name).map(|i| {
                    let start = i as f64 * duration;
                    (start, start + duration)
                })
            });

            match interval {
                Some((start, end)) => {
                    timeline.span = timeline.span.max(end);
                    timeline.placed.push(PlacedNode {
                        name: node.name.clone(),
                        content: node.content.clone(),
                        start,
                        end,
                    });
                }
                None => {
                    warn!(name = %node.name, "Episodic node has no time information; skipping");
                    timeline.unplaced.push(node.name.clone());
                }
            }
        }
        Ok(timeline)
    }

    /// Latest end time over placed nodes; `0.0` when nothing was placed.
    pub fn span(&self) -> f64 {
        self.span
    }

    pub fn placed(&self) -> &[PlacedNode] {
        &self.placed
    }

    /// Names of nodes that could not be placed.
    pub fn unplaced(&self) -> &[String] {
        &self.unplaced
    }

    /// Placed nodes overlapping `episode`.
    ///
    /// A zero-length node sitting exactly at the end of the timeline belongs to
    /// the final window, which is otherwise half-open.
    pub fn nodes_in<'a>(&'a self, episode: &'a Episode) -> impl Iterator<Item = &'a PlacedNode> + 'a {
        let span = self.span;
        let is_final = episode.end == span && episode.start < span;
        self.placed.iter().filter(move |n| {
            episode.overlaps(n.start, n.end) || (is_final && n.end <= n.start && n.start == span)
        })
    }

    /// Text handed to the scorer for `episode`, or `None` when the window is empty.
    pub fn window_content(&self, episode: &Episode) -> Option<String> {
        let blocks: Vec<String> = self
            .nodes_in(episode)
            .map(|n| {
                let content = normalize_whitespace(&n.content);
                let content = if content.is_empty() {
                    NO_CONTENT
                } else {
                    content.as_str()
                };
                format!("Episode: {}\nContent: {}", n.name, content)
            })
            .collect();

        (!blocks.is_empty()).then(|| blocks.join("\n\n"))
    }
}
