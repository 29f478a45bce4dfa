//! EpisodicNode: one time-bound segment of source material (e.g. a video clip).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Label carried by episode nodes in the store.
pub const EPISODIC_LABEL: &str = "Episodic";

/// An Episodic node as read back from the graph store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodicNode {
    pub name: String,
    pub content: String,
    pub source: Option<String>,
    /// Explicit start offset in seconds, when the node carries one.
    pub start_time: Option<f64>,
    /// Explicit end offset in seconds, when the node carries one.
    pub end_time: Option<f64>,
}

impl EpisodicNode {
    /// Build from a node's property map; missing text properties become empty.
    pub fn from_properties(properties: &BTreeMap<String, Value>) -> Self {
        let text = |key: &str| match properties.get(key) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        };
        let seconds = |key: &str| match properties.get(key) {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
            _ => None,
        };

        Self {
            name: text("name").unwrap_or_default(),
            content: text("content").unwrap_or_default(),
            source: text("source"),
            start_time: seconds("start_time"),
            end_time: seconds("end_time"),
        }
    }

    /// The node's own `[start, end)` interval, if both bounds are present and sane.
    pub fn explicit_span(&self) -> Option<(f64, f64)> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end))
                if start.is_finite() && end.is_finite() && start >= 0.0 && end >= start =>
            {
                Some((start, end))
            }
            _ => None,
        }
    }
}
