//! Threshold filtering and top-K ordering.

use crate::search::EpisodeHit;

/// Keep hits scoring at least `threshold`, highest first, at most `top_k` of them.
///
/// Equal scores keep their timeline order.
pub fn rank(mut hits: Vec<EpisodeHit>, threshold: f64, top_k: usize) -> Vec<EpisodeHit> {
    hits.retain(|hit| hit.score >= threshold);
    hits.sort_by(|a, b| b.score.total_cmp(&a.score));
    hits.truncate(top_k);
    hits
}
