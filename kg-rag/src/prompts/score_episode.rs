//! Window relevance scoring.

use crate::llm_client::Message;

const SYSTEM: &str = "You are an expert in content relevance assessment.
Score how relevant one segment of a video timeline is to the user's query, from 0.0 to 1.0.

Scoring criteria:
- 1.0: Directly relevant
- 0.7-0.9: High relevance
- 0.4-0.6: Moderate relevance
- 0.1-0.3: Low relevance
- 0.0: Irrelevant

Respond with JSON: {\"relevance_score\": <number 0.0-1.0>, \"reason\": \"<one sentence>\"}";

/// Messages asking the model to score `content` against `query`.
///
/// `time_range` is the rendered window bounds, e.g. `"30.0s - 60.0s"`.
pub fn messages(query: &str, time_range: &str, content: &str) -> Vec<Message> {
    vec![
        Message::system(SYSTEM),
        Message::user(format!(
            "Query: {query}\n\nSegment ({time_range}):\n{content}\n\n\
             Please score the relevance of this segment based on its content."
        )),
    ]
}
