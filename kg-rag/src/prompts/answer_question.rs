//! Answer synthesis from retrieved graph rows.

use crate::llm_client::Message;

const SYSTEM: &str = "You are an assistant that forms clear, human-readable answers.
The information part contains rows retrieved from a knowledge graph. That information
is authoritative; never doubt it or correct it with your own knowledge.
Make the answer sound like a response to the question. Do not mention that the answer
is based on the given information.
If the information is empty, say that you don't know the answer.";

/// `context` is the JSON rows returned by the generated Cypher query.
pub fn messages(question: &str, context: &[serde_json::Value]) -> Vec<Message> {
    let information = if context.is_empty() {
        "[]".to_string()
    } else {
        context
            .iter()
            .map(|row| row.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    };

    vec![
        Message::system(SYSTEM),
        Message::user(format!(
            "Information:\n{information}\n\nQuestion: {question}\nHelpful Answer:"
        )),
    ]
}
