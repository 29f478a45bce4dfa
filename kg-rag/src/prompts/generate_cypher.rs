//! Question → read-only Cypher.

use crate::llm_client::Message;

const SYSTEM: &str = "You are an expert in Neo4j knowledge graphs.
Generate a Cypher query that retrieves the facts needed to answer the user's question.

Graph Schema:
{schema}

Follow these rules:
1. Use only the node labels, relationship types, and properties shown in the schema.
2. The query must be read-only: no CREATE, MERGE, SET, DELETE, REMOVE, or CALL of write procedures.
3. Prefer OR conditions over AND when matching several keywords, to keep results broad.
4. Return named columns (e.g. RETURN e.name AS name, e.content AS content).
5. Limit results with LIMIT {top_k}.

Respond with JSON: {\"cypher_query\": \"<query>\", \"explanation\": \"<why this query answers the question>\"}";

pub fn messages(schema: &str, question: &str, top_k: usize) -> Vec<Message> {
    let system = SYSTEM
        .replace("{schema}", schema.trim_end())
        .replace("{top_k}", &top_k.to_string());
    vec![
        Message::system(system),
        Message::user(format!("Question: {question}")),
    ]
}
