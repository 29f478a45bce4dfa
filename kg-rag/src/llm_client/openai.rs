//! OpenAI LLM client implementation.
//!
//! Uses `async-openai` for API calls, `moka` for response caching, and
//! `backoff` for exponential-backoff retry on rate limits / transient errors.

use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use moka::future::Cache;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::{LlmConfig, RetryPolicy};
use crate::errors::{KgRagError, LlmError, Result};
use crate::utils::extract_json_from_response;

use super::{LlmClient, Message, Role};

/// How long a cached response stays valid.
const CACHE_TTL: Duration = Duration::from_secs(3_600);

/// OpenAI LLM client implementing [`LlmClient`].
pub struct OpenAiClient {
    client: async_openai::Client<OpenAIConfig>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    retry: RetryPolicy,
    /// Keyed by `md5(prefix + model + messages)` → response text. `None` when disabled.
    cache: Option<Cache<String, String>>,
}

impl OpenAiClient {
    /// Create a new client from explicit configuration.
    pub fn new(config: &LlmConfig, retry: RetryPolicy) -> Self {
        let mut openai_config = OpenAIConfig::new().with_api_key(config.api_key.as_str());
        if let Some(base) = &config.api_base {
            openai_config = openai_config.with_api_base(base.as_str());
        }
        // Retries are handled here, so async-openai's own rate-limit loop is switched off.
        let client = async_openai::Client::with_config(openai_config)
            .with_backoff(RetryPolicy::none().backoff());

        let cache = (config.cache_capacity > 0).then(|| {
            Cache::builder()
                .max_capacity(config.cache_capacity)
                .time_to_live(CACHE_TTL)
                .build()
        });

        Self {
            client,
            model: config.model_name.clone(),
            temperature: 0.0,
            max_tokens: 2_048,
            retry,
            cache,
        }
    }

    /// Override the max output token limit (default `2048`).
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    // ── Helpers ───────────────────────────────────────────────────────────────

    /// Compute an MD5 cache key from model + message sequence.
    fn cache_key(&self, prefix: &str, messages: &[Message]) -> String {
        use md5::{Digest, Md5};
        let mut h = Md5::new();
        h.update(prefix.as_bytes());
        h.update(self.model.as_bytes());
        for m in messages {
            h.update(role_str(m.role).as_bytes());
            h.update(m.content.as_bytes());
        }
        format!("{:x}", h.finalize())
    }

    async fn cached(&self, key: &str) -> Option<String> {
        match &self.cache {
            Some(cache) => cache.get(key).await,
            None => None,
        }
    }

    async fn remember(&self, key: String, content: &str) {
        if let Some(cache) = &self.cache {
            cache.insert(key, content.to_string()).await;
        }
    }

    /// Serialise our [`Message`] slice into the JSON array expected by the API.
    fn messages_to_json(messages: &[Message]) -> Vec<serde_json::Value> {
        messages
            .iter()
            .map(|m| {
                json!({
                    "role": role_str(m.role),
                    "content": m.content,
                })
            })
            .collect()
    }

    /// Call the chat completions endpoint with exponential-backoff retry.
    ///
    /// Retries on rate limits, server-side errors and dropped connections.
    async fn call_with_retry(&self, request: serde_json::Value) -> Result<serde_json::Value> {
        let chat = self.client.chat();
        let chat = &chat;
        let request = &request;

        backoff::future::retry(self.retry.backoff(), move || async move {
            let outcome: std::result::Result<serde_json::Value, OpenAIError> =
                chat.create_byot(request.clone()).await;

            match outcome {
                Ok(response) => Ok(response),
                Err(e) => {
                    let llm_err = map_openai_error(e);
                    if llm_err.is_transient() {
                        warn!(error = %llm_err, "transient LLM error: retrying with backoff");
                        Err(backoff::Error::transient(llm_err))
                    } else {
                        Err(backoff::Error::permanent(llm_err))
                    }
                }
            }
        })
        .await
        .map_err(KgRagError::from)
    }

    /// Extract the assistant message text from a chat-completions response.
    fn extract_content(response: &serde_json::Value) -> Result<String> {
        let message = &response["choices"][0]["message"];
        if message["refusal"].is_string() {
            return Err(LlmError::Refusal.into());
        }
        message["content"]
            .as_str()
            .filter(|content| !content.trim().is_empty())
            .map(ToOwned::to_owned)
            .ok_or_else(|| LlmError::EmptyResponse.into())
    }

    fn parse_structured<T: DeserializeOwned>(content: &str) -> Result<T> {
        let json = extract_json_from_response(content).unwrap_or(content);
        serde_json::from_str(json).map_err(|e| {
            LlmError::InvalidResponse(format!("{e} in {}", crate::utils::truncate_with_ellipsis(content, 200)))
                .into()
        })
    }
}

// ── LlmClient implementation ──────────────────────────────────────────────────

impl LlmClient for OpenAiClient {
    async fn generate(&self, messages: &[Message]) -> Result<String> {
        let key = self.cache_key("text", messages);

        if let Some(cached) = self.cached(&key).await {
            debug!("LLM cache hit (text)");
            return Ok(cached);
        }

        let request = json!({
            "model": self.model,
            "messages": Self::messages_to_json(messages),
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });

        let response = self.call_with_retry(request).await?;
        let content = Self::extract_content(&response)?;

        self.remember(key, &content).await;

        Ok(content)
    }

    async fn generate_structured<T>(&self, messages: &[Message]) -> Result<T>
    where
        T: DeserializeOwned + schemars::JsonSchema,
    {
        // Include the target type name in the cache key so different T for the
        // same messages don't collide.
        let prefix = std::any::type_name::<T>();
        let key = self.cache_key(prefix, messages);

        if let Some(cached) = self.cached(&key).await {
            debug!("LLM cache hit (structured/{})", prefix);
            return Self::parse_structured(&cached);
        }

        let schema = schemars::schema_for!(T);
        let schema_value = serde_json::to_value(&schema)?;

        let request = json!({
            "model": self.model,
            "messages": Self::messages_to_json(messages),
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": "response",
                    "schema": schema_value,
                    "strict": true,
                }
            }
        });

        let response = self.call_with_retry(request).await?;
        let content = Self::extract_content(&response)?;
        let parsed = Self::parse_structured(&content)?;

        self.remember(key, &content).await;

        Ok(parsed)
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

/// Map an [`OpenAIError`] to our [`LlmError`] domain type.
fn map_openai_error(err: OpenAIError) -> LlmError {
    match err {
        OpenAIError::ApiError(api_err) => {
            let code = api_err.code.clone().map(|c| c.to_string()).unwrap_or_default();
            let kind = api_err.r#type.clone().unwrap_or_default();
            if code.contains("rate_limit") || kind == "requests" || kind == "tokens" {
                LlmError::RateLimit
            } else if code.contains("invalid_api_key") || kind == "authentication_error" {
                LlmError::Authentication
            } else if kind == "server_error" {
                LlmError::Unavailable(api_err.message)
            } else {
                LlmError::Api {
                    status: 0,
                    message: api_err.message,
                }
            }
        }
        OpenAIError::Reqwest(e) => {
            if e.is_timeout() || e.is_connect() {
                LlmError::Unavailable(e.to_string())
            } else {
                match e.status() {
                    Some(status) if status.as_u16() == 429 => LlmError::RateLimit,
                    Some(status) if status.as_u16() == 401 || status.as_u16() == 403 => {
                        LlmError::Authentication
                    }
                    Some(status) => LlmError::Api {
                        status: status.as_u16(),
                        message: e.to_string(),
                    },
                    None => LlmError::Unavailable(e.to_string()),
                }
            }
        }
        other => LlmError::Api {
            status: 0,
            message: other.to_string(),
        },
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use schemars::JsonSchema;
    use serde::{Deserialize, Serialize};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    // ── helpers ───────────────────────────────────────────────────────────────

    /// Build a client pointing at an arbitrary base URL (mock server).
    fn client_for(base_url: &str, cache_capacity: u64) -> OpenAiClient {
        let config = LlmConfig {
            api_key: "test-key".to_string(),
            api_base: Some(base_url.to_string()),
            model_name: "gpt-4o".to_string(),
            cache_capacity,
        };
        OpenAiClient::new(&config, RetryPolicy::none()).with_max_tokens(512)
    }

    fn chat_completions_response(content: &str) -> serde_json::Value {
        json!({
            "id": "chatcmpl-test",
            "object": "chat.completion",
            "created": 1700000000_u64,
            "model": "gpt-4o",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": content,
                },
                "finish_reason": "stop",
            }],
            "usage": {
                "prompt_tokens": 10,
                "completion_tokens": 20,
                "total_tokens": 30,
            }
        })
    }

    fn user_messages(text: &str) -> Vec<Message> {
        vec![Message::user(text)]
    }

    // ── generate() ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_generate_returns_content() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(chat_completions_response("Hello, world!")),
            )
            .mount(&server)
            .await;

        let client = client_for(&server.uri(), 10);
        let result = client
            .generate(&user_messages("Say hello"))
            .await
            .expect("generate should succeed");

        assert_eq!(result, "Hello, world!");
    }

    #[tokio::test]
    async fn test_generate_uses_cache_on_second_call() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(chat_completions_response("cached response")),
            )
            .expect(1) // must be called exactly once
            .mount(&server)
            .await;

        let client = client_for(&server.uri(), 10);
        let msgs = user_messages("Same question");

        let r1 = client.generate(&msgs).await.expect("first call");
        let r2 = client.generate(&msgs).await.expect("second call");

        assert_eq!(r1, "cached response");
        assert_eq!(r2, "cached response");
        // wiremock verifies the `expect(1)` on drop
    }

    #[tokio::test]
    async fn test_generate_without_cache_calls_every_time() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(chat_completions_response("fresh")),
            )
            .expect(2)
            .mount(&server)
            .await;

        let client = client_for(&server.uri(), 0);
        let msgs = user_messages("Same question");
        client.generate(&msgs).await.expect("first call");
        client.generate(&msgs).await.expect("second call");
    }

    #[tokio::test]
    async fn test_generate_maps_auth_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": {
                    "message": "Incorrect API key",
                    "type": "invalid_request_error",
                    "code": "invalid_api_key"
                }
            })))
            .mount(&server)
            .await;

        let client = client_for(&server.uri(), 10);
        let err = client
            .generate(&user_messages("Hello"))
            .await
            .expect_err("should fail");

        assert!(
            matches!(
                err,
                KgRagError::Service(crate::errors::ServiceError::Llm(LlmError::Authentication))
            ),
            "expected Authentication, got {:?}",
            err
        );
    }

    #[tokio::test]
    async fn test_generate_rejects_blank_content() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_completions_response("  ")))
            .mount(&server)
            .await;

        let client = client_for(&server.uri(), 10);
        let err = client.generate(&user_messages("Hello")).await.expect_err("blank");
        assert!(err.to_string().contains("Empty response"));
    }

    // ── generate_structured() ────────────────────────────────────────────────

    #[derive(Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
    struct Person {
        name: String,
        age: u32,
    }

    #[tokio::test]
    async fn test_generate_structured_deserializes() {
        let server = MockServer::start().await;

        let body = serde_json::to_string(&Person {
            name: "Alice".to_string(),
            age: 30,
        })
        .unwrap();

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(chat_completions_response(&body)),
            )
            .mount(&server)
            .await;

        let client = client_for(&server.uri(), 10);
        let person: Person = client
            .generate_structured(&user_messages("Give me a person"))
            .await
            .expect("structured generation should succeed");

        assert_eq!(person, Person { name: "Alice".to_string(), age: 30 });
    }

    #[tokio::test]
    async fn test_generate_structured_accepts_fenced_json() {
        let server = MockServer::start().await;

        let fenced = "Here you go:\n```json\n{\"name\": \"Bob\", \"age\": 25}\n```";
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_completions_response(fenced)))
            .mount(&server)
            .await;

        let client = client_for(&server.uri(), 10);
        let person: Person = client
            .generate_structured(&user_messages("Give me Bob"))
            .await
            .expect("fenced JSON should parse");
        assert_eq!(person.name, "Bob");
    }

    #[tokio::test]
    async fn test_generate_structured_reports_unusable_output() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(chat_completions_response("I cannot answer that.")),
            )
            .mount(&server)
            .await;

        let client = client_for(&server.uri(), 10);
        let err = client
            .generate_structured::<Person>(&user_messages("Give me a person"))
            .await
            .expect_err("prose is not JSON");
        assert!(matches!(
            err,
            KgRagError::Service(crate::errors::ServiceError::Llm(LlmError::InvalidResponse(_)))
        ));
    }

    // ── cache key ─────────────────────────────────────────────────────────────

    #[test]
    fn test_cache_key_differs_by_content() {
        let client = client_for("http://localhost:1", 10);
        assert_ne!(
            client.cache_key("text", &user_messages("hello")),
            client.cache_key("text", &user_messages("world"))
        );
    }

    #[test]
    fn test_cache_key_differs_by_prefix() {
        let client = client_for("http://localhost:1", 10);
        let msgs = user_messages("hello");
        assert_ne!(
            client.cache_key("text", &msgs),
            client.cache_key("structured", &msgs)
        );
    }
}
