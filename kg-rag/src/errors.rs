//! Error types for kg-rag.

use std::time::Duration;

/// Alias for Results returning [`KgRagError`].
pub type Result<T> = std::result::Result<T, KgRagError>;

/// Top-level error type for kg-rag.
///
/// Every variant aborts the current invocation; the binary reports it and exits non-zero.
#[derive(Debug, thiserror::Error)]
pub enum KgRagError {
    /// Bad file or path, malformed GraphML, or the store rejected the import.
    #[error("Import error: {0}")]
    Import(String),

    /// Malformed or empty query input.
    #[error("Query error: {0}")]
    Query(String),

    /// Graph store or LLM service unreachable or erroring.
    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    /// Missing or invalid environment configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl KgRagError {
    /// Whether retrying the failed call could succeed.
    ///
    /// Only service-side conditions qualify: rate limits, 5xx responses,
    /// dropped connections, and timeouts.
    pub fn is_transient(&self) -> bool {
        match self {
            KgRagError::Service(err) => err.is_transient(),
            _ => false,
        }
    }
}

impl From<LlmError> for KgRagError {
    fn from(err: LlmError) -> Self {
        KgRagError::Service(ServiceError::Llm(err))
    }
}

/// Failures of the external collaborators (graph store, LLM service).
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("graph store: {message}")]
    Store { message: String, transient: bool },

    #[error("LLM: {0}")]
    Llm(#[from] LlmError),

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}

impl ServiceError {
    /// Build a store error that should not be retried.
    pub fn store(message: impl Into<String>) -> Self {
        ServiceError::Store {
            message: message.into(),
            transient: false,
        }
    }

    pub fn is_transient(&self) -> bool {
        match self {
            ServiceError::Store { transient, .. } => *transient,
            ServiceError::Llm(err) => err.is_transient(),
            ServiceError::Timeout { .. } => true,
        }
    }
}

/// LLM-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Rate limited")]
    RateLimit,

    #[error("Model refused to respond")]
    Refusal,

    #[error("Empty response from LLM")]
    EmptyResponse,

    #[error("Authentication failed")]
    Authentication,

    #[error("Unusable response: {0}")]
    InvalidResponse(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("API error: HTTP {status}: {message}")]
    Api { status: u16, message: String },
}

impl LlmError {
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::RateLimit | LlmError::Unavailable(_) => true,
            LlmError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
