use crate::config::ModelConfig;
use crate::error::ChatError;
use futures_core::stream::BoxStream;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// A context blob uploaded to the completion service ahead of time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentHandle {
    pub name: String,
    pub uri: String,
    pub mime_type: String,
}

/// One ordered piece of a prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptPart {
    Text(String),
    Document(DocumentHandle),
}

impl PromptPart {
    pub fn text(s: impl Into<String>) -> Self {
        PromptPart::Text(s.into())
    }
}

#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub parts: Vec<PromptPart>,

    /// Snapshot taken when the request was assembled.
    pub config: ModelConfig,
}

#[derive(Debug, Clone)]
pub struct ChatChunk {
    pub text: String,
}

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("API error: HTTP {status}: {message}")]
    Api { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("no data received for {0:?}")]
    Timeout(Duration),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    pub fn is_quota(&self) -> bool {
        matches!(self, ProviderError::QuotaExceeded(_))
    }
}

impl From<ProviderError> for ChatError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::QuotaExceeded(msg) => ChatError::QuotaExceeded(msg),
            other => ChatError::Generation(other.to_string()),
        }
    }
}

pub type ChunkStream = BoxStream<'static, Result<ChatChunk, ProviderError>>;

pub type ProviderFuture<T> = Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send>>;

/// Completion service interface.
///
/// Futures are `'static`: implementations clone what they need so callers
/// can drive them from spawned tasks.
pub trait Provider {
    fn name(&self) -> &'static str;

    /// Upload `text` so prompts can reference it instead of inlining it.
    fn upload_document(&self, text: String) -> ProviderFuture<DocumentHandle>;

    /// One-shot generation; resolves to the whole reply.
    fn generate(&self, req: GenerateRequest) -> ProviderFuture<String>;

    /// Start streaming a response.
    fn stream_generate(&self, req: GenerateRequest) -> ProviderFuture<ChunkStream>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn quota_maps_to_quota_exceeded() {
        let e: ChatError = ProviderError::QuotaExceeded("RESOURCE_EXHAUSTED".into()).into();
        assert_eq!(e.kind(), ErrorKind::QuotaExceeded);
    }

    #[test]
    fn everything_else_maps_to_generation() {
        for err in [
            ProviderError::Api { status: 500, message: "boom".into() },
            ProviderError::Network("reset".into()),
            ProviderError::Timeout(Duration::from_secs(5)),
        ] {
            assert!(!err.is_quota());
            let e: ChatError = err.into();
            assert_eq!(e.kind(), ErrorKind::Generation);
        }
    }
}
