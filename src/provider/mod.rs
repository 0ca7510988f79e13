//! Completion service interface and its implementations.

#[cfg(feature = "google")]
pub mod google;
pub mod stub;
mod types;

pub use types::{
    ChatChunk, ChunkStream, DocumentHandle, GenerateRequest, PromptPart, Provider, ProviderError,
    ProviderFuture,
};
