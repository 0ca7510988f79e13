use super::{ChatChunk, ChunkStream, DocumentHandle, GenerateRequest, PromptPart, Provider, ProviderFuture};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Offline provider that echoes the user's message back in a few chunks.
#[derive(Debug, Clone)]
pub struct StubProvider {
    delay: Duration,
    uploads: Arc<AtomicUsize>,
}

impl Default for StubProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl StubProvider {
    pub fn new() -> Self {
        Self {
            delay: Duration::from_millis(120),
            uploads: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn reply_parts(req: &GenerateRequest) -> Vec<String> {
        let documents = req
            .parts
            .iter()
            .filter(|p| matches!(p, PromptPart::Document(_)))
            .count();
        let last = req
            .parts
            .iter()
            .rev()
            .find_map(|p| match p {
                PromptPart::Text(t) => Some(t.as_str()),
                PromptPart::Document(_) => None,
            })
            .unwrap_or_default();
        let message = last.strip_prefix("user:\n").unwrap_or(last);

        vec![
            format!(
                "[stub provider]\nmodel: {}\nprompt parts: {} ({} documents)\n\n",
                req.config.model,
                req.parts.len(),
                documents
            ),
            "You said: ".to_string(),
            message.to_string(),
            "\n".to_string(),
        ]
    }
}

impl Provider for StubProvider {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn upload_document(&self, text: String) -> ProviderFuture<DocumentHandle> {
        let n = self.uploads.fetch_add(1, Ordering::SeqCst) + 1;
        Box::pin(async move {
            Ok(DocumentHandle {
                name: format!("files/stub-{n}"),
                uri: format!("stub://doc/{n}?bytes={}", text.len()),
                mime_type: "text/plain".to_string(),
            })
        })
    }

    fn generate(&self, req: GenerateRequest) -> ProviderFuture<String> {
        Box::pin(async move { Ok(Self::reply_parts(&req).concat()) })
    }

    fn stream_generate(&self, req: GenerateRequest) -> ProviderFuture<ChunkStream> {
        let delay = self.delay;
        Box::pin(async move {
            let (tx, rx) = mpsc::channel(32);

            tokio::spawn(async move {
                for p in Self::reply_parts(&req) {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    if tx.send(Ok(ChatChunk { text: p })).await.is_err() {
                        break;
                    }
                }
            });

            Ok(Box::pin(ReceiverStream::new(rx)) as ChunkStream)
        })
    }
}
