use super::artifact::{ContextArtifact, ContextKind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Holds the current full-repository and diff artifacts.
///
/// Clones share the same slots. Readers get an `Arc` to the artifact that was
/// current at the time of the call, so a concurrent `set` never exposes a
/// half-written value.
#[derive(Debug, Clone, Default)]
pub struct ContextRegistry {
    inner: Arc<Slots>,
}

#[derive(Debug, Default)]
struct Slots {
    full: RwLock<Option<Arc<ContextArtifact>>>,
    diff: RwLock<Option<Arc<ContextArtifact>>>,
    generation: AtomicU64,
}

impl Slots {
    fn slot(&self, kind: ContextKind) -> &RwLock<Option<Arc<ContextArtifact>>> {
        match kind {
            ContextKind::FullRepository => &self.full,
            ContextKind::Diff => &self.diff,
        }
    }
}

impl ContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamps the next generation on `artifact` and makes it current for its
    /// kind. The previous artifact is dropped.
    ///
    /// A superseded uploaded document is left on the remote side; nothing
    /// here deletes it.
    pub fn set(&self, mut artifact: ContextArtifact) -> Arc<ContextArtifact> {
        artifact.generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let kind = artifact.kind;
        let artifact = Arc::new(artifact);

        let previous = {
            let mut slot = self
                .inner
                .slot(kind)
                .write()
                .unwrap_or_else(|e| e.into_inner());
            slot.replace(artifact.clone())
        };

        if let Some(old) = previous.as_ref().and_then(|p| p.document.as_ref()) {
            tracing::debug!(kind = kind.as_str(), orphaned = %old.uri, "superseded uploaded context");
        }
        tracing::info!(
            kind = kind.as_str(),
            generation = artifact.generation,
            bytes = artifact.byte_size(),
            "context registered"
        );
        artifact
    }

    pub fn get(&self, kind: ContextKind) -> Option<Arc<ContextArtifact>> {
        self.inner
            .slot(kind)
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn has_full_context(&self) -> bool {
        self.get(ContextKind::FullRepository).is_some()
    }

    pub fn has_diff_context(&self) -> bool {
        self.get(ContextKind::Diff).is_some()
    }
}
