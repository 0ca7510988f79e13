//! Turns a working tree, or the diff between two refs, into a context artifact.

use super::artifact::{ContextArtifact, ContextKind, FileFilter};
use super::registry::ContextRegistry;
use crate::error::ChatError;
use crate::git;
use crate::provider::Provider;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

pub const FILE_BEGIN: &str = "--- BEGIN FILE: ";
pub const FILE_END: &str = "--- END FILE: ";
const MARKER_TAIL: &str = " ---";

/// Body used for files whose bytes are not UTF-8.
pub const NON_UTF8_PLACEHOLDER: &str = "[non-UTF-8 content omitted]";

/// Render every file under `root` accepted by `filter`, in lexicographic
/// order of relative path.
///
/// Each file becomes a block framed by `--- BEGIN FILE: <path> ---` and
/// `--- END FILE: <path> ---`. Unreadable or non-UTF-8 files keep their block
/// with a placeholder body; walk errors are logged and skipped.
pub fn render_repository(root: &Path, filter: &FileFilter) -> String {
    let mut files: Vec<(String, PathBuf)> = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || e.file_name() != ".git");

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() || !filter.matches(entry.path()) {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        files.push((relative_name(rel), entry.path().to_path_buf()));
    }

    files.sort_by(|a, b| a.0.cmp(&b.0));

    let mut out = String::new();
    for (i, (name, path)) in files.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        push_file_block(&mut out, name, path);
    }
    tracing::debug!(files = files.len(), bytes = out.len(), "rendered repository");
    out
}

fn relative_name(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn push_file_block(out: &mut String, name: &str, path: &Path) {
    out.push_str(FILE_BEGIN);
    out.push_str(name);
    out.push_str(MARKER_TAIL);
    out.push('\n');

    match std::fs::read(path) {
        Ok(bytes) => match String::from_utf8(bytes) {
            Ok(text) => {
                out.push_str(&text);
                if !text.is_empty() && !text.ends_with('\n') {
                    out.push('\n');
                }
            }
            Err(_) => {
                tracing::warn!(file = name, "not valid UTF-8; content omitted");
                out.push_str(NON_UTF8_PLACEHOLDER);
                out.push('\n');
            }
        },
        Err(e) => {
            tracing::warn!(file = name, error = %e, "unreadable file");
            out.push_str(&format!("[unreadable: {e}]\n"));
        }
    }

    out.push_str(FILE_END);
    out.push_str(name);
    out.push_str(MARKER_TAIL);
    out.push('\n');
}

/// Builds artifacts and registers them, optionally uploading them first.
#[derive(Clone)]
pub struct ContextBuilder {
    registry: ContextRegistry,
    uploader: Option<Arc<dyn Provider + Send + Sync>>,
}

impl ContextBuilder {
    pub fn new(registry: ContextRegistry) -> Self {
        Self {
            registry,
            uploader: None,
        }
    }

    /// Upload each built context through `provider` before registering it.
    pub fn with_uploader(mut self, provider: Arc<dyn Provider + Send + Sync>) -> Self {
        self.uploader = Some(provider);
        self
    }

    pub async fn build_full_context(
        &self,
        root: &Path,
        filter: &FileFilter,
    ) -> Result<Arc<ContextArtifact>, ChatError> {
        let extensions: Vec<&str> = filter.extensions().collect();
        tracing::info!(?root, ?extensions, "building repository context");
        let root_owned = root.to_path_buf();
        let filter_owned = filter.clone();
        let text = tokio::task::spawn_blocking(move || render_repository(&root_owned, &filter_owned))
            .await
            .map_err(|e| ChatError::Io(std::io::Error::other(e)))?;

        let artifact = ContextArtifact::new(ContextKind::FullRepository, text)
            .with_label(root.display().to_string());
        self.register(artifact).await
    }

    /// Diff of `ref_b` against its merge base with `ref_a`.
    ///
    /// Does not fetch or deepen history: a ref missing locally is
    /// `RefNotFound`, and a merge base hidden by a shallow clone is
    /// `ShallowHistory`.
    pub async fn build_diff_context(
        &self,
        root: &Path,
        ref_a: &str,
        ref_b: &str,
    ) -> Result<Arc<ContextArtifact>, ChatError> {
        tracing::info!(?root, ref_a, ref_b, "building diff context");
        let a = git::resolve_ref(root, ref_a).await?;
        let b = git::resolve_ref(root, ref_b).await?;

        let Some(base) = git::merge_base(root, &a, &b).await? else {
            if git::is_shallow(root).await? {
                return Err(ChatError::ShallowHistory);
            }
            return Err(ChatError::Git(format!(
                "{ref_a} and {ref_b} have no common history"
            )));
        };

        let text = git::diff(root, &base, &b).await?;
        if text.is_empty() {
            tracing::warn!(ref_a, ref_b, "diff is empty");
        }
        let artifact =
            ContextArtifact::new(ContextKind::Diff, text).with_label(format!("{ref_a}...{ref_b}"));
        self.register(artifact).await
    }

    async fn register(&self, artifact: ContextArtifact) -> Result<Arc<ContextArtifact>, ChatError> {
        let artifact = match &self.uploader {
            Some(provider) => {
                let handle = provider.upload_document(artifact.text.clone()).await?;
                tracing::debug!(uri = %handle.uri, "uploaded context");
                artifact.with_document(handle)
            }
            None => artifact,
        };
        Ok(self.registry.set(artifact))
    }
}
