use crate::provider::DocumentHandle;
use std::collections::BTreeSet;
use std::path::Path;
use std::time::SystemTime;

/// Which registry slot an artifact occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextKind {
    FullRepository,
    Diff,
}

impl ContextKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextKind::FullRepository => "full-repository",
            ContextKind::Diff => "diff",
        }
    }
}

/// A built context blob, optionally mirrored as an uploaded document.
#[derive(Debug, Clone)]
pub struct ContextArtifact {
    pub kind: ContextKind,
    pub text: String,

    /// Human-readable origin, e.g. `main...feature` for diffs.
    pub label: Option<String>,

    /// Remote copy of `text`, when the context was uploaded.
    pub document: Option<DocumentHandle>,

    /// Logical build counter, assigned by the registry on `set`.
    pub generation: u64,

    pub built_at: SystemTime,
}

impl ContextArtifact {
    pub fn new(kind: ContextKind, text: String) -> Self {
        Self {
            kind,
            text,
            label: None,
            document: None,
            generation: 0,
            built_at: SystemTime::now(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_document(mut self, document: DocumentHandle) -> Self {
        self.document = Some(document);
        self
    }

    pub fn byte_size(&self) -> usize {
        self.text.len()
    }
}

/// Non-empty set of file extensions selecting files for the full context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFilter {
    extensions: BTreeSet<String>,
}

impl FileFilter {
    /// Normalizes `py`, `.PY` and ` py ` to `py`. Fails on an empty set.
    pub fn new<I, S>(extensions: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let extensions: BTreeSet<String> = extensions
            .into_iter()
            .map(|e| e.as_ref().trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .collect();

        if extensions.is_empty() {
            anyhow::bail!("at least one file extension must be selected");
        }
        Ok(Self { extensions })
    }

    pub fn extensions(&self) -> impl Iterator<Item = &str> {
        self.extensions.iter().map(String::as_str)
    }

    /// A file matches when its name ends with `.<ext>`; a name without a dot
    /// never matches, and neither does a bare dotfile like `.py`.
    pub fn matches(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        let name = name.to_ascii_lowercase();
        let Some((stem, ext)) = name.rsplit_once('.') else {
            return false;
        };
        !stem.is_empty() && self.extensions.contains(ext)
    }
}
