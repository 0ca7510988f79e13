use thiserror::Error;

/// Errors raised by context building and the chat session.
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("no repository context is loaded; build one first")]
    NoContext,

    #[error("diff mode is enabled but no diff context has been built")]
    MissingDiffContext,

    #[error("ref not found: {0}")]
    RefNotFound(String),

    #[error("repository history is too shallow to compute the diff; deepen it first")]
    ShallowHistory,

    #[error("a message is already being answered")]
    SubmissionInProgress,

    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("generation failed: {0}")]
    Generation(String),

    #[error("git command failed: {0}")]
    Git(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Payload-free discriminant of [`ChatError`], stored on failed turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NoContext,
    MissingDiffContext,
    RefNotFound,
    ShallowHistory,
    SubmissionInProgress,
    QuotaExceeded,
    Generation,
    Git,
    Io,
}

impl ChatError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChatError::NoContext => ErrorKind::NoContext,
            ChatError::MissingDiffContext => ErrorKind::MissingDiffContext,
            ChatError::RefNotFound(_) => ErrorKind::RefNotFound,
            ChatError::ShallowHistory => ErrorKind::ShallowHistory,
            ChatError::SubmissionInProgress => ErrorKind::SubmissionInProgress,
            ChatError::QuotaExceeded(_) => ErrorKind::QuotaExceeded,
            ChatError::Generation(_) => ErrorKind::Generation,
            ChatError::Git(_) => ErrorKind::Git,
            ChatError::Io(_) => ErrorKind::Io,
        }
    }

    /// Text shown to the user in place of the raw error.
    pub fn user_message(&self) -> String {
        match self {
            ChatError::NoContext => "Please select a repository first.".to_string(),
            ChatError::QuotaExceeded(_) => {
                "The model has run out of resources. Please try again later.".to_string()
            }
            ChatError::Generation(_) => "An error occurred while generating content.".to_string(),
            other => other.to_string(),
        }
    }
}
