//! Chat with a source repository through an LLM.
//!
//! A repository (and optionally a branch diff) is rendered into a context
//! artifact, registered in a [`ContextRegistry`], and attached to every
//! message of a [`Session`]. Replies stream through a [`Controller`] that
//! can be interrupted between chunks.

pub mod cancel;
pub mod config;
pub mod context;
pub mod controller;
pub mod error;
pub mod git;
pub mod paths;
pub mod prompt;
pub mod provider;
pub mod session;

pub use cancel::CancellationSignal;
pub use context::{ContextArtifact, ContextBuilder, ContextKind, ContextRegistry, FileFilter};
pub use controller::{Controller, StreamEvent, SubmitOptions, Submission};
pub use error::{ChatError, ErrorKind};
pub use session::{ConversationTurn, Session, TurnHandle, TurnStatus};
