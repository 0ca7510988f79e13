//! Repository and diff context: building, artifacts, and the current-context registry.

pub mod artifact;
pub mod builder;
pub mod registry;

pub use artifact::{ContextArtifact, ContextKind, FileFilter};
pub use builder::{render_repository, ContextBuilder};
pub use registry::ContextRegistry;
