//! Streaming inference: turns a submitted message into a reply, chunk by chunk.
//!
//! Per submission the controller goes `Prompting → Streaming` and ends
//! in `Completed`, `Interrupted` or `Failed`. Prompting errors are returned
//! before the session is touched; everything after that ends up in the
//! turn's status.

use crate::cancel::CancellationSignal;
use crate::config::ModelConfig;
use crate::context::{ContextKind, ContextRegistry};
use crate::error::ChatError;
use crate::prompt;
use crate::provider::{ChunkStream, GenerateRequest, Provider};
use crate::session::{ConversationTurn, Session, TurnHandle, TurnStatus};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Prompting,
    Streaming,
    Completed,
    Interrupted,
    Failed,
}

impl From<&TurnStatus> for Phase {
    fn from(s: &TurnStatus) -> Self {
        match s {
            TurnStatus::Pending => Phase::Streaming,
            TurnStatus::Completed => Phase::Completed,
            TurnStatus::Interrupted => Phase::Interrupted,
            TurnStatus::Failed { .. } => Phase::Failed,
        }
    }
}

/// What the presentation layer sees of a streaming reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A chunk arrived; `message` is the assistant reply so far.
    Delta { chunk: String, message: String },

    /// Always the last event of a submission.
    Finished(TurnStatus),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SubmitOptions {
    /// Include the current diff context in the prompt.
    pub diff_mode: bool,
}

#[derive(Clone)]
pub struct Controller {
    provider: Arc<dyn Provider + Send + Sync>,
}

impl Controller {
    pub fn new(provider: Arc<dyn Provider + Send + Sync>) -> Self {
        Self { provider }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Validate, append the pending turn, then assemble the request.
    fn prepare(
        &self,
        session: &Session,
        registry: &ContextRegistry,
        message: &str,
        options: SubmitOptions,
        config: ModelConfig,
    ) -> Result<(TurnHandle, GenerateRequest), ChatError> {
        tracing::debug!(phase = ?Phase::Prompting, diff_mode = options.diff_mode);
        if session.is_busy() {
            return Err(ChatError::SubmissionInProgress);
        }
        let full = registry
            .get(ContextKind::FullRepository)
            .ok_or(ChatError::NoContext)?;
        let diff = if options.diff_mode {
            Some(
                registry
                    .get(ContextKind::Diff)
                    .ok_or(ChatError::MissingDiffContext)?,
            )
        } else {
            None
        };

        let history = session.turns();
        let parts = prompt::assemble(&full, diff.as_deref(), &history, message);
        let handle = session.submit(message, registry)?;

        tracing::info!(
            turn = handle.index(),
            model = %config.model,
            parts = parts.len(),
            context_generation = full.generation,
            "submitting message"
        );
        Ok((handle, GenerateRequest { parts, config }))
    }

    /// Start streaming a reply to `message`.
    ///
    /// Must be called from within a Tokio runtime. Prompting errors
    /// (`SubmissionInProgress`, `NoContext`, `MissingDiffContext`) are
    /// returned here and leave the session unchanged.
    pub fn submit(
        &self,
        session: &Session,
        registry: &ContextRegistry,
        message: &str,
        options: SubmitOptions,
        config: ModelConfig,
    ) -> Result<Submission, ChatError> {
        let (handle, req) = self.prepare(session, registry, message, options, config)?;
        let cancel = session.cancellation();
        let provider = self.provider.clone();
        let (tx, rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            match provider.stream_generate(req).await {
                Ok(stream) => drive(stream, handle, &cancel, &tx).await,
                Err(e) => {
                    let err = ChatError::from(e);
                    tracing::warn!(error = %err, "failed to start stream");
                    finish(handle, TurnStatus::failed(&err), &tx)
                }
            }
        });

        Ok(Submission { events: rx, task })
    }

    /// Non-streaming variant: one request, the whole reply at once.
    pub async fn ask_once(
        &self,
        session: &Session,
        registry: &ContextRegistry,
        message: &str,
        options: SubmitOptions,
        config: ModelConfig,
    ) -> Result<ConversationTurn, ChatError> {
        let (mut handle, req) = self.prepare(session, registry, message, options, config)?;
        let status = match self.provider.generate(req).await {
            Ok(text) => {
                handle.append(&text);
                TurnStatus::Completed
            }
            Err(e) => {
                let err = ChatError::from(e);
                tracing::warn!(error = %err, "generation failed");
                TurnStatus::failed(&err)
            }
        };
        Ok(handle.finish(status))
    }
}

/// Consume `stream` into the pending turn until it ends, fails, or the
/// cancellation signal is observed.
///
/// The signal is checked as each chunk arrives; a set signal is cleared and
/// the chunk is dropped. Text already appended is kept in every outcome.
pub async fn drive(
    mut stream: ChunkStream,
    mut handle: TurnHandle,
    cancel: &CancellationSignal,
    events: &mpsc::UnboundedSender<StreamEvent>,
) -> ConversationTurn {
    tracing::debug!(turn = handle.index(), phase = ?Phase::Streaming);

    let status = loop {
        let Some(item) = stream.next().await else {
            break TurnStatus::Completed;
        };
        if cancel.take() {
            tracing::info!(turn = handle.index(), "generation interrupted by user");
            break TurnStatus::Interrupted;
        }
        match item {
            Ok(chunk) => {
                let message = handle.append(&chunk.text);
                // The receiver may be gone; the turn still completes.
                let _ = events.send(StreamEvent::Delta {
                    chunk: chunk.text,
                    message,
                });
            }
            Err(e) => {
                let err = ChatError::from(e);
                tracing::warn!(turn = handle.index(), error = %err, "stream failed");
                break TurnStatus::failed(&err);
            }
        }
    };

    // Stops the provider's pump on its next send.
    drop(stream);
    finish(handle, status, events)
}

fn finish(
    handle: TurnHandle,
    status: TurnStatus,
    events: &mpsc::UnboundedSender<StreamEvent>,
) -> ConversationTurn {
    let turn = handle.finish(status);
    tracing::info!(
        phase = ?Phase::from(&turn.status),
        chars = turn.assistant.chars().count(),
        "generation finished"
    );
    let _ = events.send(StreamEvent::Finished(turn.status.clone()));
    turn
}

/// A running submission: its event stream and the task driving it.
#[derive(Debug)]
pub struct Submission {
    events: mpsc::UnboundedReceiver<StreamEvent>,
    task: JoinHandle<ConversationTurn>,
}

impl Submission {
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }

    /// Wait for the terminal turn, discarding events not yet read.
    pub async fn wait(self) -> Result<ConversationTurn, ChatError> {
        let Submission { events, task } = self;
        // Sends fail from here on instead of queueing.
        drop(events);
        task.await
            .map_err(|e| ChatError::Generation(format!("stream task failed: {e}")))
    }
}
