//! Conversation history and the one-submission-at-a-time lifecycle.

use crate::cancel::CancellationSignal;
use crate::context::ContextRegistry;
use crate::error::{ChatError, ErrorKind};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnStatus {
    /// The reply is still being streamed.
    Pending,
    Completed,
    Interrupted,
    Failed { kind: ErrorKind, message: String },
}

impl TurnStatus {
    pub fn failed(err: &ChatError) -> Self {
        TurnStatus::Failed {
            kind: err.kind(),
            message: err.user_message(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TurnStatus::Pending)
    }

    pub fn label(&self) -> &'static str {
        match self {
            TurnStatus::Pending => "pending",
            TurnStatus::Completed => "completed",
            TurnStatus::Interrupted => "interrupted",
            TurnStatus::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationTurn {
    pub user: String,
    pub assistant: String,
    pub status: TurnStatus,
}

#[derive(Debug, Default)]
struct SessionState {
    turns: Vec<ConversationTurn>,
    in_progress: bool,
}

/// Ordered conversation turns plus the submission-in-progress flag.
///
/// Clones are handles to the same session, so a control path (a key
/// handler, a signal listener) can hold one and call [`Session::interrupt`]
/// while another task streams into the pending turn.
#[derive(Debug, Clone, Default)]
pub struct Session {
    state: Arc<Mutex<SessionState>>,
    cancel: CancellationSignal,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a pending turn for `user_message`.
    ///
    /// Nothing changes when this fails.
    pub fn submit(
        &self,
        user_message: impl Into<String>,
        registry: &ContextRegistry,
    ) -> Result<TurnHandle, ChatError> {
        if !registry.has_full_context() {
            return Err(ChatError::NoContext);
        }

        let mut state = self.lock();
        if state.in_progress {
            return Err(ChatError::SubmissionInProgress);
        }

        // A stop requested after the previous turn finished must not cancel
        // this one.
        self.cancel.reset();

        state.turns.push(ConversationTurn {
            user: user_message.into(),
            assistant: String::new(),
            status: TurnStatus::Pending,
        });
        state.in_progress = true;
        let index = state.turns.len() - 1;
        tracing::debug!(turn = index, "submission started");

        Ok(TurnHandle {
            session: self.clone(),
            index,
            finished: false,
        })
    }

    /// Ask the streaming turn to stop at the next chunk boundary.
    pub fn interrupt(&self) {
        // Held until the signal is set: serializes with finish and submit.
        let state = self.lock();
        if state.in_progress {
            tracing::info!("interrupt requested");
            self.cancel.cancel();
        }
    }

    /// Drop every turn. Refused while a reply is streaming.
    pub fn clear(&self) -> Result<(), ChatError> {
        let mut state = self.lock();
        if state.in_progress {
            return Err(ChatError::SubmissionInProgress);
        }
        state.turns.clear();
        Ok(())
    }

    pub fn is_busy(&self) -> bool {
        self.lock().in_progress
    }

    pub fn turns(&self) -> Vec<ConversationTurn> {
        self.lock().turns.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn cancellation(&self) -> CancellationSignal {
        self.cancel.clone()
    }
}

/// Write access to the pending turn of one submission.
///
/// [`finish`](TurnHandle::finish) consumes the handle, so no chunk can be
/// appended once the turn is final. Dropping an unfinished handle fails the
/// turn instead of leaving the session locked.
#[derive(Debug)]
pub struct TurnHandle {
    session: Session,
    index: usize,
    finished: bool,
}

impl TurnHandle {
    pub fn index(&self) -> usize {
        self.index
    }

    /// Append `chunk` and return the whole message so far.
    pub fn append(&mut self, chunk: &str) -> String {
        let mut state = self.session.lock();
        let turn = &mut state.turns[self.index];
        turn.assistant.push_str(chunk);
        turn.assistant.clone()
    }

    pub fn finish(mut self, status: TurnStatus) -> ConversationTurn {
        self.finalize(status)
    }

    fn finalize(&mut self, status: TurnStatus) -> ConversationTurn {
        debug_assert!(status.is_terminal());
        self.finished = true;
        let mut state = self.session.lock();
        state.in_progress = false;
        let turn = &mut state.turns[self.index];
        turn.status = status;
        tracing::debug!(turn = self.index, status = turn.status.label(), "submission finished");
        turn.clone()
    }
}

impl Drop for TurnHandle {
    fn drop(&mut self) {
        if !self.finished {
            self.finalize(TurnStatus::failed(&ChatError::Generation(
                "stream abandoned".to_string(),
            )));
        }
    }
}
