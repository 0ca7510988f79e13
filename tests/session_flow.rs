use codemaestro::config::Settings;
use codemaestro::provider::stub::StubProvider;
use codemaestro::provider::{
    ChatChunk, ChunkStream, DocumentHandle, GenerateRequest, Provider, ProviderError,
    ProviderFuture,
};
use codemaestro::{
    ChatError, ContextBuilder, ContextKind, ContextRegistry, Controller, ErrorKind, FileFilter,
    Session, StreamEvent, SubmitOptions, TurnStatus,
};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

type ChunkSender = mpsc::Sender<Result<ChatChunk, ProviderError>>;

/// Streams whatever the test pushes through the paired sender.
struct GatedProvider {
    stream: Mutex<Option<ChunkStream>>,
}

impl GatedProvider {
    fn new() -> (ChunkSender, Arc<Self>) {
        let (tx, rx) = mpsc::channel(8);
        let stream: ChunkStream = Box::pin(ReceiverStream::new(rx));
        (tx, Arc::new(Self { stream: Mutex::new(Some(stream)) }))
    }
}

impl Provider for GatedProvider {
    fn name(&self) -> &'static str {
        "gated"
    }

    fn upload_document(&self, _text: String) -> ProviderFuture<DocumentHandle> {
        Box::pin(async { Err(ProviderError::NotConfigured("no uploads".into())) })
    }

    fn generate(&self, _req: GenerateRequest) -> ProviderFuture<String> {
        Box::pin(async { Err(ProviderError::NotConfigured("streaming only".into())) })
    }

    fn stream_generate(&self, _req: GenerateRequest) -> ProviderFuture<ChunkStream> {
        let stream = self.stream.lock().unwrap().take();
        Box::pin(async move {
            stream.ok_or_else(|| ProviderError::NotConfigured("stream already taken".into()))
        })
    }
}

fn chunk(text: &str) -> Result<ChatChunk, ProviderError> {
    Ok(ChatChunk { text: text.to_string() })
}

fn git(dir: &Path, args: &[&str]) {
    let out = std::process::Command::new("git")
        .args(["-c", "user.name=Test", "-c", "user.email=test@test.com"])
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(out.status.success(), "git {args:?}: {}", String::from_utf8_lossy(&out.stderr));
}

fn write(dir: &Path, file: &str, content: &str) {
    let path = dir.join(file);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn config() -> codemaestro::config::ModelConfig {
    Settings::default().model_config()
}

#[tokio::test]
async fn nothing_is_recorded_before_a_repository_is_loaded() {
    let registry = ContextRegistry::new();
    let session = Session::new();
    let controller = Controller::new(Arc::new(StubProvider::new().with_delay(Duration::ZERO)));

    let err = controller
        .submit(&session, &registry, "hello", SubmitOptions::default(), config())
        .unwrap_err();
    assert!(matches!(err, ChatError::NoContext));
    assert_eq!(err.user_message(), "Please select a repository first.");
    assert!(session.is_empty());
    assert!(!session.is_busy());
}

#[tokio::test]
async fn repository_chat_streams_to_completion() {
    let repo = tempfile::tempdir().unwrap();
    write(repo.path(), "src/a.py", "print(1)\n");
    write(repo.path(), "README.md", "# not included\n");

    let registry = ContextRegistry::new();
    let builder = ContextBuilder::new(registry.clone());
    let artifact = builder
        .build_full_context(repo.path(), &FileFilter::new(["py"]).unwrap())
        .await
        .unwrap();
    assert_eq!(
        artifact.text,
        "--- BEGIN FILE: src/a.py ---\nprint(1)\n--- END FILE: src/a.py ---\n"
    );

    let session = Session::new();
    let controller = Controller::new(Arc::new(StubProvider::new().with_delay(Duration::ZERO)));

    let mut submission = controller
        .submit(&session, &registry, "what does a.py do?", SubmitOptions::default(), config())
        .unwrap();

    let mut last_message = String::new();
    let status = loop {
        match submission.next_event().await.unwrap() {
            StreamEvent::Delta { message, .. } => last_message = message,
            StreamEvent::Finished(status) => break status,
        }
    };
    assert_eq!(status, TurnStatus::Completed);

    let turns = session.turns();
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].user, "what does a.py do?");
    assert_eq!(turns[0].assistant, last_message);
    assert!(last_message.ends_with("You said: what does a.py do?\n"));
    assert!(!session.is_busy());
}

#[tokio::test]
async fn second_message_is_refused_while_streaming_and_interrupt_keeps_partial_text() {
    let registry = ContextRegistry::new();
    registry.set(codemaestro::ContextArtifact::new(
        ContextKind::FullRepository,
        "CODE".to_string(),
    ));
    let session = Session::new();
    let (tx, provider) = GatedProvider::new();
    let controller = Controller::new(provider);

    let mut submission = controller
        .submit(&session, &registry, "first", SubmitOptions::default(), config())
        .unwrap();

    let err = controller
        .submit(&session, &registry, "second", SubmitOptions::default(), config())
        .unwrap_err();
    assert!(matches!(err, ChatError::SubmissionInProgress));
    assert_eq!(session.len(), 1);

    tx.send(chunk("Hello")).await.unwrap();
    match submission.next_event().await.unwrap() {
        StreamEvent::Delta { chunk, message } => {
            assert_eq!(chunk, "Hello");
            assert_eq!(message, "Hello");
        }
        other => panic!("unexpected event: {other:?}"),
    }

    session.interrupt();
    tx.send(chunk(" world")).await.unwrap();

    let turn = submission.wait().await.unwrap();
    assert_eq!(turn.status, TurnStatus::Interrupted);
    assert_eq!(turn.assistant, "Hello");
    assert!(!session.is_busy());
    assert!(!session.cancellation().is_cancelled());
}

#[tokio::test]
async fn quota_failure_is_recorded_on_the_turn() {
    let registry = ContextRegistry::new();
    registry.set(codemaestro::ContextArtifact::new(
        ContextKind::FullRepository,
        "CODE".to_string(),
    ));
    let session = Session::new();
    let (tx, provider) = GatedProvider::new();
    let controller = Controller::new(provider);

    let submission = controller
        .submit(&session, &registry, "q", SubmitOptions::default(), config())
        .unwrap();
    tx.send(chunk("partial")).await.unwrap();
    tx.send(Err(ProviderError::QuotaExceeded("RESOURCE_EXHAUSTED".into())))
        .await
        .unwrap();

    let turn = submission.wait().await.unwrap();
    assert_eq!(turn.assistant, "partial");
    assert_eq!(
        turn.status,
        TurnStatus::Failed {
            kind: ErrorKind::QuotaExceeded,
            message: "The model has run out of resources. Please try again later.".into(),
        }
    );

    // The session accepts the next message after a failure.
    assert!(!session.is_busy());
}

#[tokio::test]
async fn diff_mode_needs_a_diff_and_then_uses_it() {
    let repo = tempfile::tempdir().unwrap();
    let p = repo.path();
    git(p, &["init", "-q", "-b", "main"]);
    write(p, "app.py", "x = 1\n");
    git(p, &["add", "."]);
    git(p, &["commit", "-q", "-m", "init"]);
    git(p, &["checkout", "-q", "-b", "dev"]);
    write(p, "app.py", "x = 1\ny = 2\n");
    git(p, &["commit", "-q", "-am", "dev work"]);

    let registry = ContextRegistry::new();
    let builder = ContextBuilder::new(registry.clone());
    builder
        .build_full_context(p, &FileFilter::new(["py"]).unwrap())
        .await
        .unwrap();

    let session = Session::new();
    let controller = Controller::new(Arc::new(StubProvider::new().with_delay(Duration::ZERO)));
    let diff_mode = SubmitOptions { diff_mode: true };

    let err = controller
        .submit(&session, &registry, "review", diff_mode, config())
        .unwrap_err();
    assert!(matches!(err, ChatError::MissingDiffContext));
    assert!(session.is_empty());

    let diff = builder.build_diff_context(p, "main", "dev").await.unwrap();
    assert_eq!(diff.label.as_deref(), Some("main...dev"));
    assert!(diff.text.contains("+y = 2"));

    let turn = controller
        .submit(&session, &registry, "review", diff_mode, config())
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(turn.status, TurnStatus::Completed);
    // Framing(2) + source(3) + diff intro and block(4) + message(1).
    assert!(turn.assistant.contains("prompt parts: 10"), "got: {}", turn.assistant);
}

#[tokio::test]
async fn clear_is_refused_while_streaming() {
    let registry = ContextRegistry::new();
    registry.set(codemaestro::ContextArtifact::new(
        ContextKind::FullRepository,
        "CODE".to_string(),
    ));
    let session = Session::new();
    let (tx, provider) = GatedProvider::new();
    let controller = Controller::new(provider);

    let submission = controller
        .submit(&session, &registry, "q", SubmitOptions::default(), config())
        .unwrap();
    assert!(matches!(session.clear(), Err(ChatError::SubmissionInProgress)));

    drop(tx);
    let turn = submission.wait().await.unwrap();
    assert_eq!(turn.status, TurnStatus::Completed);

    session.clear().unwrap();
    assert!(session.is_empty());
}

/// Rejects every request the way an exhausted quota does.
struct ExhaustedProvider;

impl Provider for ExhaustedProvider {
    fn name(&self) -> &'static str {
        "exhausted"
    }

    fn upload_document(&self, _text: String) -> ProviderFuture<DocumentHandle> {
        Box::pin(async { Err(ProviderError::QuotaExceeded("HTTP 429".into())) })
    }

    fn generate(&self, _req: GenerateRequest) -> ProviderFuture<String> {
        Box::pin(async { Err(ProviderError::QuotaExceeded("HTTP 429".into())) })
    }

    fn stream_generate(&self, _req: GenerateRequest) -> ProviderFuture<ChunkStream> {
        Box::pin(async { Err(ProviderError::QuotaExceeded("RESOURCE_EXHAUSTED".into())) })
    }
}

fn loaded_registry() -> ContextRegistry {
    let registry = ContextRegistry::new();
    registry.set(codemaestro::ContextArtifact::new(
        ContextKind::FullRepository,
        "CODE".to_string(),
    ));
    registry
}

#[tokio::test]
async fn quota_rejection_before_the_first_chunk_fails_the_turn() {
    let registry = loaded_registry();
    let session = Session::new();
    let controller = Controller::new(Arc::new(ExhaustedProvider));

    let mut submission = controller
        .submit(&session, &registry, "q", SubmitOptions::default(), config())
        .unwrap();

    let mut events = Vec::new();
    while let Some(ev) = submission.next_event().await {
        events.push(ev);
    }
    assert_eq!(events.len(), 1);
    assert!(matches!(
        events.last(),
        Some(StreamEvent::Finished(TurnStatus::Failed { kind: ErrorKind::QuotaExceeded, .. }))
    ));

    let turn = submission.wait().await.unwrap();
    assert_eq!(turn.assistant, "");
    assert!(matches!(
        turn.status,
        TurnStatus::Failed { kind: ErrorKind::QuotaExceeded, .. }
    ));
    assert!(!session.is_busy());
    assert_eq!(session.turns()[0].status, turn.status);
}

#[tokio::test]
async fn one_shot_quota_rejection_fails_the_turn() {
    let registry = loaded_registry();
    let session = Session::new();
    let controller = Controller::new(Arc::new(ExhaustedProvider));

    let turn = controller
        .ask_once(&session, &registry, "q", SubmitOptions::default(), config())
        .await
        .unwrap();
    assert_eq!(
        turn.status,
        TurnStatus::Failed {
            kind: ErrorKind::QuotaExceeded,
            message: "The model has run out of resources. Please try again later.".into(),
        }
    );
    assert!(!session.is_busy());
    assert_eq!(session.len(), 1);
}
