use crate::cli::{ConfigCommand, ContextArgs, RepoCommand};
use anyhow::Context;
use codemaestro::config::{ModelConfig, Settings};
use codemaestro::provider::{self, Provider};
use codemaestro::{
    git, paths, ChatError, ContextBuilder, ContextRegistry, Controller, FileFilter, Session,
    StreamEvent, SubmitOptions, Submission, TurnStatus,
};
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;

/// Everything one chat needs, passed around explicitly.
pub struct Workspace {
    pub root: PathBuf,
    pub session: Session,
    pub registry: ContextRegistry,
    pub controller: Controller,
    pub diff_mode: bool,
    base_config: ModelConfig,
}

impl Workspace {
    /// Fresh snapshot for the next request.
    pub fn model_config(&self) -> ModelConfig {
        self.base_config.clone()
    }

    pub fn options(&self) -> SubmitOptions {
        SubmitOptions {
            diff_mode: self.diff_mode,
        }
    }

    pub fn submit(&self, message: &str) -> Result<Submission, ChatError> {
        self.controller.submit(
            &self.session,
            &self.registry,
            message,
            self.options(),
            self.model_config(),
        )
    }

    pub fn status_line(&self) -> String {
        let context = self
            .registry
            .get(codemaestro::ContextKind::FullRepository)
            .map(|a| format!("{} bytes (generation {})", a.byte_size(), a.generation))
            .unwrap_or_else(|| "none".to_string());
        let diff = self
            .registry
            .get(codemaestro::ContextKind::Diff)
            .map(|a| a.label.clone().unwrap_or_default())
            .unwrap_or_else(|| "none".to_string());
        format!(
            "repo: {} | context: {context} | diff: {diff} ({}) | model: {} | provider: {} | turns: {}",
            self.root.display(),
            if self.diff_mode { "on" } else { "off" },
            self.base_config.model,
            self.controller.provider_name(),
            self.session.len(),
        )
    }
}

fn resolve_api_key(settings: &Settings) -> Option<String> {
    std::env::var("GEMINI_API_KEY")
        .ok()
        .filter(|k| !k.trim().is_empty())
        .or_else(|| settings.api_key.clone())
}

pub fn build_provider(
    http: &reqwest::Client,
    settings: &Settings,
    provider_name: &str,
) -> anyhow::Result<Arc<dyn Provider + Send + Sync>> {
    match provider_name {
        "google" => {
            #[cfg(feature = "google")]
            {
                let Some(key) = resolve_api_key(settings) else {
                    anyhow::bail!(
                        "No API key found. Set GEMINI_API_KEY or run `codemaestro config set api_key <KEY>`."
                    );
                };
                let p = provider::google::GoogleProvider::new(http.clone(), key)?;
                Ok(Arc::new(p))
            }
            #[cfg(not(feature = "google"))]
            {
                let _ = http;
                let _ = settings;
                anyhow::bail!("google provider is not enabled in this build")
            }
        }
        "stub" => Ok(Arc::new(provider::stub::StubProvider::new())),
        other => anyhow::bail!("unknown provider: {other}"),
    }
}

/// Use `location` in place when it is a local directory, otherwise clone it.
pub async fn prepare_repository(location: Option<&str>, branch: &str) -> anyhow::Result<PathBuf> {
    let location = location.unwrap_or(".");
    let local = Path::new(location);
    if local.is_dir() {
        return local
            .canonicalize()
            .with_context(|| format!("failed to resolve {}", local.display()));
    }

    let dest = paths::code_base_dir()?;
    git::clone_repo(location, Some(branch), &dest)
        .await
        .with_context(|| format!("failed to clone {location}"))?;
    git::init_submodules(&dest).await?;
    tracing::info!(?dest, "repository ready");
    Ok(dest)
}

/// Build the diff context, fetching missing refs and deepening a shallow
/// clone when the builder reports it needs to.
pub async fn prepare_diff(
    builder: &ContextBuilder,
    root: &Path,
    base: &str,
    head: &str,
) -> anyhow::Result<()> {
    for r in [base, head] {
        if let Err(ChatError::RefNotFound(_)) = git::resolve_ref(root, r).await {
            tracing::info!(r, "fetching ref");
            git::fetch_ref(root, r).await?;
        }
    }

    match builder.build_diff_context(root, base, head).await {
        Err(ChatError::ShallowHistory) => {
            tracing::info!("history is shallow; fetching full history before diffing");
            git::unshallow(root).await?;
            builder.build_diff_context(root, base, head).await?;
        }
        other => {
            other?;
        }
    }
    Ok(())
}

pub async fn open_workspace(
    http: &reqwest::Client,
    settings: &Settings,
    ctx: &ContextArgs,
    model: Option<String>,
    provider_name: Option<String>,
) -> anyhow::Result<Workspace> {
    let provider_name = provider_name
        .or_else(|| settings.provider.clone())
        .unwrap_or_else(|| "google".to_string());
    let provider = build_provider(http, settings, &provider_name)?;

    let filter = if ctx.extensions.is_empty() {
        settings.file_filter()?
    } else {
        FileFilter::new(&ctx.extensions)?
    };

    let diff_refs = match (&ctx.diff_base, &ctx.diff_head) {
        (Some(a), Some(b)) => Some((a.clone(), b.clone())),
        (None, None) => None,
        _ => anyhow::bail!("--diff-base and --diff-head must be given together"),
    };

    let registry = ContextRegistry::new();
    let mut builder = ContextBuilder::new(registry.clone());
    if ctx.upload || settings.upload_context.unwrap_or(false) {
        builder = builder.with_uploader(provider.clone());
    }

    let root = prepare_repository(ctx.repo.as_deref(), &ctx.branch).await?;
    builder.build_full_context(&root, &filter).await?;
    if let Some((a, b)) = &diff_refs {
        prepare_diff(&builder, &root, a, b).await?;
    }

    let mut base_config = settings.model_config();
    base_config.api_key = resolve_api_key(settings);
    if let Some(m) = model {
        base_config.model = m;
    }
    tracing::debug!(?base_config, "model config");

    Ok(Workspace {
        root,
        session: Session::new(),
        registry,
        controller: Controller::new(provider),
        diff_mode: diff_refs.is_some(),
        base_config,
    })
}

/// Resolves on the next Ctrl-C, or never if the handler cannot be installed.
async fn ctrl_c() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Print a streaming reply until it finishes; `stop` resolving interrupts it.
async fn stream_to_stdout(
    ws: &Workspace,
    mut submission: Submission,
    stop: impl Future<Output = ()>,
) -> TurnStatus {
    tokio::pin!(stop);
    let mut stopped = false;
    let mut out = std::io::stdout();
    loop {
        tokio::select! {
            biased;
            _ = &mut stop, if !stopped => {
                stopped = true;
                ws.session.interrupt();
            }
            ev = submission.next_event() => match ev {
                Some(StreamEvent::Delta { chunk, .. }) => {
                    print!("{chunk}");
                    out.flush().ok();
                }
                Some(StreamEvent::Finished(status)) => {
                    match &status {
                        TurnStatus::Interrupted => println!("\n[interrupted]"),
                        TurnStatus::Failed { message, .. } => println!("\n[error] {message}"),
                        _ => println!(),
                    }
                    return status;
                }
                None => return TurnStatus::Failed {
                    kind: codemaestro::ErrorKind::Generation,
                    message: "stream ended unexpectedly".to_string(),
                },
            },
        }
    }
}

pub async fn cmd_ask(ws: &Workspace, prompt: &str, no_stream: bool) -> anyhow::Result<()> {
    let status = if no_stream {
        let turn = ws
            .controller
            .ask_once(&ws.session, &ws.registry, prompt, ws.options(), ws.model_config())
            .await
            .map_err(|e| anyhow::anyhow!(e.user_message()))?;
        println!("{}", turn.assistant);
        turn.status
    } else {
        let submission = ws.submit(prompt).map_err(|e| anyhow::anyhow!(e.user_message()))?;
        stream_to_stdout(ws, submission, ctrl_c()).await
    };

    if let TurnStatus::Failed { message, .. } = status {
        anyhow::bail!(message);
    }
    Ok(())
}

const CHAT_HELP: &str = "Type a message and press Enter. Ctrl-C stops an answer; at the prompt, \
Ctrl-C or /quit exits. Commands: /quit, /clear, /diff on|off, /status";

pub async fn run_chat(mut ws: Workspace) -> anyhow::Result<()> {
    println!("{CHAT_HELP}");
    println!("{}", ws.status_line());

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush().ok();

        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read stdin")?,
            _ = ctrl_c() => {
                println!();
                break;
            }
        };
        let Some(line) = line else {
            break;
        };
        let msg = line.trim();
        if msg.is_empty() {
            continue;
        }

        match msg {
            "/quit" => break,
            "/clear" => {
                match ws.session.clear() {
                    Ok(()) => println!("(history cleared)"),
                    Err(e) => println!("{}", e.user_message()),
                }
                continue;
            }
            "/status" => {
                println!("{}", ws.status_line());
                continue;
            }
            "/diff on" => {
                ws.diff_mode = true;
                println!("(diff mode on)");
                continue;
            }
            "/diff off" => {
                ws.diff_mode = false;
                println!("(diff mode off)");
                continue;
            }
            _ => {}
        }

        match ws.submit(msg) {
            Ok(submission) => {
                stream_to_stdout(&ws, submission, ctrl_c()).await;
            }
            Err(e) => println!("{}", e.user_message()),
        }
    }
    Ok(())
}

pub fn cmd_config(cmd: ConfigCommand, path: &Path) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show => {
            let settings = Settings::load_or_default(path)?;
            print!("{}", settings.to_redacted_toml()?);
        }
        ConfigCommand::Path => println!("{}", path.display()),
        ConfigCommand::Set { key, value } => {
            let mut settings = Settings::load_or_default(path)?;
            settings.set_key(&key, &value)?;
            settings.save(path)?;
            tracing::info!(key, "setting saved");
        }
    }
    Ok(())
}

pub fn cmd_repo(cmd: RepoCommand, path: &Path) -> anyhow::Result<()> {
    let mut settings = Settings::load_or_default(path)?;
    match cmd {
        RepoCommand::Add { url } => {
            if !settings.add_repository(&url) {
                anyhow::bail!("repository already saved: {url}");
            }
            settings.save(path)?;
        }
        RepoCommand::List => {
            if settings.repositories.is_empty() {
                println!("(no repositories saved)");
            }
            for r in &settings.repositories {
                println!("{r}");
            }
        }
        RepoCommand::Remove { url } => {
            if !settings.remove_repository(&url) {
                anyhow::bail!("no such repository: {url}");
            }
            settings.save(path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_workspace(dir: &Path) -> Workspace {
        std::fs::write(dir.join("a.py"), "x = 1\n").unwrap();
        let registry = ContextRegistry::new();
        registry.set(codemaestro::ContextArtifact::new(
            codemaestro::ContextKind::FullRepository,
            codemaestro::context::render_repository(dir, &FileFilter::new(["py"]).unwrap()),
        ));
        Workspace {
            root: dir.to_path_buf(),
            session: Session::new(),
            registry,
            controller: Controller::new(Arc::new(
                provider::stub::StubProvider::new().with_delay(std::time::Duration::ZERO),
            )),
            diff_mode: false,
            base_config: Settings::default().model_config(),
        }
    }

    #[tokio::test]
    async fn ask_with_stub_provider_completes() {
        let dir = tempfile::tempdir().unwrap();
        let ws = stub_workspace(dir.path());
        cmd_ask(&ws, "hello", false).await.unwrap();
        cmd_ask(&ws, "again", true).await.unwrap();

        let turns = ws.session.turns();
        assert_eq!(turns.len(), 2);
        assert!(turns[0].assistant.ends_with("You said: hello\n"));
        assert_eq!(turns[1].status, TurnStatus::Completed);
    }

    #[tokio::test]
    async fn stop_signal_interrupts_the_printed_reply() {
        let dir = tempfile::tempdir().unwrap();
        let mut ws = stub_workspace(dir.path());
        ws.controller = Controller::new(Arc::new(provider::stub::StubProvider::new()));

        let submission = ws.submit("hello").unwrap();
        let status = stream_to_stdout(&ws, submission, std::future::ready(())).await;
        assert_eq!(status, TurnStatus::Interrupted);
        assert_eq!(ws.session.turns()[0].status, TurnStatus::Interrupted);
        assert!(!ws.session.is_busy());
    }

    #[tokio::test]
    async fn reply_completes_when_stop_never_fires() {
        let dir = tempfile::tempdir().unwrap();
        let ws = stub_workspace(dir.path());

        let submission = ws.submit("hello").unwrap();
        let status = stream_to_stdout(&ws, submission, std::future::pending()).await;
        assert_eq!(status, TurnStatus::Completed);
    }

    #[tokio::test]
    async fn diff_mode_without_diff_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let mut ws = stub_workspace(dir.path());
        ws.diff_mode = true;
        let err = cmd_ask(&ws, "hello", false).await.unwrap_err();
        assert!(err.to_string().contains("diff"), "got: {err}");
        assert!(ws.session.is_empty());
    }

    #[test]
    fn repo_list_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        cmd_repo(RepoCommand::Add { url: "https://example.com/r.git".into() }, &path).unwrap();
        assert!(cmd_repo(RepoCommand::Add { url: "https://example.com/r.git".into() }, &path).is_err());

        let saved = Settings::load_or_default(&path).unwrap();
        assert_eq!(saved.repositories, vec!["https://example.com/r.git"]);

        cmd_repo(RepoCommand::Remove { url: "https://example.com/r.git".into() }, &path).unwrap();
        assert!(Settings::load_or_default(&path).unwrap().repositories.is_empty());
    }

    #[test]
    fn stub_provider_needs_no_key() {
        let http = reqwest::Client::new();
        assert!(build_provider(&http, &Settings::default(), "stub").is_ok());
        assert!(build_provider(&http, &Settings::default(), "nope").is_err());
    }
}
