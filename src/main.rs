mod app;
mod cli;

#[cfg(feature = "tui")]
mod tui;

use anyhow::Context;
use clap::Parser;
use codemaestro::config::Settings;
use codemaestro::paths;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();

    let config_path = paths::config_path()?;
    let settings = Settings::load_or_default(&config_path)?;
    tracing::debug!(?config_path, ?settings, "resolved config");

    let http = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(std::time::Duration::from_secs(15))
        .build()
        .context("failed to build HTTP client")?;

    match args.cmd {
        Some(cli::Command::Config { cmd }) => return app::cmd_config(cmd, &config_path),
        Some(cli::Command::Repo { cmd }) => return app::cmd_repo(cmd, &config_path),
        Some(cli::Command::Chat) => {
            let ws =
                app::open_workspace(&http, &settings, &args.context, args.model, args.provider)
                    .await?;
            return app::run_chat(ws).await;
        }
        #[cfg(feature = "tui")]
        Some(cli::Command::Tui) => {
            let ws =
                app::open_workspace(&http, &settings, &args.context, args.model, args.provider)
                    .await?;
            return tui::run_tui(ws).await;
        }
        None => {}
    }

    let prompt = args.prompt.join(" ");
    if prompt.trim().is_empty() {
        anyhow::bail!(
            "No prompt provided. Try: codemaestro \"What does this repo do?\" or `codemaestro chat`"
        );
    }

    let ws = app::open_workspace(&http, &settings, &args.context, args.model, args.provider).await?;
    app::cmd_ask(&ws, &prompt, args.no_stream).await
}
