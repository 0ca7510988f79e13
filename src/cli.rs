use clap::{Parser, Subcommand};

/// CodeMaestro: ask questions about a repository
#[derive(Debug, Parser)]
#[command(name = "codemaestro")]
#[command(version)]
#[command(about = "Chat with a source repository through Gemini", long_about = None)]
pub struct Args {
    /// Model name
    #[arg(short = 'm', long = "model", global = true)]
    pub model: Option<String>,

    /// Provider (default: config/provider or "google")
    #[arg(long = "provider", global = true)]
    pub provider: Option<String>,

    #[command(flatten)]
    pub context: ContextArgs,

    /// Wait for the whole answer instead of streaming it
    #[arg(long = "no-stream")]
    pub no_stream: bool,

    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// Prompt text (positional) (used when no subcommand is given)
    #[arg(value_name = "PROMPT")]
    pub prompt: Vec<String>,
}

#[derive(Debug, Clone, clap::Args)]
pub struct ContextArgs {
    /// Repository URL to clone, or a local directory to use in place (default: current directory)
    #[arg(long = "repo", global = true)]
    pub repo: Option<String>,

    /// Branch to check out when cloning
    #[arg(long = "branch", global = true, default_value = "default")]
    pub branch: String,

    /// File extensions to include (repeatable or comma-separated; default: config)
    #[arg(short = 'e', long = "ext", global = true, value_delimiter = ',')]
    pub extensions: Vec<String>,

    /// Base ref of the diff to attach
    #[arg(long = "diff-base", value_name = "REF", global = true)]
    pub diff_base: Option<String>,

    /// Head ref of the diff to attach
    #[arg(long = "diff-head", value_name = "REF", global = true)]
    pub diff_head: Option<String>,

    /// Upload the context as a document instead of inlining it
    #[arg(long = "upload", global = true)]
    pub upload: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Interactive chat on stdin; Ctrl-C stops the current answer
    Chat,

    /// Run an interactive terminal chat UI
    #[cfg(feature = "tui")]
    Tui,

    /// Show or change settings
    Config {
        #[command(subcommand)]
        cmd: ConfigCommand,
    },

    /// Manage the saved repository list
    Repo {
        #[command(subcommand)]
        cmd: RepoCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the settings (API key masked)
    Show,
    /// Print the settings file location
    Path,
    /// Set one setting, e.g. `config set temperature 0.5`
    Set { key: String, value: String },
}

#[derive(Debug, Subcommand)]
pub enum RepoCommand {
    /// Save a repository URL
    Add { url: String },
    /// List saved repository URLs
    List,
    /// Forget a repository URL
    Remove { url: String },
}
