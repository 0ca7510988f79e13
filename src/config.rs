use crate::context::FileFilter;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const MODEL_OPTIONS: &[&str] = &["gemini-1.5-pro-latest", "gemini-1.5-flash-latest"];
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash-latest";
pub const FILE_EXTENSION_OPTIONS: &[&str] = &["py", "js", "ts", "tsx", "json"];

pub const DEFAULT_TEMPERATURE: f32 = 0.3;
pub const DEFAULT_TOP_P: f32 = 1.0;
pub const DEFAULT_TOP_K: u32 = 32;
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 8192;
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

/// Every harm category is sent with this threshold.
pub const SAFETY_THRESHOLD: &str = "BLOCK_NONE";

pub const DEFAULT_SYSTEM_MESSAGE: &str = "You are an expert software engineer helping a user \
understand and change the repository whose source is attached. Answer precisely, cite the file \
paths you rely on, and say so when the attached code does not contain the answer.";

/// User settings persisted as `config.toml`.
///
/// Only user-editable values live here; uploaded document handles and
/// session flags are never written.
#[derive(Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Settings {
    pub api_key: Option<String>,

    /// Default model (optional)
    pub model: Option<String>,

    /// Provider identifier: "google" or "stub".
    pub provider: Option<String>,

    pub temperature: Option<f32>,

    pub system_message: Option<String>,

    pub file_extensions: Option<Vec<String>>,

    pub max_output_tokens: Option<u32>,

    /// Upload built contexts as documents instead of inlining them.
    pub upload_context: Option<bool>,

    /// Saved repository URLs to pick from.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub repositories: Vec<String>,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("provider", &self.provider)
            .field("temperature", &self.temperature)
            .field("file_extensions", &self.file_extensions)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("upload_context", &self.upload_context)
            .field("repositories", &self.repositories)
            .finish_non_exhaustive()
    }
}

impl Settings {
    /// Load config if the file exists, otherwise return Ok(None).
    pub fn load_optional(path: impl AsRef<Path>) -> anyhow::Result<Option<Self>> {
        let path = path.as_ref();
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(anyhow::Error::new(e))
                    .with_context(|| format!("failed to read config: {}", path.display()))
            }
        };

        let s = String::from_utf8(bytes).context("config is not valid UTF-8")?;
        let cfg: Settings = toml::from_str(&s)
            .with_context(|| format!("failed to parse TOML: {}", path.display()))?;
        Ok(Some(cfg))
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        Ok(Self::load_optional(path)?.unwrap_or_default())
    }

    /// Write via a temp file and rename so readers never see a torn file.
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create config directory: {}", dir.display()))?;

        let tmp = tmp_path(path);
        let text = toml::to_string_pretty(self).context("failed to serialize config")?;
        std::fs::write(&tmp, text)
            .with_context(|| format!("failed to write temp config: {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("failed to move config into place: {}", path.display()))?;
        Ok(())
    }

    /// Update one setting from its textual form, as given on the command line.
    pub fn set_key(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        let value = value.trim();
        match key {
            "api_key" => self.api_key = non_empty(value),
            "model" => {
                if !MODEL_OPTIONS.contains(&value) {
                    tracing::warn!(model = value, known = ?MODEL_OPTIONS, "unrecognized model name");
                }
                self.model = non_empty(value);
            }
            "provider" => self.provider = non_empty(value),
            "temperature" => {
                let t: f32 = value
                    .parse()
                    .with_context(|| format!("temperature must be a number, got {value:?}"))?;
                if !(0.0..=1.0).contains(&t) {
                    anyhow::bail!("temperature must be between 0 and 1, got {t}");
                }
                self.temperature = Some(t);
            }
            "system_message" => self.system_message = non_empty(value),
            "file_extensions" => {
                let exts: Vec<String> = value
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                FileFilter::new(&exts)?;
                self.file_extensions = Some(exts);
            }
            "max_output_tokens" => {
                let n: u32 = value
                    .parse()
                    .with_context(|| format!("max_output_tokens must be a positive integer, got {value:?}"))?;
                if n == 0 {
                    anyhow::bail!("max_output_tokens must be greater than 0");
                }
                self.max_output_tokens = Some(n);
            }
            "upload_context" => {
                let b: bool = value
                    .parse()
                    .with_context(|| format!("upload_context must be true or false, got {value:?}"))?;
                self.upload_context = Some(b);
            }
            other => anyhow::bail!("unknown setting: {other}"),
        }
        Ok(())
    }

    /// Returns false if the URL was already saved.
    pub fn add_repository(&mut self, url: &str) -> bool {
        let url = url.trim();
        if url.is_empty() || self.repositories.iter().any(|r| r == url) {
            return false;
        }
        self.repositories.push(url.to_string());
        true
    }

    pub fn remove_repository(&mut self, url: &str) -> bool {
        let before = self.repositories.len();
        self.repositories.retain(|r| r != url.trim());
        self.repositories.len() != before
    }

    pub fn file_filter(&self) -> anyhow::Result<FileFilter> {
        match &self.file_extensions {
            Some(exts) => FileFilter::new(exts),
            None => FileFilter::new(FILE_EXTENSION_OPTIONS),
        }
    }

    /// TOML rendering with the API key masked.
    pub fn to_redacted_toml(&self) -> anyhow::Result<String> {
        let mut shown = self.clone();
        if shown.api_key.is_some() {
            shown.api_key = Some("<redacted>".to_string());
        }
        toml::to_string_pretty(&shown).context("failed to serialize config")
    }

    /// Snapshot of the generation parameters for one request.
    pub fn model_config(&self) -> ModelConfig {
        ModelConfig {
            api_key: self.api_key.clone(),
            model: self.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            temperature: self.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            top_p: DEFAULT_TOP_P,
            top_k: DEFAULT_TOP_K,
            max_output_tokens: self.max_output_tokens.unwrap_or(DEFAULT_MAX_OUTPUT_TOKENS),
            system_instruction: self
                .system_message
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_MESSAGE.to_string()),
            safety_threshold: SAFETY_THRESHOLD.to_string(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Generation parameters frozen for the lifetime of one request.
#[derive(Clone, PartialEq)]
pub struct ModelConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
    pub system_instruction: String,
    pub safety_threshold: String,

    /// Streaming only: longest wait for the response headers or the next chunk.
    pub idle_timeout: Duration,

    /// One-shot generation only: deadline for the whole reply, which the
    /// service sends in one piece after generating it.
    pub request_timeout: Duration,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Settings::default().model_config()
    }
}

impl fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("top_p", &self.top_p)
            .field("top_k", &self.top_k)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("safety_threshold", &self.safety_threshold)
            .field("idle_timeout", &self.idle_timeout)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut p = path.to_path_buf();
    let file = path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "config.toml".to_string());
    p.set_file_name(format!("{file}.tmp"));
    p
}
