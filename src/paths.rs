use anyhow::Context;
use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "codemaestro";

#[derive(Debug, Clone, Copy)]
enum DirKind {
    Config,
    State,
}

impl DirKind {
    fn xdg_var(self) -> &'static str {
        match self {
            DirKind::Config => "XDG_CONFIG_HOME",
            DirKind::State => "XDG_STATE_HOME",
        }
    }

    fn home_fallback(self) -> &'static [&'static str] {
        match self {
            DirKind::Config => &[".config"],
            DirKind::State => &[".local", "state"],
        }
    }

    fn override_subdir(self) -> &'static str {
        match self {
            DirKind::Config => "config",
            DirKind::State => "state",
        }
    }
}

/// CODEMAESTRO_HOME wins, then the XDG variable, then a directory under HOME.
fn pick_dir(
    kind: DirKind,
    maestro_home: Option<OsString>,
    xdg: Option<OsString>,
    home: Option<OsString>,
) -> anyhow::Result<PathBuf> {
    if let Some(base) = maestro_home {
        return Ok(PathBuf::from(base).join(kind.override_subdir()));
    }
    if let Some(xdg) = xdg.filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(xdg).join(APP_DIR));
    }
    let mut dir = PathBuf::from(home.context("HOME is not set")?);
    dir.extend(kind.home_fallback());
    Ok(dir.join(APP_DIR))
}

fn ensure_dir(path: &Path) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(path)
        .with_context(|| format!("failed to create directory: {}", path.display()))?;
    Ok(path.to_path_buf())
}

fn resolve(kind: DirKind) -> anyhow::Result<PathBuf> {
    let dir = pick_dir(
        kind,
        env::var_os("CODEMAESTRO_HOME"),
        env::var_os(kind.xdg_var()),
        env::var_os("HOME"),
    )?;
    ensure_dir(&dir)
}

pub fn config_dir() -> anyhow::Result<PathBuf> {
    resolve(DirKind::Config)
}

pub fn state_dir() -> anyhow::Result<PathBuf> {
    resolve(DirKind::State)
}

pub fn config_path() -> anyhow::Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

/// Where remote repositories are cloned. Only one clone is kept at a time.
pub fn code_base_dir() -> anyhow::Result<PathBuf> {
    Ok(state_dir()?.join("code_base"))
}
