//! Thin wrapper over the `git` CLI.
//!
//! Shells out via `tokio::process::Command`; every call runs in the given
//! working tree.

use crate::error::ChatError;
use std::path::{Path, PathBuf};
use std::process::Output;

/// Branch name meaning "whatever the remote's HEAD points at".
pub const DEFAULT_BRANCH: &str = "default";

async fn git(dir: &Path, args: &[&str]) -> Result<Output, ChatError> {
    tracing::debug!(?dir, ?args, "git");
    tokio::process::Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .await
        .map_err(|e| ChatError::Git(format!("failed to run git: {e}")))
}

fn check(output: Output, what: &str) -> Result<String, ChatError> {
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ChatError::Git(format!(
            "{what} failed ({}): {}",
            output.status,
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Shallow-clone `url` into `dest`, replacing anything already there.
///
/// `branch` of `None` or [`DEFAULT_BRANCH`] checks out the remote default.
pub async fn clone_repo(url: &str, branch: Option<&str>, dest: &Path) -> Result<PathBuf, ChatError> {
    if tokio::fs::try_exists(dest).await? {
        tracing::info!(?dest, "removing existing clone");
        tokio::fs::remove_dir_all(dest).await?;
    }
    let parent = dest.parent().unwrap_or_else(|| Path::new("."));
    tokio::fs::create_dir_all(parent).await?;

    let dest_str = dest.to_string_lossy();
    let mut args = vec!["clone", "--depth", "1"];
    if let Some(b) = branch.filter(|b| *b != DEFAULT_BRANCH) {
        args.extend(["--branch", b]);
    }
    args.extend([url, &*dest_str]);

    tracing::info!(url, ?branch, "cloning repository");
    check(git(parent, &args).await?, "git clone")?;
    Ok(dest.to_path_buf())
}

pub async fn init_submodules(dir: &Path) -> Result<(), ChatError> {
    tracing::info!(?dir, "initializing submodules");
    check(
        git(dir, &["submodule", "update", "--init", "--recursive"]).await?,
        "git submodule update",
    )?;
    Ok(())
}

pub async fn is_shallow(dir: &Path) -> Result<bool, ChatError> {
    let out = check(
        git(dir, &["rev-parse", "--is-shallow-repository"]).await?,
        "git rev-parse",
    )?;
    Ok(out.trim() == "true")
}

/// Fetch the full history of a shallow clone. No-op on a complete one.
pub async fn unshallow(dir: &Path) -> Result<(), ChatError> {
    if !is_shallow(dir).await? {
        return Ok(());
    }
    tracing::info!(?dir, "fetching full history");
    check(git(dir, &["fetch", "--unshallow"]).await?, "git fetch --unshallow")?;
    Ok(())
}

/// Fetch branch `name` from `origin` into `refs/remotes/origin/<name>`.
pub async fn fetch_ref(dir: &Path, name: &str) -> Result<(), ChatError> {
    let refspec = format!("+refs/heads/{name}:refs/remotes/origin/{name}");
    let out = git(dir, &["fetch", "origin", &refspec]).await?;
    if !out.status.success() {
        let stderr = String::from_utf8_lossy(&out.stderr);
        if stderr.contains("couldn't find remote ref") {
            return Err(ChatError::RefNotFound(name.to_string()));
        }
        return Err(ChatError::Git(format!("git fetch {name} failed: {}", stderr.trim())));
    }
    Ok(())
}

/// Resolve `name` to a commit id, trying `origin/<name>` as a fallback.
pub async fn resolve_ref(dir: &Path, name: &str) -> Result<String, ChatError> {
    for candidate in [name.to_string(), format!("origin/{name}")] {
        let spec = format!("{candidate}^{{commit}}");
        let out = git(dir, &["rev-parse", "--verify", "--quiet", &spec]).await?;
        if out.status.success() {
            return Ok(String::from_utf8_lossy(&out.stdout).trim().to_string());
        }
    }
    Err(ChatError::RefNotFound(name.to_string()))
}

/// Best common ancestor of two commits, or `None` when git finds none.
pub async fn merge_base(dir: &Path, a: &str, b: &str) -> Result<Option<String>, ChatError> {
    let out = git(dir, &["merge-base", a, b]).await?;
    match out.status.code() {
        Some(0) => Ok(Some(String::from_utf8_lossy(&out.stdout).trim().to_string())),
        Some(1) => Ok(None),
        _ => check(out, "git merge-base").map(|_| None),
    }
}

/// Unified diff between two commits, with `a/` and `b/` path prefixes dropped.
pub async fn diff(dir: &Path, from: &str, to: &str) -> Result<String, ChatError> {
    check(git(dir, &["diff", "--no-prefix", from, to]).await?, "git diff")
}
