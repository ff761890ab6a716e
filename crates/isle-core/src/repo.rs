//! Source checkouts for the build area.

use crate::command::CommandRunner;
use crate::error::{CoreError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Fetches and removes source checkouts.
#[async_trait]
pub trait RepoFetcher: Send + Sync {
    /// Check out `source` into `<dest_root>/<source>`.
    async fn clone_source(&self, dest_root: &Path, source: &str) -> Result<()>;

    /// Delete the checkout of `source`. Missing checkouts are not an error.
    async fn remove(&self, source: &str) -> Result<()>;
}

/// Reject source locations that could escape the checkout root.
pub fn validate_source(source: &str) -> Result<()> {
    if source.is_empty() {
        return Err(CoreError::InvalidRequest("source location is empty".into()));
    }
    if source.starts_with('/') {
        return Err(CoreError::InvalidRequest(format!(
            "source location must be relative: {source}"
        )));
    }
    for segment in source.split('/') {
        match segment {
            "" => {
                return Err(CoreError::InvalidRequest(format!(
                    "empty path segment in source location: {source}"
                )))
            }
            "." | ".." => {
                return Err(CoreError::InvalidRequest(format!(
                    "relative path segment in source location: {source}"
                )))
            }
            s if s.chars().any(|c| c.is_whitespace() || c.is_control()) => {
                return Err(CoreError::InvalidRequest(format!(
                    "invalid character in source location: {source}"
                )))
            }
            _ => {}
        }
    }
    Ok(())
}

/// [`RepoFetcher`] that clones over HTTPS with `git`.
pub struct GitFetcher {
    root: PathBuf,
    runner: Arc<dyn CommandRunner>,
}

impl GitFetcher {
    /// Create a fetcher whose checkouts live under `root`.
    pub fn new(root: impl Into<PathBuf>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            root: root.into(),
            runner,
        }
    }
}

#[async_trait]
impl RepoFetcher for GitFetcher {
    async fn clone_source(&self, dest_root: &Path, source: &str) -> Result<()> {
        validate_source(source)?;
        let dest = dest_root.join(source);
        let url = format!("https://{source}.git");
        tracing::info!(%url, dest = %dest.display(), "Cloning repository");

        let args = vec![
            "clone".to_string(),
            "--quiet".to_string(),
            url,
            dest.display().to_string(),
        ];
        self.runner
            .run_checked("git", &args)
            .await
            .map_err(|e| CoreError::Repository(e.to_string()))?;
        Ok(())
    }

    async fn remove(&self, source: &str) -> Result<()> {
        validate_source(source)?;
        let path = self.root.join(source);
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "Removed checkout");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CoreError::Repository(format!(
                "failed to remove {}: {e}",
                path.display()
            ))),
        }
    }
}
