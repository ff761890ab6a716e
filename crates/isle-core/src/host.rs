//! One-time host preparation.
//!
//! Assumes the base release has already been extracted under
//! [`HostConfig::release_path`] with the compiler installed. Downloading the
//! OS and toolchain is left to the operator.

use crate::config::{path_exists, HostConfig, BUILD_SANDBOX, MONITORING_SANDBOX};
use crate::error::{CoreError, Result};
use crate::filesystem::Filesystem;
use crate::jail::JailManager;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Prepares datasets, the base image and the persistent sandboxes.
pub struct HostInitializer {
    jails: Arc<JailManager>,
    fs: Arc<dyn Filesystem>,
    host_etc: PathBuf,
}

impl HostInitializer {
    /// Create an initializer that copies host files from `/etc`.
    pub fn new(jails: Arc<JailManager>, fs: Arc<dyn Filesystem>) -> Self {
        Self {
            jails,
            fs,
            host_etc: PathBuf::from("/etc"),
        }
    }

    /// Read host files from `dir` instead of `/etc`.
    pub fn with_host_etc(mut self, dir: impl Into<PathBuf>) -> Self {
        self.host_etc = dir.into();
        self
    }

    fn config(&self) -> &HostConfig {
        self.jails.config()
    }

    /// Run every initialization step in order.
    pub async fn initialize(&self) -> Result<()> {
        if !path_exists(&self.config().base_dir).await {
            tracing::info!(mountpoint = %self.config().base_dir.display(), "Creating jails dataset");
            self.fs.create_base_dataset().await?;
        }

        tracing::info!(dataset = %self.config().release_dataset(), "Creating release dataset");
        self.fs.create_dataset().await?;

        tracing::info!("Configuring base image");
        self.configure_base_image().await?;

        tracing::info!(snapshot = %self.config().base_snapshot(), "Snapshotting base image");
        self.fs.create_snapshot().await?;

        tracing::info!("Creating build sandbox");
        self.jails.create(BUILD_SANDBOX, false).await?;

        tracing::info!("Creating monitoring sandbox");
        self.jails.create(MONITORING_SANDBOX, false).await?;

        tracing::info!("Host initialized");
        Ok(())
    }

    /// Write resolv.conf and localtime and lay out the compiler workspace.
    pub async fn configure_base_image(&self) -> Result<()> {
        let release = self.config().release_path();
        let etc = release.join("etc");
        create_dir(&etc).await?;

        let resolv = etc.join("resolv.conf");
        let dns = &self.config().ip4.dns;
        if dns.is_empty() {
            copy_file(&self.host_etc.join("resolv.conf"), &resolv).await?;
        } else {
            let contents: String = dns
                .iter()
                .map(|server| format!("nameserver {server}\n"))
                .collect();
            tokio::fs::write(&resolv, contents)
                .await
                .map_err(|e| CoreError::filesystem("write resolv.conf", e))?;
        }

        copy_file(&self.host_etc.join("localtime"), &etc.join("localtime")).await?;

        for dir in ["src", "bin", "pkg"] {
            create_dir(&release.join("root").join("go").join(dir)).await?;
        }
        Ok(())
    }
}

async fn create_dir(path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| CoreError::filesystem("create directory", format!("{}: {e}", path.display())))
}

async fn copy_file(from: &Path, to: &Path) -> Result<()> {
    tokio::fs::copy(from, to).await.map(|_| ()).map_err(|e| {
        CoreError::filesystem(
            "copy host file",
            format!("{} -> {}: {e}", from.display(), to.display()),
        )
    })
}
