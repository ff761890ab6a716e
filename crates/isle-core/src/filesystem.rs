//! Dataset management for sandbox roots.

use crate::command::{args, CommandRunner};
use crate::config::HostConfig;
use crate::error::{CoreError, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Volume operations the jail manager relies on.
#[async_trait]
pub trait Filesystem: Send + Sync {
    /// Create the jails dataset mounted at the configured base directory.
    async fn create_base_dataset(&self) -> Result<()>;

    /// Clone the base snapshot into a dataset for `name`.
    async fn clone_base_to_sandbox(&self, name: &str) -> Result<()>;

    /// Create the dataset holding the base release.
    async fn create_dataset(&self) -> Result<()>;

    /// Snapshot the base release.
    async fn create_snapshot(&self) -> Result<()>;

    /// Destroy the dataset backing `name`, including its snapshots.
    async fn remove_dataset(&self, name: &str) -> Result<()>;
}

/// [`Filesystem`] implemented with the `zfs` tool.
pub struct ZfsFilesystem {
    config: HostConfig,
    runner: Arc<dyn CommandRunner>,
}

impl ZfsFilesystem {
    /// Create a ZFS-backed filesystem service.
    pub fn new(config: HostConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self { config, runner }
    }

    async fn zfs(&self, op: &'static str, zfs_args: Vec<String>) -> Result<()> {
        self.runner
            .run_checked("zfs", &zfs_args)
            .await
            .map(|_| ())
            .map_err(|e| match e {
                CoreError::Command { detail, .. } => CoreError::filesystem(op, detail),
                other => other,
            })
    }
}

#[async_trait]
impl Filesystem for ZfsFilesystem {
    async fn create_base_dataset(&self) -> Result<()> {
        let mountpoint = format!("mountpoint={}", self.config.base_dir.display());
        tracing::debug!(dataset = %self.config.zfs_dataset, %mountpoint, "Creating base dataset");
        self.zfs(
            "create base dataset",
            vec![
                "create".into(),
                "-o".into(),
                mountpoint,
                format!("{}/jails", self.config.zfs_dataset),
            ],
        )
        .await
    }

    async fn clone_base_to_sandbox(&self, name: &str) -> Result<()> {
        let snapshot = self.config.base_snapshot();
        let dataset = self.config.sandbox_dataset(name);
        tracing::debug!(%snapshot, %dataset, "Cloning base image");
        self.zfs("clone", vec!["clone".into(), snapshot, dataset]).await
    }

    async fn create_dataset(&self) -> Result<()> {
        let dataset = self.config.release_dataset();
        tracing::debug!(%dataset, "Creating release dataset");
        self.zfs("create dataset", vec!["create".into(), "-p".into(), dataset])
            .await
    }

    async fn create_snapshot(&self) -> Result<()> {
        let snapshot = self.config.base_snapshot();
        tracing::debug!(%snapshot, "Snapshotting base image");
        self.zfs("snapshot", vec!["snapshot".into(), snapshot]).await
    }

    async fn remove_dataset(&self, name: &str) -> Result<()> {
        let dataset = self.config.sandbox_dataset(name);
        tracing::debug!(%dataset, "Destroying dataset");
        let mut zfs_args = args(["destroy", "-rf"]);
        zfs_args.push(dataset);
        self.zfs("remove dataset", zfs_args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandOutput;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl CommandRunner for Recorder {
        async fn run(&self, program: &str, args: &[String]) -> std::io::Result<CommandOutput> {
            self.calls
                .lock()
                .unwrap()
                .push(crate::command::format_command(program, args));
            if self.fail {
                Ok(CommandOutput::failed(1, "dataset is busy"))
            } else {
                Ok(CommandOutput::ok(""))
            }
        }
    }

    fn config() -> HostConfig {
        HostConfig::builder()
            .zfs_dataset("zroot")
            .release("11.1-RELEASE")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_clone_uses_base_snapshot() {
        let runner = Arc::new(Recorder::default());
        let fs = ZfsFilesystem::new(config(), runner.clone());
        fs.clone_base_to_sandbox("abc").await.unwrap();
        assert_eq!(
            runner.calls.lock().unwrap().as_slice(),
            ["zfs clone zroot/jails/releases/11.1-RELEASE@p1 zroot/jails/abc"]
        );
    }

    #[tokio::test]
    async fn test_remove_is_recursive_and_forced() {
        let runner = Arc::new(Recorder::default());
        let fs = ZfsFilesystem::new(config(), runner.clone());
        fs.remove_dataset("abc").await.unwrap();
        assert_eq!(
            runner.calls.lock().unwrap().as_slice(),
            ["zfs destroy -rf zroot/jails/abc"]
        );
    }

    #[tokio::test]
    async fn test_failure_maps_to_filesystem_error() {
        let runner = Arc::new(Recorder {
            fail: true,
            ..Default::default()
        });
        let fs = ZfsFilesystem::new(config(), runner);
        let err = fs.remove_dataset("abc").await.unwrap_err();
        match err {
            CoreError::Filesystem { op, detail } => {
                assert_eq!(op, "remove dataset");
                assert_eq!(detail, "dataset is busy");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
