//! Execution pipeline: run a binary inside an ephemeral sandbox.

use crate::address_pool::AddressPool;
use crate::error::{CoreError, Result};
use crate::jail::JailManager;
use crate::params::{Ip4Mode, JailParams};
use crate::sandbox::{SandboxInstance, SandboxState};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Runs a compiled binary inside an already created sandbox.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run `binary` in `sandbox` and return its standard output.
    ///
    /// Any address leased for the run is recorded on `sandbox`; the caller
    /// releases it and destroys the sandbox.
    async fn execute(
        &self,
        sandbox: &mut SandboxInstance,
        binary: &Path,
        wants_address: bool,
    ) -> Result<Vec<u8>>;
}

/// [`Executor`] that starts a jail on the sandbox's dataset.
pub struct JailExecutor {
    jails: Arc<JailManager>,
    pool: Arc<AddressPool>,
}

impl JailExecutor {
    /// Create an executor.
    pub fn new(jails: Arc<JailManager>, pool: Arc<AddressPool>) -> Self {
        Self { jails, pool }
    }

    async fn stage(&self, name: &str, binary: &Path) -> Result<()> {
        let dest = self.jails.config().staged_binary_path(name);
        if let Some(dir) = dest.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| CoreError::filesystem("stage binary", e))?;
        }
        tokio::fs::copy(binary, &dest).await.map_err(|e| {
            CoreError::filesystem("stage binary", format!("{}: {e}", binary.display()))
        })?;
        set_executable(&dest).await?;
        tracing::debug!(sandbox = name, dest = %dest.display(), "Binary staged");
        Ok(())
    }
}

#[cfg(unix)]
async fn set_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o777))
        .await
        .map_err(|e| CoreError::filesystem("chmod binary", e))
}

#[cfg(not(unix))]
async fn set_executable(_path: &Path) -> Result<()> {
    Ok(())
}

#[async_trait]
impl Executor for JailExecutor {
    async fn execute(
        &self,
        sandbox: &mut SandboxInstance,
        binary: &Path,
        wants_address: bool,
    ) -> Result<Vec<u8>> {
        let name = sandbox.name().to_string();
        let config = self.jails.config();
        let start = Instant::now();

        self.stage(&name, binary).await?;

        let ip4 = if wants_address {
            let address = self.pool.allocate(&name)?;
            sandbox.set_lease(address);
            tracing::info!(sandbox = %name, %address, "Address leased");
            Ip4Mode::Leased {
                interface: config.ip4.interface.clone(),
                address,
            }
        } else {
            Ip4Mode::Disabled
        };

        let params = JailParams::builder(&name, sandbox.dataset_path())
            .children_max(config.children_max)
            .exec_timeout(config.exec_timeout())
            .ip4(ip4)
            .command(config.jail_binary_path(&name))
            .build();

        sandbox.set_state(SandboxState::Running);
        let output = self.jails.start(&params).await;
        sandbox.set_state(SandboxState::Stopped);
        let output = output?;

        if !output.success() {
            let stdout = output.stdout_lossy();
            if String::from_utf8_lossy(&output.stderr).contains("timed out") {
                tracing::warn!(sandbox = %name, timeout_secs = config.exec_timeout_secs, "Function timed out");
                return Err(CoreError::Timeout { output: stdout });
            }
            tracing::warn!(
                sandbox = %name,
                code = ?output.code,
                stderr = %String::from_utf8_lossy(&output.stderr),
                "Function failed"
            );
            return Err(CoreError::Runtime {
                code: output.code,
                output: stdout,
            });
        }

        tracing::info!(
            sandbox = %name,
            bytes = output.stdout.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Function executed"
        );
        Ok(output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{format_command, CommandOutput, CommandRunner};
    use crate::config::{HostConfig, Ip4Config};
    use crate::filesystem::Filesystem;
    use std::sync::Mutex;

    struct NoopFs;

    #[async_trait]
    impl Filesystem for NoopFs {
        async fn create_base_dataset(&self) -> Result<()> {
            Ok(())
        }
        async fn clone_base_to_sandbox(&self, _name: &str) -> Result<()> {
            Ok(())
        }
        async fn create_dataset(&self) -> Result<()> {
            Ok(())
        }
        async fn create_snapshot(&self) -> Result<()> {
            Ok(())
        }
        async fn remove_dataset(&self, _name: &str) -> Result<()> {
            Ok(())
        }
    }

    struct ScriptedRunner {
        output: CommandOutput,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(&self, program: &str, args: &[String]) -> std::io::Result<CommandOutput> {
            self.calls.lock().unwrap().push(format_command(program, args));
            Ok(self.output.clone())
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        runner: Arc<ScriptedRunner>,
        pool: Arc<AddressPool>,
        executor: JailExecutor,
        binary: std::path::PathBuf,
        sandbox: SandboxInstance,
    }

    fn fixture(output: CommandOutput, pool_size: u32) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let config = HostConfig::builder()
            .base_dir(dir.path())
            .ip4_range("10.0.0.1", pool_size)
            .build()
            .unwrap();
        let runner = Arc::new(ScriptedRunner {
            output,
            calls: Mutex::new(Vec::new()),
        });
        let pool = Arc::new(
            AddressPool::new(&Ip4Config {
                start_addr: "10.0.0.1".into(),
                range: pool_size,
                ..Default::default()
            })
            .unwrap(),
        );
        let sandbox = SandboxInstance::created("inv", config.sandbox_path("inv"));
        let binary = dir.path().join("bin");
        std::fs::write(&binary, b"\x7fELF").unwrap();

        let jails = Arc::new(JailManager::new(config, Arc::new(NoopFs), runner.clone()));
        Fixture {
            executor: JailExecutor::new(jails, pool.clone()),
            _dir: dir,
            runner,
            pool,
            binary,
            sandbox,
        }
    }

    #[tokio::test]
    async fn test_execute_returns_stdout_and_stages_binary() {
        let mut fx = fixture(CommandOutput::ok("hello"), 2);
        let out = fx
            .executor
            .execute(&mut fx.sandbox, &fx.binary, false)
            .await
            .unwrap();
        assert_eq!(out, b"hello");
        assert_eq!(fx.sandbox.state(), SandboxState::Stopped);
        assert!(fx.sandbox.leased_address().is_none());

        let staged = fx.sandbox.dataset_path().join("tmp").join("inv");
        assert!(staged.exists());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&staged).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o777);
        }

        let calls = fx.runner.calls.lock().unwrap();
        assert!(calls[0].contains("ip4=disable"));
        assert!(calls[0].ends_with("command=/tmp/inv"));
    }

    #[tokio::test]
    async fn test_execute_with_address_records_lease() {
        let mut fx = fixture(CommandOutput::ok(""), 1);
        fx.executor
            .execute(&mut fx.sandbox, &fx.binary, true)
            .await
            .unwrap();

        let address = fx.sandbox.leased_address().expect("lease recorded");
        assert_eq!(fx.pool.available(), 0);
        let calls = fx.runner.calls.lock().unwrap();
        assert!(calls[0].contains(&format!("ip4.addr={address}")));
        assert!(calls[0].contains("interface=em0"));
    }

    #[tokio::test]
    async fn test_exhausted_pool_does_not_start() {
        let mut fx = fixture(CommandOutput::ok(""), 1);
        fx.pool.allocate("someone").unwrap();

        let err = fx
            .executor
            .execute(&mut fx.sandbox, &fx.binary, true)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::AddressExhausted));
        assert!(fx.runner.calls.lock().unwrap().is_empty());
        assert_eq!(fx.sandbox.state(), SandboxState::Created);
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_runtime_error() {
        let mut output = CommandOutput::failed(2, "panic: boom");
        output.stdout = b"partial".to_vec();
        let mut fx = fixture(output, 1);
        match fx.executor.execute(&mut fx.sandbox, &fx.binary, false).await {
            Err(CoreError::Runtime { code, output }) => {
                assert_eq!(code, Some(2));
                assert_eq!(output, "partial");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_is_reported() {
        let output = CommandOutput::failed(1, "jail: inv: command timed out");
        let mut fx = fixture(output, 1);
        let err = fx
            .executor
            .execute(&mut fx.sandbox, &fx.binary, false)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_missing_binary_is_filesystem_error() {
        let mut fx = fixture(CommandOutput::ok(""), 1);
        let missing = fx.binary.with_file_name("nope");
        let err = fx
            .executor
            .execute(&mut fx.sandbox, &missing, false)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Filesystem { .. }));
    }
}
