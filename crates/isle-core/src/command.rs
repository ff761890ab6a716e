//! External command execution.
//!
//! Every host tool the core drives (`jail`, `jls`, `zfs`, `git`) goes through
//! [`CommandRunner`], so the jail manager and both pipelines can be exercised
//! without a jail-capable host.

use crate::error::CoreError;
use async_trait::async_trait;
use tokio::process::Command;
use tracing::trace;

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if the process was killed by a signal.
    pub code: Option<i32>,
    /// Standard output.
    pub stdout: Vec<u8>,
    /// Standard error.
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    /// Successful output with the given stdout.
    pub fn ok(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: Vec::new(),
        }
    }

    /// Failed output with the given exit code and stderr.
    pub fn failed(code: i32, stderr: impl Into<Vec<u8>>) -> Self {
        Self {
            code: Some(code),
            stdout: Vec::new(),
            stderr: stderr.into(),
        }
    }

    /// Check if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Stdout followed by stderr.
    pub fn combined(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.stdout.len() + self.stderr.len());
        out.extend_from_slice(&self.stdout);
        out.extend_from_slice(&self.stderr);
        out
    }

    /// Combined output as lossy UTF-8.
    pub fn combined_lossy(&self) -> String {
        String::from_utf8_lossy(&self.combined()).into_owned()
    }

    /// Stdout as lossy UTF-8.
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// Runs external programs and captures their output.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args` to completion.
    ///
    /// Returns `Err` only if the process could not be spawned; a non-zero
    /// exit is reported through [`CommandOutput::code`].
    async fn run(&self, program: &str, args: &[String]) -> std::io::Result<CommandOutput>;

    /// Run and require a zero exit status.
    async fn run_checked(&self, program: &str, args: &[String]) -> Result<CommandOutput, CoreError> {
        let output = self.run(program, args).await.map_err(|e| CoreError::Command {
            command: format_command(program, args),
            detail: e.to_string(),
        })?;
        if !output.success() {
            return Err(CoreError::Command {
                command: format_command(program, args),
                detail: output.combined_lossy().trim().to_string(),
            });
        }
        Ok(output)
    }
}

/// [`CommandRunner`] backed by `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[String]) -> std::io::Result<CommandOutput> {
        trace!(command = %format_command(program, args), "exec");
        let output = Command::new(program).args(args).output().await?;
        Ok(CommandOutput {
            code: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

/// Human-readable command line for logs and errors.
pub fn format_command(program: &str, args: &[String]) -> String {
    let mut parts = Vec::with_capacity(args.len() + 1);
    parts.push(program);
    parts.extend(args.iter().map(String::as_str));
    parts.join(" ")
}

/// Convert string literals into an owned argument vector.
pub(crate) fn args<const N: usize>(items: [&str; N]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
