//! Error types for isle-core.

use crate::SandboxId;
use std::net::Ipv4Addr;
use thiserror::Error;

/// Result type alias for isle-core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur while provisioning, building or running functions.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Invalid configuration (bad start address, bad range, missing paths).
    #[error("configuration error: {0}")]
    Config(String),

    /// Every address in the pool is leased.
    #[error("no addresses available")]
    AddressExhausted,

    /// Address is not a member of the pool.
    #[error("unknown address: {0}")]
    UnknownAddress(Ipv4Addr),

    /// Dataset clone/remove or file staging failed.
    #[error("filesystem error during {op}: {detail}")]
    Filesystem {
        /// Operation that failed
        op: &'static str,
        /// Underlying error or tool output
        detail: String,
    },

    /// A host command exited unsuccessfully.
    #[error("command failed: {command}: {detail}")]
    Command {
        /// Command line that was run
        command: String,
        /// Captured output
        detail: String,
    },

    /// Compiler exited non-zero.
    #[error("compile failed")]
    Compile {
        /// Combined compiler output
        output: String,
    },

    /// The function exited non-zero.
    #[error("function exited with {code:?}")]
    Runtime {
        /// Exit code, if the process was not killed by a signal
        code: Option<i32>,
        /// Captured standard output
        output: String,
    },

    /// The jail's exec timeout fired.
    #[error("execution timed out")]
    Timeout {
        /// Output captured before the process was killed
        output: String,
    },

    /// No running sandbox with the given host id.
    #[error("sandbox {0} not found")]
    NotFound(i32),

    /// Sandbox listing output could not be parsed.
    #[error("malformed sandbox listing: {0}")]
    ListingParse(String),

    /// Entry point could not be written.
    #[error("render failed: {0}")]
    Render(String),

    /// Repository fetch or removal failed.
    #[error("repository error: {0}")]
    Repository(String),

    /// Request rejected before any resource was acquired.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Opaque failure returned to invocation callers.
    #[error("invocation {0} failed")]
    Invocation(SandboxId),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    pub(crate) fn filesystem(op: &'static str, detail: impl ToString) -> Self {
        Self::Filesystem {
            op,
            detail: detail.to_string(),
        }
    }

    /// Whether this error should be reported as a missing resource.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::UnknownAddress(_))
    }
}
