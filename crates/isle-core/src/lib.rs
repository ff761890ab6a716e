//! # isle-core
//!
//! Per-invocation orchestration for the isle function runner.
//!
//! Given a Go package location and a call expression, isle checks the
//! package out into a shared build jail, compiles a generated entry point
//! that prints the call's result, and runs the binary in a fresh jail cloned
//! from the base image. The jail is torn down on every exit path.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                       Orchestrator                         │
//! │   create ─▶ [cache-bust] ─▶ cache? ─▶ fetch/build ─▶ exec  │
//! │      └───────────────── destroy + release ◀────────────┘   │
//! └───────┬──────────────┬──────────────┬──────────────┬───────┘
//!         │              │              │              │
//!         ▼              ▼              ▼              ▼
//!  ┌─────────────┐ ┌───────────┐ ┌─────────────┐ ┌─────────────┐
//!  │ JailManager │ │BinaryCache│ │ JailBuilder │ │JailExecutor │
//!  │  zfs clone  │ └───────────┘ │ shared build│ │ AddressPool │
//!  │  jail / jls │               │    jail     │ │  lease      │
//!  └─────────────┘               └─────────────┘ └─────────────┘
//! ```
//!
//! Host tools are driven through [`CommandRunner`] and datasets through
//! [`Filesystem`], so every component can be exercised without a jail host.
//!
//! ## Quick Start
//!
//! ```ignore
//! use isle_core::{HostConfig, InvocationRequest, Orchestrator, SystemRunner};
//! use std::sync::Arc;
//!
//! # async fn example() -> isle_core::Result<()> {
//! let config = HostConfig::builder()
//!     .base_dir("/zroot/jails")
//!     .zfs_dataset("zroot")
//!     .release("11.1-RELEASE")
//!     .build()?;
//!
//! let orchestrator = Orchestrator::from_config(config, Arc::new(SystemRunner))?;
//! let result = orchestrator
//!     .invoke(InvocationRequest::new("github.com/example/greet", "Hello()"))
//!     .await?;
//! println!("{}", String::from_utf8_lossy(&result.output));
//! # Ok(())
//! # }
//! ```

mod address_pool;
mod build;
mod cache;
mod command;
mod config;
mod error;
mod execute;
mod filesystem;
mod host;
mod jail;
mod orchestrator;
mod params;
mod repo;
mod sandbox;
mod source_lock;

pub use address_pool::{AddressPool, AddressState, PoolStats};
pub use build::{package_name, render_entry_point, Builder, JailBuilder};
pub use cache::{BinaryCache, BuildKey};
pub use command::{format_command, CommandOutput, CommandRunner, SystemRunner};
pub use config::{HostConfig, HostConfigBuilder, Ip4Config, BUILD_SANDBOX, MONITORING_SANDBOX};
pub use error::{CoreError, Result};
pub use execute::{Executor, JailExecutor};
pub use filesystem::{Filesystem, ZfsFilesystem};
pub use host::HostInitializer;
pub use jail::{parse_listing, JailManager, SandboxListing};
pub use orchestrator::{InvocationRequest, InvocationResult, Orchestrator};
pub use params::{Ip4Mode, JailParams, JailParamsBuilder};
pub use repo::{validate_source, GitFetcher, RepoFetcher};
pub use sandbox::{SandboxId, SandboxInstance, SandboxKind, SandboxState};
