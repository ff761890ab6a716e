//! Per-invocation coordination.
//!
//! One invocation:
//!
//! 1. Create an ephemeral exec sandbox named after the invocation id.
//! 2. On a forced rebuild, remove the checkout and cached binaries for the
//!    source location.
//! 3. Look up the binary cache.
//! 4. On a miss, check out the source if needed, build, and cache the result.
//! 5. Execute the binary.
//!
//! Steps 2 and 4 run under a per-source lock, since the checkout and the
//! generated entry point are shared by every invocation of that source.
//!
//! The sandbox is destroyed and any address lease released after step 1 on
//! every path, including errors and panics. Each invocation runs on its own
//! task so teardown still completes if the caller stops waiting.

use crate::address_pool::AddressPool;
use crate::build::{Builder, JailBuilder};
use crate::cache::{BinaryCache, BuildKey};
use crate::command::CommandRunner;
use crate::config::{path_exists, HostConfig};
use crate::error::{CoreError, Result};
use crate::execute::{Executor, JailExecutor};
use crate::filesystem::{Filesystem, ZfsFilesystem};
use crate::jail::JailManager;
use crate::repo::{validate_source, GitFetcher, RepoFetcher};
use crate::sandbox::{SandboxId, SandboxInstance};
use crate::source_lock::SourceLocks;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// A request to run `call` against the package at `source`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationRequest {
    /// Import path of the package, e.g. `github.com/org/pkg`.
    pub source: String,
    /// Call expression evaluated in the package, e.g. `Greet()`.
    pub call: String,
    /// Lease an address for the run.
    #[serde(default)]
    pub wants_address: bool,
    /// Re-fetch and rebuild instead of using cached state.
    #[serde(default)]
    pub force_rebuild: bool,
}

impl InvocationRequest {
    /// Create a request with networking disabled and caching enabled.
    pub fn new(source: impl Into<String>, call: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            call: call.into(),
            wants_address: false,
            force_rebuild: false,
        }
    }

    /// Request a leased address.
    pub fn with_address(mut self, wants: bool) -> Self {
        self.wants_address = wants;
        self
    }

    /// Force a fresh checkout and build.
    pub fn with_rebuild(mut self, force: bool) -> Self {
        self.force_rebuild = force;
        self
    }

    /// Reject requests that would never succeed.
    pub fn validate(&self) -> Result<()> {
        validate_source(&self.source)?;
        if self.call.trim().is_empty() {
            return Err(CoreError::InvalidRequest("call expression is empty".into()));
        }
        Ok(())
    }

    fn key(&self) -> BuildKey {
        BuildKey::new(&self.source, &self.call)
    }
}

/// Output of a successful invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationResult {
    /// Invocation id.
    pub id: SandboxId,
    /// Completion time.
    pub timestamp: DateTime<Utc>,
    /// Captured standard output of the function.
    pub output: Vec<u8>,
}

/// Ties the sandbox manager, pipelines, cache and address pool together.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    jails: Arc<JailManager>,
    repo: Arc<dyn RepoFetcher>,
    builder: Arc<dyn Builder>,
    executor: Arc<dyn Executor>,
    cache: Arc<BinaryCache>,
    pool: Arc<AddressPool>,
    locks: SourceLocks,
}

impl Orchestrator {
    /// Create an orchestrator over the given components.
    pub fn new(
        jails: Arc<JailManager>,
        repo: Arc<dyn RepoFetcher>,
        builder: Arc<dyn Builder>,
        executor: Arc<dyn Executor>,
        cache: Arc<BinaryCache>,
        pool: Arc<AddressPool>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                jails,
                repo,
                builder,
                executor,
                cache,
                pool,
                locks: SourceLocks::new(),
            }),
        }
    }

    /// Wire the host-backed components for `config`.
    pub fn from_config(config: HostConfig, runner: Arc<dyn CommandRunner>) -> Result<Self> {
        config.validate()?;
        let pool = Arc::new(AddressPool::new(&config.ip4)?);
        let fs: Arc<dyn Filesystem> = Arc::new(ZfsFilesystem::new(config.clone(), runner.clone()));
        let repo = Arc::new(GitFetcher::new(config.source_root(), runner.clone()));
        let jails = Arc::new(JailManager::new(config, fs, runner));
        let builder = Arc::new(JailBuilder::new(jails.clone()));
        let executor = Arc::new(JailExecutor::new(jails.clone(), pool.clone()));

        Ok(Self::new(
            jails,
            repo,
            builder,
            executor,
            Arc::new(BinaryCache::new()),
            pool,
        ))
    }

    /// Sandbox manager.
    pub fn jails(&self) -> &Arc<JailManager> {
        &self.inner.jails
    }

    /// Binary cache.
    pub fn cache(&self) -> &Arc<BinaryCache> {
        &self.inner.cache
    }

    /// Address pool.
    pub fn pool(&self) -> &Arc<AddressPool> {
        &self.inner.pool
    }

    /// Run one invocation to completion.
    ///
    /// Failures are logged in full and returned as the opaque
    /// [`CoreError::Invocation`]. Requests that fail validation are rejected
    /// with [`CoreError::InvalidRequest`] before anything is created.
    pub async fn invoke(&self, request: InvocationRequest) -> Result<InvocationResult> {
        request.validate()?;
        let id = SandboxId::new();
        let inner = self.inner.clone();

        match tokio::spawn(async move { inner.run(id, request).await }).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(invocation_id = %id, error = %e, "Invocation task failed");
                Err(CoreError::Invocation(id))
            }
        }
    }
}

impl Inner {
    async fn run(&self, id: SandboxId, request: InvocationRequest) -> Result<InvocationResult> {
        let name = id.to_string();
        let start = Instant::now();
        tracing::info!(
            invocation_id = %id,
            source = %request.source,
            call = %request.call,
            wants_address = request.wants_address,
            force_rebuild = request.force_rebuild,
            "Invocation started"
        );

        let mut sandbox = None;
        let outcome = AssertUnwindSafe(self.pipeline(id, &request, &mut sandbox))
            .catch_unwind()
            .await;

        self.cleanup(&name, sandbox).await;

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::error!(invocation_id = %id, "Invocation panicked");
                return Err(CoreError::Invocation(id));
            }
        };

        match outcome {
            Ok(output) => {
                tracing::info!(
                    invocation_id = %id,
                    bytes = output.len(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Invocation complete"
                );
                Ok(InvocationResult {
                    id,
                    timestamp: Utc::now(),
                    output,
                })
            }
            Err(e) => {
                tracing::error!(
                    invocation_id = %id,
                    error = %e,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Invocation failed"
                );
                if let CoreError::Compile { output } | CoreError::Runtime { output, .. } = &e {
                    tracing::debug!(invocation_id = %id, %output, "Captured output");
                }
                Err(CoreError::Invocation(id))
            }
        }
    }

    async fn pipeline(
        &self,
        id: SandboxId,
        request: &InvocationRequest,
        slot: &mut Option<SandboxInstance>,
    ) -> Result<Vec<u8>> {
        let limits = self.jails.config().apply_resource_limits;
        let sandbox = slot.insert(self.jails.create(&id.to_string(), limits).await?);

        let key = request.key();
        let cached = if request.force_rebuild {
            None
        } else {
            self.cache.get(&key)
        };
        let binary = match cached {
            Some(binary) => {
                tracing::debug!(invocation_id = %id, binary = %binary.display(), "Cache hit");
                binary
            }
            None => self.prepare_binary(id, request, key).await?,
        };

        self.executor
            .execute(sandbox, &binary, request.wants_address)
            .await
    }

    /// Bust, fetch and build under the source lock.
    ///
    /// The cache is checked again once the lock is held, since another
    /// invocation may have built the same key while this one waited.
    async fn prepare_binary(
        &self,
        id: SandboxId,
        request: &InvocationRequest,
        key: BuildKey,
    ) -> Result<PathBuf> {
        let _guard = self.locks.acquire(&request.source).await;

        if request.force_rebuild {
            tracing::debug!(invocation_id = %id, source = %request.source, "Forced rebuild");
            self.repo.remove(&request.source).await?;
            self.cache.invalidate_source(&request.source);
        } else if let Some(binary) = self.cache.get(&key) {
            tracing::debug!(invocation_id = %id, binary = %binary.display(), "Built while waiting");
            return Ok(binary);
        }

        let config = self.jails.config();
        if !path_exists(&config.source_path(&request.source)).await {
            tracing::debug!(invocation_id = %id, source = %request.source, "Fetching source");
            self.repo
                .clone_source(&config.source_root(), &request.source)
                .await?;
        }

        let binary = self
            .builder
            .build(&id, &request.source, &request.call)
            .await?;
        self.cache.insert(key, &binary);
        Ok(binary)
    }

    async fn cleanup(&self, name: &str, mut sandbox: Option<SandboxInstance>) {
        // Destroy even if create failed part way; removal is best effort.
        let destroyed = match sandbox.as_mut() {
            Some(sandbox) => self.jails.teardown(sandbox).await,
            None => self.jails.destroy(name).await,
        };
        if let Err(e) = destroyed {
            tracing::warn!(invocation_id = name, error = %e, "Sandbox teardown failed");
        }
        if let Some(address) = sandbox.and_then(|mut s| s.take_lease()) {
            self.pool.release(address);
        }
    }
}
