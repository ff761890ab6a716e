//! Build pipeline: render an entry point and compile it in the build sandbox.
//!
//! All builds share one persistent build area. The generated entry point is
//! scoped to the source location, so two builds of the same source must not
//! overlap. [`JailBuilder`] does not serialize them itself; the orchestrator
//! holds a per-source lock around every build.

use crate::config::HostConfig;
use crate::error::{CoreError, Result};
use crate::jail::JailManager;
use crate::params::{Ip4Mode, JailParams};
use crate::sandbox::SandboxId;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// Produces a binary for a source location and call expression.
#[async_trait]
pub trait Builder: Send + Sync {
    /// Build `call` against `source`, naming the output after `id`.
    async fn build(&self, id: &SandboxId, source: &str, call: &str) -> Result<PathBuf>;
}

/// Package name implied by a source location (its last path segment).
pub fn package_name(source: &str) -> Result<&str> {
    source
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CoreError::Render(format!("no package name in {source:?}")))
}

/// Render the generated entry point.
pub fn render_entry_point(import_path: &str, package: &str, call: &str) -> Result<String> {
    if call.trim().is_empty() {
        return Err(CoreError::Render("call expression is empty".into()));
    }
    if call.contains('\n') {
        return Err(CoreError::Render(
            "call expression must be a single line".into(),
        ));
    }
    Ok(format!(
        r#"// generated by isle
// DO NOT EDIT

package main

import (
	"fmt"

	"{import_path}"
)

func main() {{
	fmt.Print({package}.{call})
}}
"#
    ))
}

/// [`Builder`] that compiles inside the shared build sandbox.
pub struct JailBuilder {
    jails: Arc<JailManager>,
}

impl JailBuilder {
    /// Create a builder that runs the compiler through `jails`.
    pub fn new(jails: Arc<JailManager>) -> Self {
        Self { jails }
    }

    fn config(&self) -> &HostConfig {
        self.jails.config()
    }

    async fn write_entry_point(&self, source: &str, call: &str) -> Result<()> {
        let package = package_name(source)?;
        let code = render_entry_point(source, package, call)?;
        let path = self.config().entry_point_path(source);
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| CoreError::Render(format!("{}: {e}", dir.display())))?;
        }
        tokio::fs::write(&path, code)
            .await
            .map_err(|e| CoreError::Render(format!("{}: {e}", path.display())))?;
        tracing::debug!(path = %path.display(), package, "Rendered entry point");
        Ok(())
    }

    fn compile_params(&self, id: &str, source: &str) -> JailParams {
        let config = self.config();
        JailParams::builder(id, config.build_path())
            .hostname("build")
            .ip4(Ip4Mode::Disabled)
            .exec_timeout(config.build_timeout())
            .command(config.compiler_path.as_str())
            .arg("build")
            .arg("-o")
            .arg(config.jail_binary_path(id))
            .arg("-v")
            .arg(format!("{source}/cmd"))
            .build()
    }
}

#[async_trait]
impl Builder for JailBuilder {
    async fn build(&self, id: &SandboxId, source: &str, call: &str) -> Result<PathBuf> {
        let id = id.to_string();
        let start = Instant::now();

        self.write_entry_point(source, call).await?;

        let output = self.jails.start(&self.compile_params(&id, source)).await?;
        if !output.success() {
            let compiler_output = output.combined_lossy();
            tracing::error!(
                invocation_id = %id,
                source,
                code = ?output.code,
                output = %compiler_output,
                "Compile failed"
            );
            return Err(CoreError::Compile {
                output: compiler_output,
            });
        }

        tracing::info!(
            invocation_id = %id,
            source,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Build complete"
        );
        Ok(self.config().build_output_path(&id))
    }
}
