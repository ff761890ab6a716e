//! Sandbox lifecycle management on top of FreeBSD jails.
//!
//! A sandbox is a ZFS clone of the base release with its hostname written
//! into `etc/rc.conf`. Jails are created and started in one step with
//! `jail -c` (see [`JailParams`]), stopped with `jail -r`, and listed with
//! `jls -s`. The manager keeps no registry of its own: every listing is read
//! fresh from the host.

use crate::command::{args, CommandOutput, CommandRunner};
use crate::config::HostConfig;
use crate::error::{CoreError, Result};
use crate::filesystem::Filesystem;
use crate::params::JailParams;
use crate::sandbox::{SandboxInstance, SandboxState};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// A running jail as reported by `jls -s`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxListing {
    /// `host` parameter (`new`, `inherit`, ...).
    pub host: String,
    /// IPv4 addresses.
    pub ip4: String,
    /// IPv6 addresses.
    pub ip6: String,
    /// Numeric jail id.
    pub jid: i32,
    /// Jail name.
    pub name: String,
    /// OS release reported inside the jail.
    pub os_release: String,
    /// Root path.
    pub path: String,
    /// Hostname.
    pub hostname: String,
}

impl SandboxListing {
    /// Parse one `jls -s` line of whitespace-separated `key=value` pairs.
    ///
    /// Parameters this type does not model are skipped, including bare
    /// boolean flags. A known key without a value, a non-numeric `jid`, or a
    /// line with no `jid` at all is rejected.
    pub fn parse(line: &str) -> Result<Self> {
        let mut listing = Self::default();
        let mut saw_jid = false;

        for token in line.split_whitespace() {
            let (key, value) = match token.split_once('=') {
                Some((key, value)) => (key, unquote(value)),
                None => {
                    if is_known_key(token) {
                        return Err(CoreError::ListingParse(format!(
                            "missing value for {token:?} in {line:?}"
                        )));
                    }
                    continue;
                }
            };

            match key {
                "host" => listing.host = value.to_string(),
                "ip4" | "ip4.addr" => listing.ip4 = value.to_string(),
                "ip6" | "ip6.addr" => listing.ip6 = value.to_string(),
                "jid" => {
                    listing.jid = value.parse().map_err(|_| {
                        CoreError::ListingParse(format!("bad jid {value:?} in {line:?}"))
                    })?;
                    saw_jid = true;
                }
                "name" => listing.name = value.to_string(),
                "osrelease" => listing.os_release = value.to_string(),
                "path" => listing.path = value.to_string(),
                "host.hostname" => listing.hostname = value.to_string(),
                _ => {}
            }
        }

        if !saw_jid {
            return Err(CoreError::ListingParse(format!("no jid in {line:?}")));
        }
        Ok(listing)
    }
}

fn is_known_key(key: &str) -> bool {
    matches!(
        key,
        "host"
            | "ip4"
            | "ip4.addr"
            | "ip6"
            | "ip6.addr"
            | "jid"
            | "name"
            | "osrelease"
            | "path"
            | "host.hostname"
    )
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

/// Parse the full output of `jls -s`. Blank lines are ignored.
pub fn parse_listing(output: &str) -> Result<Vec<SandboxListing>> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(SandboxListing::parse)
        .collect()
}

/// Creates, starts, stops, lists and destroys sandboxes.
pub struct JailManager {
    config: HostConfig,
    fs: Arc<dyn Filesystem>,
    runner: Arc<dyn CommandRunner>,
}

impl JailManager {
    /// Create a manager over the given collaborators.
    pub fn new(
        config: HostConfig,
        fs: Arc<dyn Filesystem>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self { config, fs, runner }
    }

    /// Host configuration.
    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Clone the base image for `name` and write its hostname.
    pub async fn create(&self, name: &str, apply_limits: bool) -> Result<SandboxInstance> {
        let start = Instant::now();
        tracing::debug!(sandbox = name, apply_limits, "Creating sandbox");

        self.fs.clone_base_to_sandbox(name).await?;

        let rc_conf = self.config.rc_conf_path(name);
        tokio::fs::write(&rc_conf, format!("hostname=\"{name}\""))
            .await
            .map_err(|e| {
                tracing::error!(sandbox = name, path = %rc_conf.display(), error = %e, "Failed to write rc.conf");
                CoreError::filesystem("write rc.conf", e)
            })?;

        if apply_limits {
            self.apply_resource_limits(name).await?;
        }

        tracing::info!(
            sandbox = name,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Sandbox created"
        );
        Ok(SandboxInstance::created(
            name,
            self.config.sandbox_path(name),
        ))
    }

    /// Resource limit hook. Limits are host specific and none are applied.
    async fn apply_resource_limits(&self, name: &str) -> Result<()> {
        tracing::trace!(sandbox = name, "No resource limits configured");
        Ok(())
    }

    /// Remove the dataset backing `name`.
    ///
    /// Safe to call for a sandbox that was never started or only partially
    /// created.
    pub async fn destroy(&self, name: &str) -> Result<()> {
        let start = Instant::now();
        self.fs.remove_dataset(name).await.map_err(|e| {
            tracing::error!(sandbox = name, error = %e, "Failed to destroy sandbox");
            e
        })?;
        tracing::info!(
            sandbox = name,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Sandbox destroyed"
        );
        Ok(())
    }

    /// Destroy a sandbox this manager created and mark it absent.
    pub async fn teardown(&self, sandbox: &mut SandboxInstance) -> Result<()> {
        self.destroy(sandbox.name()).await?;
        sandbox.set_state(SandboxState::Absent);
        Ok(())
    }

    /// Create and run a jail, returning the command's output.
    ///
    /// A non-zero exit is not an error here; callers interpret the output.
    pub async fn start(&self, params: &JailParams) -> Result<CommandOutput> {
        let jail_args = params.to_args();
        tracing::debug!(sandbox = params.name(), "Starting jail");
        let output = self.runner.run("jail", &jail_args).await.map_err(|e| {
            CoreError::Command {
                command: crate::command::format_command("jail", &jail_args),
                detail: e.to_string(),
            }
        })?;
        tracing::debug!(sandbox = params.name(), code = ?output.code, "Jail exited");
        Ok(output)
    }

    /// Stop the running jail with host id `jid`.
    pub async fn stop(&self, jid: i32) -> Result<()> {
        let mut jail_args = args(["-r"]);
        jail_args.push(jid.to_string());
        self.runner.run_checked("jail", &jail_args).await?;
        tracing::info!(jid, "Jail stopped");
        Ok(())
    }

    /// Stop every running jail. Returns the ids that were stopped.
    pub async fn stop_all(&self) -> Result<Vec<i32>> {
        let mut stopped = Vec::new();
        for listing in self.list_running().await? {
            self.stop(listing.jid).await?;
            stopped.push(listing.jid);
        }
        Ok(stopped)
    }

    /// Look up the running jail with host id `jid`.
    pub async fn inspect(&self, jid: i32) -> Result<SandboxListing> {
        self.list_running()
            .await?
            .into_iter()
            .find(|listing| listing.jid == jid)
            .ok_or(CoreError::NotFound(jid))
    }

    /// Query the host for all running jails.
    pub async fn list_running(&self) -> Result<Vec<SandboxListing>> {
        let output = self.runner.run_checked("jls", &args(["-s"])).await?;
        parse_listing(&output.stdout_lossy())
    }
}
