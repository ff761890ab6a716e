//! Host configuration and the paths derived from it.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the persistent build sandbox.
pub const BUILD_SANDBOX: &str = "build";

/// Name of the persistent monitoring sandbox.
pub const MONITORING_SANDBOX: &str = "monitoring";

/// Snapshot of the base release that sandboxes are cloned from.
const BASE_SNAPSHOT: &str = "p1";

/// IPv4 settings for sandboxes that request network access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Ip4Config {
    /// Host interface leased addresses are bound to.
    pub interface: String,
    /// First address of the pool.
    pub start_addr: String,
    /// Netmask of the sandbox network.
    pub mask: String,
    /// Last-octet bound of the pool (inclusive).
    pub range: u32,
    /// Default gateway for sandboxes.
    pub gateway: String,
    /// Nameservers written into the base image. Empty copies the host's.
    pub dns: Vec<String>,
}

impl Default for Ip4Config {
    fn default() -> Self {
        Self {
            interface: "em0".into(),
            start_addr: "192.168.0.20".into(),
            mask: "255.255.255.0".into(),
            range: 220,
            gateway: "192.168.0.1".into(),
            dns: Vec::new(),
        }
    }
}

/// Configuration shared by the jail manager and both pipelines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Mountpoint of the jails dataset; sandbox roots live beneath it.
    pub base_dir: PathBuf,
    /// Parent ZFS dataset.
    pub zfs_dataset: String,
    /// OS release of the base image (`uname -r`).
    pub release: String,
    /// Compiler binary inside the build sandbox.
    pub compiler_path: String,
    /// `children.max` applied to exec sandboxes.
    pub children_max: u32,
    /// Compile time limit, enforced by the jail.
    pub build_timeout_secs: u64,
    /// Function run time limit, enforced by the jail.
    pub exec_timeout_secs: u64,
    /// Apply resource limits when creating exec sandboxes.
    pub apply_resource_limits: bool,
    /// Cache expiration hint for operators (not consulted by the core).
    pub cache_default_expiration_secs: Option<u64>,
    /// Cache purge hint for operators (not consulted by the core).
    pub cache_purge_after_secs: Option<u64>,
    /// Address pool and network settings.
    pub ip4: Ip4Config,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("/zroot/jails"),
            zfs_dataset: "zroot".into(),
            release: String::new(),
            compiler_path: "/usr/local/go/bin/go".into(),
            children_max: 0,
            build_timeout_secs: 120,
            exec_timeout_secs: 30,
            apply_resource_limits: true,
            cache_default_expiration_secs: None,
            cache_purge_after_secs: None,
            ip4: Ip4Config::default(),
        }
    }
}

impl HostConfig {
    /// Create a new config builder.
    pub fn builder() -> HostConfigBuilder {
        HostConfigBuilder::default()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), CoreError> {
        if !self.base_dir.is_absolute() {
            return Err(CoreError::Config(format!(
                "base_dir must be absolute, got {}",
                self.base_dir.display()
            )));
        }
        if self.zfs_dataset.is_empty() {
            return Err(CoreError::Config("zfs_dataset is required".into()));
        }
        if self.compiler_path.is_empty() {
            return Err(CoreError::Config("compiler_path is required".into()));
        }
        if self.build_timeout_secs == 0 || self.exec_timeout_secs == 0 {
            return Err(CoreError::Config("timeouts must be > 0".into()));
        }
        self.ip4
            .start_addr
            .parse::<Ipv4Addr>()
            .map_err(|_| CoreError::Config("bad start IP provided in config".into()))?;
        if self.ip4.range > u32::from(u8::MAX) {
            return Err(CoreError::Config(format!(
                "ip4 range must be <= 255, got {}",
                self.ip4.range
            )));
        }
        Ok(())
    }

    /// Compile time limit.
    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }

    /// Function run time limit.
    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_timeout_secs)
    }

    /// Root directory of a sandbox.
    pub fn sandbox_path(&self, name: &str) -> PathBuf {
        self.base_dir.join(name)
    }

    /// rc.conf of a sandbox, where its hostname is configured.
    pub fn rc_conf_path(&self, name: &str) -> PathBuf {
        self.sandbox_path(name).join("etc").join("rc.conf")
    }

    /// Root of the extracted base release.
    pub fn release_path(&self) -> PathBuf {
        self.base_dir.join("releases").join(&self.release)
    }

    /// Root of the shared build sandbox.
    pub fn build_path(&self) -> PathBuf {
        self.sandbox_path(BUILD_SANDBOX)
    }

    /// Directory source checkouts are cloned into.
    pub fn source_root(&self) -> PathBuf {
        self.build_path().join("root").join("go").join("src")
    }

    /// Checkout directory for a source location.
    pub fn source_path(&self, source: &str) -> PathBuf {
        self.source_root().join(source)
    }

    /// Generated entry point for a source location.
    ///
    /// One file per source location, shared by every call expression.
    pub fn entry_point_path(&self, source: &str) -> PathBuf {
        self.source_path(source).join("cmd").join("main.go")
    }

    /// Binary path inside a jail's filesystem.
    pub fn jail_binary_path(&self, invocation: &str) -> String {
        format!("/tmp/{invocation}")
    }

    /// Host path of the binary produced by a build.
    pub fn build_output_path(&self, invocation: &str) -> PathBuf {
        self.build_path().join("tmp").join(invocation)
    }

    /// Host path a binary is staged at inside an exec sandbox.
    pub fn staged_binary_path(&self, invocation: &str) -> PathBuf {
        self.sandbox_path(invocation).join("tmp").join(invocation)
    }

    /// Dataset holding the base release.
    pub fn release_dataset(&self) -> String {
        format!("{}/jails/releases/{}", self.zfs_dataset, self.release)
    }

    /// Snapshot sandboxes are cloned from.
    pub fn base_snapshot(&self) -> String {
        format!("{}@{BASE_SNAPSHOT}", self.release_dataset())
    }

    /// Dataset backing a sandbox.
    pub fn sandbox_dataset(&self, name: &str) -> String {
        format!("{}/jails/{}", self.zfs_dataset, name)
    }
}

/// Builder for HostConfig.
#[derive(Debug, Default)]
pub struct HostConfigBuilder {
    config: HostConfig,
}

impl HostConfigBuilder {
    /// Set the jails mountpoint.
    pub fn base_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.base_dir = path.into();
        self
    }

    /// Set the parent ZFS dataset.
    pub fn zfs_dataset(mut self, dataset: impl Into<String>) -> Self {
        self.config.zfs_dataset = dataset.into();
        self
    }

    /// Set the base release.
    pub fn release(mut self, release: impl Into<String>) -> Self {
        self.config.release = release.into();
        self
    }

    /// Set `children.max` for exec sandboxes.
    pub fn children_max(mut self, max: u32) -> Self {
        self.config.children_max = max;
        self
    }

    /// Set the compile time limit.
    pub fn build_timeout(mut self, timeout: Duration) -> Self {
        self.config.build_timeout_secs = timeout.as_secs();
        self
    }

    /// Set the run time limit.
    pub fn exec_timeout(mut self, timeout: Duration) -> Self {
        self.config.exec_timeout_secs = timeout.as_secs();
        self
    }

    /// Set the address pool start and last-octet bound.
    pub fn ip4_range(mut self, start: impl Into<String>, range: u32) -> Self {
        self.config.ip4.start_addr = start.into();
        self.config.ip4.range = range;
        self
    }

    /// Set the interface leased addresses are bound to.
    pub fn ip4_interface(mut self, interface: impl Into<String>) -> Self {
        self.config.ip4.interface = interface.into();
        self
    }

    /// Set nameservers for the base image.
    pub fn dns(mut self, servers: Vec<String>) -> Self {
        self.config.ip4.dns = servers;
        self
    }

    /// Build the configuration, validating all required fields.
    pub fn build(self) -> Result<HostConfig, CoreError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Whether `path` exists, treating permission errors as absent.
pub(crate) async fn path_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = HostConfig::default();
        assert_eq!(config.base_dir, PathBuf::from("/zroot/jails"));
        assert_eq!(config.compiler_path, "/usr/local/go/bin/go");
        assert_eq!(config.ip4.range, 220);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_rejects_bad_start_address() {
        let result = HostConfig::builder().ip4_range("not-an-ip", 100).build();
        assert!(matches!(result, Err(CoreError::Config(_))));
    }

    #[test]
    fn test_builder_rejects_range_overflow() {
        let result = HostConfig::builder().ip4_range("10.0.0.1", 300).build();
        assert!(matches!(result, Err(CoreError::Config(_))));
    }

    #[test]
    fn test_builder_rejects_relative_base_dir() {
        let result = HostConfig::builder().base_dir("jails").build();
        assert!(result.is_err());
    }

    #[test]
    fn test_derived_paths() {
        let config = HostConfig::builder()
            .base_dir("/zroot/jails")
            .zfs_dataset("zroot")
            .release("11.1-RELEASE")
            .build()
            .expect("valid config");

        assert_eq!(
            config.entry_point_path("example.com/pkg"),
            PathBuf::from("/zroot/jails/build/root/go/src/example.com/pkg/cmd/main.go")
        );
        assert_eq!(
            config.build_output_path("abc"),
            PathBuf::from("/zroot/jails/build/tmp/abc")
        );
        assert_eq!(
            config.staged_binary_path("abc"),
            PathBuf::from("/zroot/jails/abc/tmp/abc")
        );
        assert_eq!(config.jail_binary_path("abc"), "/tmp/abc");
        assert_eq!(config.rc_conf_path("abc"), PathBuf::from("/zroot/jails/abc/etc/rc.conf"));
        assert_eq!(
            config.base_snapshot(),
            "zroot/jails/releases/11.1-RELEASE@p1"
        );
        assert_eq!(config.sandbox_dataset("abc"), "zroot/jails/abc");
    }

    #[test]
    fn test_deserialize_partial_json() {
        let json = r#"{"base_dir": "/tank/jails", "ip4": {"start_addr": "10.0.0.2", "range": 10}}"#;
        let config: HostConfig = serde_json::from_str(json).expect("parses");
        assert_eq!(config.base_dir, PathBuf::from("/tank/jails"));
        assert_eq!(config.ip4.start_addr, "10.0.0.2");
        assert_eq!(config.ip4.interface, "em0");
        assert_eq!(config.exec_timeout(), Duration::from_secs(30));
    }
}
