//! Configuration for the HTTP server.
//!
//! Loaded from the JSON file named by `ISLE_CONFIG` when set, otherwise from
//! environment variables with defaults.

use isle_core::{CoreError, HostConfig};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

/// Default header carrying the admin token.
pub const DEFAULT_ADMIN_TOKEN_HEADER: &str = "X-Isle-Token";

/// Configuration for the isle server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP server bind address.
    pub http_addr: SocketAddr,

    /// Shared secret for the admin endpoints. Empty disables them.
    pub admin_token: String,

    /// Header the admin token is read from.
    pub admin_token_header: String,

    /// Jail host settings.
    pub host: HostConfig,
}

/// Configuration loading error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Invalid(#[from] CoreError),
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), 3280),
            admin_token: String::new(),
            admin_token_header: DEFAULT_ADMIN_TOKEN_HEADER.into(),
            host: HostConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load from `ISLE_CONFIG` if set, otherwise from the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let config = match std::env::var("ISLE_CONFIG") {
            Ok(path) if !path.is_empty() => Self::from_file(path)?,
            _ => Self::from_env(),
        };
        config.host.validate()?;
        Ok(config)
    }

    /// Parse a JSON config file. Missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `ISLE_HTTP_HOST` | `0.0.0.0` |
    /// | `ISLE_HTTP_PORT` | `3280` |
    /// | `ISLE_ADMIN_TOKEN` | empty (admin API disabled) |
    /// | `ISLE_ADMIN_TOKEN_HEADER` | `X-Isle-Token` |
    /// | `ISLE_BASE_DIR` | `/zroot/jails` |
    /// | `ISLE_ZFS_DATASET` | `zroot` |
    /// | `ISLE_RELEASE` | output of `uname -r` |
    /// | `ISLE_COMPILER` | `/usr/local/go/bin/go` |
    /// | `ISLE_CHILDREN_MAX` | `0` |
    /// | `ISLE_BUILD_TIMEOUT` | `120` (seconds) |
    /// | `ISLE_EXEC_TIMEOUT` | `30` (seconds) |
    /// | `ISLE_IP4_INTERFACE` | `em0` |
    /// | `ISLE_IP4_START` | `192.168.0.20` |
    /// | `ISLE_IP4_RANGE` | `220` |
    /// | `ISLE_DNS` | empty (copy host resolv.conf), comma-separated |
    pub fn from_env() -> Self {
        let default = Self::default();
        let host_default = default.host.clone();

        let http_host: IpAddr = env_parse("ISLE_HTTP_HOST").unwrap_or(default.http_addr.ip());
        let http_port: u16 = env_parse("ISLE_HTTP_PORT").unwrap_or(default.http_addr.port());

        let mut host = HostConfig {
            base_dir: std::env::var("ISLE_BASE_DIR")
                .map(PathBuf::from)
                .unwrap_or(host_default.base_dir),
            zfs_dataset: std::env::var("ISLE_ZFS_DATASET").unwrap_or(host_default.zfs_dataset),
            release: std::env::var("ISLE_RELEASE").unwrap_or(host_default.release),
            compiler_path: std::env::var("ISLE_COMPILER").unwrap_or(host_default.compiler_path),
            children_max: env_parse("ISLE_CHILDREN_MAX").unwrap_or(host_default.children_max),
            build_timeout_secs: env_parse("ISLE_BUILD_TIMEOUT")
                .unwrap_or(host_default.build_timeout_secs),
            exec_timeout_secs: env_parse("ISLE_EXEC_TIMEOUT")
                .unwrap_or(host_default.exec_timeout_secs),
            ..host_default
        };
        if let Ok(interface) = std::env::var("ISLE_IP4_INTERFACE") {
            host.ip4.interface = interface;
        }
        if let Ok(start) = std::env::var("ISLE_IP4_START") {
            host.ip4.start_addr = start;
        }
        if let Some(range) = env_parse("ISLE_IP4_RANGE") {
            host.ip4.range = range;
        }
        if let Ok(dns) = std::env::var("ISLE_DNS") {
            host.ip4.dns = dns
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }

        Self {
            http_addr: SocketAddr::new(http_host, http_port),
            admin_token: std::env::var("ISLE_ADMIN_TOKEN").unwrap_or(default.admin_token),
            admin_token_header: std::env::var("ISLE_ADMIN_TOKEN_HEADER")
                .unwrap_or(default.admin_token_header),
            host,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
