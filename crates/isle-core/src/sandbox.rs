//! Sandbox identity and per-instance state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use uuid::Uuid;

/// Unique identifier for an invocation and the exec sandbox it owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SandboxId(Uuid);

impl SandboxId {
    /// Create a new random sandbox ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SandboxId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SandboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for SandboxId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// What a sandbox is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxKind {
    /// The golden release image everything is cloned from.
    Base,
    /// The persistent compile area shared by all builds.
    Build,
    /// One-shot sandbox owned by a single invocation.
    Exec,
    /// Host monitoring stack.
    Monitoring,
}

impl SandboxKind {
    /// Kind implied by a sandbox name.
    pub fn from_name(name: &str) -> Self {
        match name {
            "build" => Self::Build,
            "monitoring" => Self::Monitoring,
            _ => Self::Exec,
        }
    }
}

/// Lifecycle state of a sandbox.
///
/// `Absent -> Created -> Running -> Stopped -> Absent`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxState {
    /// No backing dataset.
    Absent,
    /// Dataset cloned and hostname configured.
    Created,
    /// A jail is bound to the dataset path.
    Running,
    /// The jail has exited; the dataset still exists.
    Stopped,
}

impl fmt::Display for SandboxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => write!(f, "Absent"),
            Self::Created => write!(f, "Created"),
            Self::Running => write!(f, "Running"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// A sandbox backed by a copy-on-write clone of the base image.
///
/// Returned by [`JailManager::create`](crate::JailManager::create) and owned
/// by whichever pipeline created it until it is destroyed.
#[derive(Debug, Clone)]
pub struct SandboxInstance {
    name: String,
    kind: SandboxKind,
    dataset_path: PathBuf,
    hostname: String,
    leased_address: Option<Ipv4Addr>,
    state: SandboxState,
    created_at: DateTime<Utc>,
}

impl SandboxInstance {
    pub(crate) fn created(name: &str, dataset_path: PathBuf) -> Self {
        Self {
            name: name.to_string(),
            kind: SandboxKind::from_name(name),
            dataset_path,
            hostname: name.to_string(),
            leased_address: None,
            state: SandboxState::Created,
            created_at: Utc::now(),
        }
    }

    /// Sandbox name; for exec sandboxes this is the invocation id.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the sandbox kind.
    pub fn kind(&self) -> SandboxKind {
        self.kind
    }

    /// Root of the cloned dataset on the host.
    pub fn dataset_path(&self) -> &PathBuf {
        &self.dataset_path
    }

    /// Hostname written into the sandbox's rc.conf.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Address leased for this sandbox, if any.
    pub fn leased_address(&self) -> Option<Ipv4Addr> {
        self.leased_address
    }

    /// Get the current state.
    pub fn state(&self) -> SandboxState {
        self.state
    }

    /// Get the creation timestamp.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub(crate) fn set_state(&mut self, state: SandboxState) {
        tracing::trace!(sandbox = %self.name, from = %self.state, to = %state, "Sandbox state change");
        self.state = state;
    }

    pub(crate) fn set_lease(&mut self, address: Ipv4Addr) {
        self.leased_address = Some(address);
    }

    pub(crate) fn take_lease(&mut self) -> Option<Ipv4Addr> {
        self.leased_address.take()
    }
}
