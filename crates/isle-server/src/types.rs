//! Request and response bodies for the HTTP API.

use isle_core::{InvocationRequest, SandboxListing};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// Function invocation
// ============================================================================

/// Body of `POST /api/v1/function`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FunctionRequest {
    /// Package import path.
    pub url: String,
    /// Call expression.
    pub call: String,
    /// Lease an address for the run.
    #[serde(default)]
    pub ip4: bool,
    /// Re-fetch and rebuild.
    #[serde(default)]
    pub cache_bust: bool,
}

impl From<FunctionRequest> for InvocationRequest {
    fn from(req: FunctionRequest) -> Self {
        InvocationRequest::new(req.url, req.call)
            .with_address(req.ip4)
            .with_rebuild(req.cache_bust)
    }
}

/// Successful invocation.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FunctionResponse {
    /// Completion time as Unix seconds.
    pub timestamp: i64,
    /// Function output.
    pub data: String,
}

// ============================================================================
// Admin: sandboxes
// ============================================================================

/// Running sandboxes.
#[derive(Debug, Serialize)]
pub struct JailsResponse {
    pub jails: Vec<SandboxListing>,
}

/// One running sandbox.
#[derive(Debug, Serialize)]
pub struct JailDetailsResponse {
    pub details: SandboxListing,
}

/// Result of stopping one sandbox.
#[derive(Debug, Serialize)]
pub struct KillResponse {
    pub deleted: i32,
}

/// Result of stopping every sandbox.
#[derive(Debug, Serialize)]
pub struct KillAllResponse {
    pub deleted: Vec<i32>,
}

// ============================================================================
// Admin: address pool
// ============================================================================

/// Query string of `GET /api/v1/admin/ips`.
#[derive(Debug, Default, Deserialize)]
pub struct IpsQuery {
    pub state: Option<String>,
}

/// Full pool, address to `0` (free) or `1` (in use).
pub type PoolResponse = BTreeMap<String, u8>;

/// Body of `PUT /api/v1/admin/ips`.
#[derive(Debug, Deserialize, Serialize)]
pub struct IpStateUpdate {
    /// Pool address.
    pub ip: String,
    /// `0` frees the address, `1` reserves it.
    pub state: u8,
}

/// Pool and cache counters.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    pub pool_size: usize,
    pub pool_available: usize,
    pub allocated: u64,
    pub exhausted: u64,
    pub released: u64,
    pub cached_binaries: usize,
}

/// Error body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
