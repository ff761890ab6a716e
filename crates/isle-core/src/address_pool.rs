//! IPv4 lease registry for sandboxes that request network access.
//!
//! The pool is populated once from [`Ip4Config`] and never grows or shrinks.
//! Every operation takes the same lock, so allocation is a single atomic
//! scan-and-assign. Which free address [`AddressPool::allocate`] picks is
//! unspecified.

use crate::config::Ip4Config;
use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

// ============================================================================
// Entry state
// ============================================================================

/// Ownership of a single pool address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "state", content = "owner")]
pub enum AddressState {
    /// Free to allocate.
    Available,
    /// Held by the given owner tag.
    Leased(String),
}

impl AddressState {
    /// Whether the address can be handed out.
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available)
    }

    /// Owner tag, if leased.
    pub fn owner(&self) -> Option<&str> {
        match self {
            Self::Available => None,
            Self::Leased(owner) => Some(owner),
        }
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Pool statistics for observability.
///
/// All counters are atomic and can be read without locking.
#[derive(Debug, Default)]
pub struct PoolStats {
    /// Successful allocations.
    pub allocated: AtomicU64,
    /// Allocation attempts that found no free address.
    pub exhausted: AtomicU64,
    /// Release calls, including no-op releases of free addresses.
    pub released: AtomicU64,
}

impl PoolStats {
    /// Get the number of successful allocations.
    pub fn allocated(&self) -> u64 {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Get the number of exhaustion events.
    pub fn exhausted(&self) -> u64 {
        self.exhausted.load(Ordering::Relaxed)
    }

    /// Get the number of releases.
    pub fn released(&self) -> u64 {
        self.released.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Pool
// ============================================================================

/// Thread-safe registry of IPv4 leases over a fixed range.
#[derive(Debug)]
pub struct AddressPool {
    entries: Mutex<HashMap<Ipv4Addr, AddressState>>,
    stats: PoolStats,
}

impl AddressPool {
    /// Build the pool from the configured start address and range bound.
    ///
    /// Addresses are produced by incrementing the last octet of the start
    /// address while it stays below `range`, so `192.168.0.20` with range
    /// `220` yields `.20` through `.220`.
    pub fn new(config: &Ip4Config) -> Result<Self> {
        let start: Ipv4Addr = config
            .start_addr
            .parse()
            .map_err(|_| CoreError::Config("bad start IP provided in config".into()))?;
        let bound = u8::try_from(config.range).map_err(|_| {
            CoreError::Config(format!("ip4 range must be <= 255, got {}", config.range))
        })?;

        let [a, b, c, first] = start.octets();
        let mut entries = HashMap::new();
        entries.insert(start, AddressState::Available);
        let mut last = first;
        while last < bound {
            last += 1;
            entries.insert(Ipv4Addr::new(a, b, c, last), AddressState::Available);
        }

        debug!(start = %start, size = entries.len(), "Address pool initialized");
        Ok(Self {
            entries: Mutex::new(entries),
            stats: PoolStats::default(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Ipv4Addr, AddressState>> {
        // Every critical section leaves the map consistent, so a poisoned
        // lock is still safe to use.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Lease some free address to `owner`.
    pub fn allocate(&self, owner: &str) -> Result<Ipv4Addr> {
        let mut entries = self.lock();
        let free = entries
            .iter_mut()
            .find(|(_, state)| state.is_available());

        match free {
            Some((address, state)) => {
                *state = AddressState::Leased(owner.to_string());
                self.stats.allocated.fetch_add(1, Ordering::Relaxed);
                debug!(address = %address, owner, "Address leased");
                Ok(*address)
            }
            None => {
                self.stats.exhausted.fetch_add(1, Ordering::Relaxed);
                warn!(owner, "Address pool exhausted");
                Err(CoreError::AddressExhausted)
            }
        }
    }

    /// Mark `address` free.
    ///
    /// Ownership is not checked and releasing a free or unknown address is a
    /// no-op.
    pub fn release(&self, address: Ipv4Addr) {
        let mut entries = self.lock();
        if let Some(state) = entries.get_mut(&address) {
            *state = AddressState::Available;
        }
        self.stats.released.fetch_add(1, Ordering::Relaxed);
        debug!(address = %address, "Address released");
    }

    /// Administrative override of an address's state.
    pub fn set_state(&self, address: Ipv4Addr, state: AddressState) -> Result<()> {
        let mut entries = self.lock();
        let entry = entries
            .get_mut(&address)
            .ok_or(CoreError::UnknownAddress(address))?;
        debug!(address = %address, ?state, "Address state overridden");
        *entry = state;
        Ok(())
    }

    /// Point-in-time copy of the whole pool.
    pub fn snapshot(&self) -> BTreeMap<Ipv4Addr, AddressState> {
        self.lock()
            .iter()
            .map(|(address, state)| (*address, state.clone()))
            .collect()
    }

    /// Number of addresses in the pool.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the pool has no addresses.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of free addresses.
    pub fn available(&self) -> usize {
        self.lock().values().filter(|s| s.is_available()).count()
    }

    /// Get pool statistics.
    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }
}
