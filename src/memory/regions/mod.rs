//! Remote memory regions and owned allocations
//!
//! A [`RemoteRegion`] names a span of a target address space and answers
//! questions about it live through the provider. A [`RemoteAllocation`]
//! additionally owns the span and frees it exactly once.

pub mod allocation;
pub mod protection;
pub mod region;

pub use allocation::{AllocationState, AllocationTable, RemoteAllocation};
pub use protection::{ProtectionFlags, ProtectionGuard};
pub use region::RemoteRegion;

use crate::core::types::Address;
use serde::{Deserialize, Serialize};

/// State of a memory region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionState {
    /// Memory is committed and accessible
    Committed,
    /// Memory is reserved but not committed
    Reserved,
    /// Memory is free/unallocated
    Free,
}

/// Information about a memory region as reported by a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionInfo {
    /// Start of the run of pages sharing these attributes
    pub base: Address,
    /// Size of the run in bytes
    pub size: usize,
    pub protection: ProtectionFlags,
    pub state: RegionState,
}

impl RegionInfo {
    /// Get the end address of the region
    pub fn end(&self) -> Address {
        self.base.offset(self.size as isize)
    }

    /// Check if an address is within this region
    pub fn contains(&self, address: Address) -> bool {
        address >= self.base && address < self.end()
    }

    pub fn is_committed(&self) -> bool {
        self.state == RegionState::Committed
    }
}
